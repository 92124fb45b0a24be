//! Knowledge-base and index statistics.
//!
//! A quick confidence check that saves and rebuilds are working: section
//! counts from the knowledge document plus chunk/model figures from the
//! vector index. Used by `companion stats` and `GET /stats`.

use serde::Serialize;

use crate::index::VectorIndex;
use crate::models::KnowledgeBase;

#[derive(Debug, Serialize)]
pub struct CompanionStats {
    pub profile_complete: bool,
    pub skill_categories: usize,
    pub skills: usize,
    pub projects: usize,
    pub activities: usize,
    pub indexed_chunks: usize,
    pub embedding_model: String,
    pub embedding_dims: usize,
}

pub fn collect(kb: &KnowledgeBase, index: &VectorIndex) -> CompanionStats {
    CompanionStats {
        profile_complete: !kb.user_profile.name.is_empty()
            && !kb.user_profile.profile_summary.is_empty(),
        skill_categories: kb.technical_skills.len(),
        skills: kb.technical_skills.values().map(Vec::len).sum(),
        projects: kb.projects.len(),
        activities: kb.other_activities.len(),
        indexed_chunks: index.len(),
        embedding_model: index.model().to_string(),
        embedding_dims: index.dims(),
    }
}

/// Human-readable rendering for the CLI.
pub fn print_stats(stats: &CompanionStats) {
    println!("Companion — Knowledge Stats");
    println!("===========================");
    println!();
    println!(
        "  Profile:     {}",
        if stats.profile_complete {
            "complete"
        } else {
            "incomplete"
        }
    );
    println!(
        "  Skills:      {} in {} categories",
        stats.skills, stats.skill_categories
    );
    println!("  Projects:    {}", stats.projects);
    println!("  Activities:  {}", stats.activities);
    println!();
    println!("  Indexed:     {} chunks", stats.indexed_chunks);
    if stats.indexed_chunks > 0 {
        println!(
            "  Embeddings:  {} ({} dims)",
            stats.embedding_model, stats.embedding_dims
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ProjectRecord, UserProfile};

    #[test]
    fn test_collect_counts_sections() {
        let mut kb = KnowledgeBase::default();
        kb.user_profile = UserProfile {
            name: "Ada".to_string(),
            profile_summary: "Engineer".to_string(),
            ..Default::default()
        };
        kb.technical_skills
            .insert("Languages".to_string(), vec!["Go".to_string(), "Rust".to_string()]);
        kb.projects.push(ProjectRecord {
            domain: "Infra".to_string(),
            description: "autoscaler".to_string(),
            ..Default::default()
        });

        let stats = collect(&kb, &VectorIndex::default());
        assert!(stats.profile_complete);
        assert_eq!(stats.skill_categories, 1);
        assert_eq!(stats.skills, 2);
        assert_eq!(stats.projects, 1);
        assert_eq!(stats.indexed_chunks, 0);
    }
}
