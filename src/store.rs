//! JSON-backed knowledge store.
//!
//! The whole knowledge base is one JSON document, read wholesale on load
//! and replaced wholesale on save. Saves go through a temp file and an
//! atomic rename, so an interrupted write never leaves a partial
//! document behind.
//!
//! The store also exposes a content hash over the canonical JSON; the
//! vector index records that hash at rebuild time and compares it on
//! load to detect staleness without trusting file timestamps.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::error::CompanionError;
use crate::models::{ActivityRecord, KnowledgeBase, ProjectRecord, UserProfile};

pub struct KnowledgeStore {
    path: PathBuf,
}

impl KnowledgeStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the knowledge base, or an empty one if the file does not
    /// exist yet.
    pub fn load(&self) -> Result<KnowledgeBase> {
        if !self.path.exists() {
            return Ok(KnowledgeBase::default());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        let kb: KnowledgeBase = serde_json::from_str(&content)
            .with_context(|| format!("Malformed knowledge file: {}", self.path.display()))?;
        Ok(kb)
    }

    /// Replace the persisted document. Writes a temp file first and
    /// renames it into place.
    pub fn save(&self, kb: &KnowledgeBase) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(kb)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

/// SHA-256 over the canonical JSON rendering, the staleness stamp the
/// vector index stores at rebuild time.
pub fn content_hash(kb: &KnowledgeBase) -> String {
    let json = serde_json::to_string(kb).expect("knowledge base always serializes");
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ============ Mutations ============
//
// Each operation validates its required fields, mutates the in-memory
// document, and leaves persistence to the caller so a batch of edits is
// still one atomic save.

pub fn set_profile(kb: &mut KnowledgeBase, profile: UserProfile) -> Result<()> {
    if profile.name.trim().is_empty() {
        return Err(CompanionError::Validation("profile name must not be empty".into()).into());
    }
    kb.user_profile = profile;
    Ok(())
}

pub fn add_skills(kb: &mut KnowledgeBase, category: &str, skills: Vec<String>) -> Result<()> {
    let category = category.trim();
    if category.is_empty() {
        return Err(CompanionError::Validation("skill category must not be empty".into()).into());
    }
    let skills: Vec<String> = skills
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if skills.is_empty() {
        return Err(CompanionError::Validation("at least one skill is required".into()).into());
    }
    let entry = kb.technical_skills.entry(category.to_string()).or_default();
    for skill in skills {
        if !entry.contains(&skill) {
            entry.push(skill);
        }
    }
    Ok(())
}

pub fn remove_skill_category(kb: &mut KnowledgeBase, category: &str) -> Result<()> {
    if kb.technical_skills.remove(category).is_none() {
        return Err(
            CompanionError::Validation(format!("unknown skill category: {}", category)).into(),
        );
    }
    Ok(())
}

pub fn add_project(kb: &mut KnowledgeBase, project: ProjectRecord) -> Result<()> {
    if project.domain.trim().is_empty() {
        return Err(CompanionError::Validation("project domain must not be empty".into()).into());
    }
    if project.description.trim().is_empty() {
        return Err(
            CompanionError::Validation("project description must not be empty".into()).into(),
        );
    }
    kb.projects.push(project);
    Ok(())
}

pub fn remove_project(kb: &mut KnowledgeBase, index: usize) -> Result<ProjectRecord> {
    if index >= kb.projects.len() {
        return Err(
            CompanionError::Validation(format!("no project at index {}", index)).into(),
        );
    }
    Ok(kb.projects.remove(index))
}

pub fn add_activity(kb: &mut KnowledgeBase, activity: ActivityRecord) -> Result<()> {
    if activity.domain.trim().is_empty() {
        return Err(CompanionError::Validation("activity domain must not be empty".into()).into());
    }
    kb.other_activities.push(activity);
    Ok(())
}

pub fn remove_activity(kb: &mut KnowledgeBase, index: usize) -> Result<ActivityRecord> {
    if index >= kb.other_activities.len() {
        return Err(
            CompanionError::Validation(format!("no activity at index {}", index)).into(),
        );
    }
    Ok(kb.other_activities.remove(index))
}
