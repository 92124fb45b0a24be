//! Core data types flowing through the companion pipeline.
//!
//! The knowledge-base types mirror the persisted JSON document exactly;
//! the chunk and retrieval types are derived and never outlive an index
//! rebuild.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The whole persisted knowledge document. Read wholesale on load,
/// written wholesale on every save.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeBase {
    #[serde(default)]
    pub user_profile: UserProfile,
    /// Category name -> skills. BTreeMap keeps category iteration
    /// deterministic across rebuilds.
    #[serde(default)]
    pub technical_skills: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub projects: Vec<ProjectRecord>,
    #[serde(default)]
    pub other_activities: Vec<ActivityRecord>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UserProfile {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub current_role: String,
    #[serde(default)]
    pub profile_summary: String,
    #[serde(default)]
    pub attachments: Vec<String>,
    #[serde(default)]
    pub urls: Vec<String>,
}

/// A project entry. Identified by list position only; lifecycle is
/// explicit add/delete through the UI surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProjectRecord {
    pub domain: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub responsibilities: Vec<String>,
    #[serde(default)]
    pub related_skills: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ActivityRecord {
    pub domain: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub responsibilities: Vec<String>,
    #[serde(default)]
    pub related_skills: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A bounded window of one knowledge-base section, the unit of
/// embedding and retrieval. Regenerated on every rebuild.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkMeta {
    /// Section identifier, e.g. `profile`, `skills/Languages`,
    /// `projects/2`.
    pub section: String,
    pub text: String,
    /// Character offset of this window within the section document.
    pub offset: usize,
    /// Insertion order across the whole index; used as the search
    /// tie-break.
    pub seq: usize,
}

impl ChunkMeta {
    /// Stable identity of a chunk within one index generation.
    pub fn chunk_id(&self) -> String {
        format!("{}#{}", self.section, self.offset)
    }
}

/// A retrieval result after the hybrid merge.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub section: String,
    pub text: String,
    pub score: f64,
}

/// One message in the bounded conversation window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}
