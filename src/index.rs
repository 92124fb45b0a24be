//! In-memory vector index with on-disk persistence.
//!
//! `rebuild` flattens the knowledge base into section documents, windows
//! them with [`ChunkWindows`], embeds every window in one batch, and
//! replaces all prior state. Rebuilding twice from identical input
//! yields identical search behavior.
//!
//! Persistence uses two artifacts under the data directory: a JSON
//! metadata file (model, dims, content-hash stamp, chunk metadata) and a
//! raw little-endian `f32` matrix. Staleness is detected by comparing
//! the stored stamp against the store's current content hash; callers
//! rebuild on mismatch rather than trusting stale vectors.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::chunk::ChunkWindows;
use crate::config::{ChunkingConfig, EmbeddingConfig};
use crate::embedding;
use crate::error::CompanionError;
use crate::models::{ChunkMeta, KnowledgeBase};
use crate::store;

const META_FILE: &str = "index.meta.json";
const VEC_FILE: &str = "index.vec";

#[derive(Debug, Default)]
pub struct VectorIndex {
    model: String,
    dims: usize,
    /// Content hash of the knowledge base this index was built from.
    stamp: String,
    vectors: Vec<Vec<f32>>,
    metas: Vec<ChunkMeta>,
}

/// One vector-channel search hit.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub score: f64,
    pub meta: ChunkMeta,
}

impl VectorIndex {
    pub fn is_empty(&self) -> bool {
        self.metas.is_empty()
    }

    pub fn len(&self) -> usize {
        self.metas.len()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// The content hash of the knowledge base this index was built
    /// from; doubles as the response-cache invalidation key.
    pub fn stamp(&self) -> &str {
        &self.stamp
    }

    /// All chunk metadata in insertion order; the keyword channel scores
    /// every chunk, not just vector candidates.
    pub fn chunks(&self) -> &[ChunkMeta] {
        &self.metas
    }

    /// True when the index was built from a different document state
    /// than `current_hash`.
    pub fn is_stale(&self, current_hash: &str) -> bool {
        self.stamp != current_hash
    }

    /// Discard all state and re-index the knowledge base.
    pub async fn rebuild(
        &mut self,
        embedding_cfg: &EmbeddingConfig,
        chunking_cfg: &ChunkingConfig,
        kb: &KnowledgeBase,
    ) -> Result<usize> {
        let provider = embedding::create_provider(embedding_cfg)?;

        let mut metas = Vec::new();
        for (section, text) in flatten_sections(kb) {
            for (window, offset) in
                ChunkWindows::new(&text, chunking_cfg.chunk_chars, chunking_cfg.overlap_chars)
            {
                metas.push(ChunkMeta {
                    section: section.clone(),
                    text: window.to_string(),
                    offset,
                    seq: metas.len(),
                });
            }
        }

        let texts: Vec<String> = metas.iter().map(|m| m.text.clone()).collect();
        let vectors = if texts.is_empty() {
            Vec::new()
        } else {
            embedding::embed_texts(embedding_cfg, &texts).await?
        };

        self.model = provider.model_name().to_string();
        self.dims = provider.dims();
        self.stamp = store::content_hash(kb);
        self.vectors = vectors;
        self.metas = metas;

        info!(chunks = self.len(), model = %self.model, "vector index rebuilt");
        Ok(self.len())
    }

    /// Top-k chunks by cosine similarity. Ties are broken by chunk
    /// insertion order so rankings are fully deterministic.
    pub async fn search(
        &self,
        embedding_cfg: &EmbeddingConfig,
        query: &str,
        k: usize,
    ) -> Result<Vec<VectorHit>> {
        if self.is_empty() {
            return Err(CompanionError::EmptyIndex.into());
        }

        let query_vec = embedding::embed_query(embedding_cfg, query).await?;

        let mut hits: Vec<VectorHit> = self
            .vectors
            .iter()
            .zip(self.metas.iter())
            .map(|(vec, meta)| VectorHit {
                score: embedding::cosine_similarity(&query_vec, vec) as f64,
                meta: meta.clone(),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.meta.seq.cmp(&b.meta.seq))
        });
        hits.truncate(k);

        debug!(query_len = query.len(), hits = hits.len(), "vector search");
        Ok(hits)
    }

    // ============ Persistence ============

    /// Write the metadata and embedding-matrix artifacts. Both are
    /// replaced wholesale, never patched.
    pub fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;

        let meta = IndexMeta {
            model: self.model.clone(),
            dims: self.dims,
            content_hash: self.stamp.clone(),
            chunks: self.metas.clone(),
        };
        let meta_json = serde_json::to_string_pretty(&meta)?;
        std::fs::write(dir.join(META_FILE), meta_json)?;

        let mut matrix = Vec::with_capacity(self.vectors.len() * self.dims * 4);
        for vec in &self.vectors {
            matrix.extend_from_slice(&embedding::vec_to_blob(vec));
        }
        std::fs::write(dir.join(VEC_FILE), matrix)?;
        Ok(())
    }

    /// Restore a previously saved index, or `None` when no artifacts
    /// exist. The caller decides whether the restored index is stale.
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let meta_path = dir.join(META_FILE);
        let vec_path = dir.join(VEC_FILE);
        if !meta_path.exists() || !vec_path.exists() {
            return Ok(None);
        }

        let meta_json = std::fs::read_to_string(&meta_path)
            .with_context(|| format!("Failed to read {}", meta_path.display()))?;
        let meta: IndexMeta = serde_json::from_str(&meta_json)
            .with_context(|| format!("Malformed index metadata: {}", meta_path.display()))?;

        let matrix = std::fs::read(&vec_path)
            .with_context(|| format!("Failed to read {}", vec_path.display()))?;

        let row_bytes = meta.dims * 4;
        if row_bytes == 0 || matrix.len() != meta.chunks.len() * row_bytes {
            bail!(
                "Embedding matrix does not match metadata ({} bytes for {} chunks of dim {})",
                matrix.len(),
                meta.chunks.len(),
                meta.dims
            );
        }

        let vectors = matrix
            .chunks_exact(row_bytes)
            .map(embedding::blob_to_vec)
            .collect();

        Ok(Some(Self {
            model: meta.model,
            dims: meta.dims,
            stamp: meta.content_hash,
            vectors,
            metas: meta.chunks,
        }))
    }
}

#[derive(Serialize, Deserialize)]
struct IndexMeta {
    model: String,
    dims: usize,
    content_hash: String,
    chunks: Vec<ChunkMeta>,
}

/// Flatten every text-bearing field of the knowledge base into
/// `(section id, document text)` pairs. Attachments and URLs are file
/// references, not prose, and are skipped.
pub fn flatten_sections(kb: &KnowledgeBase) -> Vec<(String, String)> {
    let mut sections = Vec::new();

    let profile = &kb.user_profile;
    for (field, value) in [
        ("name", &profile.name),
        ("current_role", &profile.current_role),
        ("profile_summary", &profile.profile_summary),
    ] {
        if !value.trim().is_empty() {
            sections.push((format!("profile/{}", field), format!("{}: {}", field, value)));
        }
    }

    for (category, skills) in &kb.technical_skills {
        if skills.is_empty() {
            continue;
        }
        sections.push((
            format!("skills/{}", category),
            format!("Technical skills ({}): {}", category, skills.join(", ")),
        ));
    }

    for (i, project) in kb.projects.iter().enumerate() {
        let mut text = format!("Project: {} - {}", project.domain, project.description);
        if !project.role.is_empty() {
            text.push_str(&format!(" Role: {}.", project.role));
        }
        if !project.responsibilities.is_empty() {
            text.push_str(&format!(
                " Responsibilities: {}.",
                project.responsibilities.join(", ")
            ));
        }
        if !project.related_skills.is_empty() {
            text.push_str(&format!(" Skills: {}.", project.related_skills.join(", ")));
        }
        if !project.tags.is_empty() {
            text.push_str(&format!(" Tags: {}.", project.tags.join(", ")));
        }
        sections.push((format!("projects/{}", i), text));
    }

    for (i, activity) in kb.other_activities.iter().enumerate() {
        let mut text = format!("Activity: {} - {}", activity.domain, activity.description);
        if !activity.role.is_empty() {
            text.push_str(&format!(" Role: {}.", activity.role));
        }
        if !activity.related_skills.is_empty() {
            text.push_str(&format!(" Skills: {}.", activity.related_skills.join(", ")));
        }
        sections.push((format!("activities/{}", i), text));
    }

    sections
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ProjectRecord, UserProfile};
    use tempfile::TempDir;

    fn sample_kb() -> KnowledgeBase {
        let mut kb = KnowledgeBase::default();
        kb.user_profile = UserProfile {
            name: "Ada".to_string(),
            current_role: "Platform engineer".to_string(),
            profile_summary: "Works on infrastructure tooling and distributed systems".to_string(),
            ..Default::default()
        };
        kb.technical_skills
            .insert("Languages".to_string(), vec!["Go".to_string(), "Rust".to_string()]);
        kb.projects.push(ProjectRecord {
            domain: "Infrastructure".to_string(),
            description: "Built a Kubernetes autoscaler in Go".to_string(),
            related_skills: vec!["Go".to_string(), "Kubernetes".to_string()],
            ..Default::default()
        });
        kb
    }

    fn configs() -> (EmbeddingConfig, ChunkingConfig) {
        (EmbeddingConfig::default(), ChunkingConfig::default())
    }

    #[tokio::test]
    async fn test_search_before_rebuild_fails_empty_index() {
        let (embed_cfg, _) = configs();
        let index = VectorIndex::default();
        let err = index.search(&embed_cfg, "anything", 3).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CompanionError>(),
            Some(CompanionError::EmptyIndex)
        ));
    }

    #[tokio::test]
    async fn test_rebuild_indexes_all_sections() {
        let (embed_cfg, chunk_cfg) = configs();
        let mut index = VectorIndex::default();
        let count = index.rebuild(&embed_cfg, &chunk_cfg, &sample_kb()).await.unwrap();
        assert!(count >= 5); // 3 profile fields + 1 skill category + 1 project
        assert_eq!(index.len(), count);
        assert_eq!(index.model(), "token-hash");
    }

    #[tokio::test]
    async fn test_rebuild_is_idempotent_for_rankings() {
        let (embed_cfg, chunk_cfg) = configs();
        let kb = sample_kb();

        let mut a = VectorIndex::default();
        a.rebuild(&embed_cfg, &chunk_cfg, &kb).await.unwrap();
        let mut b = VectorIndex::default();
        b.rebuild(&embed_cfg, &chunk_cfg, &kb).await.unwrap();

        let hits_a = a.search(&embed_cfg, "go kubernetes", 5).await.unwrap();
        let hits_b = b.search(&embed_cfg, "go kubernetes", 5).await.unwrap();

        let ids_a: Vec<String> = hits_a.iter().map(|h| h.meta.chunk_id()).collect();
        let ids_b: Vec<String> = hits_b.iter().map(|h| h.meta.chunk_id()).collect();
        assert_eq!(ids_a, ids_b);
    }

    #[tokio::test]
    async fn test_search_ties_break_by_insertion_order() {
        let (embed_cfg, chunk_cfg) = configs();
        let mut kb = KnowledgeBase::default();
        // Two identical projects produce identically scored chunks.
        for _ in 0..2 {
            kb.projects.push(ProjectRecord {
                domain: "Same".to_string(),
                description: "identical text".to_string(),
                ..Default::default()
            });
        }

        let mut index = VectorIndex::default();
        index.rebuild(&embed_cfg, &chunk_cfg, &kb).await.unwrap();
        let hits = index.search(&embed_cfg, "identical", 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!((hits[0].score - hits[1].score).abs() < 1e-12);
        assert!(hits[0].meta.seq < hits[1].meta.seq);
    }

    #[tokio::test]
    async fn test_save_load_roundtrip_and_staleness() {
        let tmp = TempDir::new().unwrap();
        let (embed_cfg, chunk_cfg) = configs();
        let mut kb = sample_kb();

        let mut index = VectorIndex::default();
        index.rebuild(&embed_cfg, &chunk_cfg, &kb).await.unwrap();
        index.save(tmp.path()).unwrap();

        let restored = VectorIndex::load(tmp.path()).unwrap().expect("index on disk");
        assert_eq!(restored.len(), index.len());
        assert!(!restored.is_stale(&store::content_hash(&kb)));

        // Restored index ranks exactly like the original.
        let before = index.search(&embed_cfg, "autoscaler", 3).await.unwrap();
        let after = restored.search(&embed_cfg, "autoscaler", 3).await.unwrap();
        let ids = |hits: &[VectorHit]| -> Vec<String> {
            hits.iter().map(|h| h.meta.chunk_id()).collect()
        };
        assert_eq!(ids(&before), ids(&after));

        // Editing the knowledge base makes the stored index stale.
        kb.projects[0].description = "Rewrote the autoscaler in Rust".to_string();
        assert!(restored.is_stale(&store::content_hash(&kb)));
    }

    #[test]
    fn test_load_missing_artifacts_returns_none() {
        let tmp = TempDir::new().unwrap();
        assert!(VectorIndex::load(tmp.path()).unwrap().is_none());
    }

    #[test]
    fn test_flatten_skips_empty_fields() {
        let kb = KnowledgeBase::default();
        assert!(flatten_sections(&kb).is_empty());
    }
}
