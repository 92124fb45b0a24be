//! Hybrid retrieval: vector similarity blended with keyword overlap.
//!
//! Pure vector search misses exact-term matches (proper nouns,
//! acronyms); pure keyword search misses paraphrase. The blend here is a
//! deliberate, simple mitigation: both channels are min-max normalized
//! to [0, 1] and combined as
//!
//! ```text
//! hybrid = (1 - alpha) * keyword + alpha * vector
//! ```
//!
//! with `alpha` from `[retrieval].hybrid_alpha` (default 0.6, favoring
//! the vector channel). Results are deduplicated by chunk identity.

use anyhow::Result;
use std::collections::HashMap;
use tracing::debug;

use crate::config::{EmbeddingConfig, RetrievalConfig};
use crate::embedding::tokenize;
use crate::index::{VectorHit, VectorIndex};
use crate::models::{ChunkMeta, ScoredChunk};

/// Run both channels against the index and return the merged top-k.
pub async fn hybrid_search(
    index: &VectorIndex,
    embedding_cfg: &EmbeddingConfig,
    retrieval_cfg: &RetrievalConfig,
    query: &str,
) -> Result<Vec<ScoredChunk>> {
    let vector_hits = index
        .search(embedding_cfg, query, retrieval_cfg.candidate_k)
        .await?;
    let keyword_hits = keyword_candidates(index.chunks(), query);

    let merged = merge(
        &vector_hits,
        &keyword_hits,
        retrieval_cfg.hybrid_alpha,
        retrieval_cfg.top_k,
    );
    debug!(
        vector = vector_hits.len(),
        keyword = keyword_hits.len(),
        merged = merged.len(),
        "hybrid retrieval"
    );
    Ok(merged)
}

/// One keyword-channel candidate: a chunk containing at least one query
/// term.
#[derive(Debug, Clone)]
pub struct KeywordHit {
    pub score: f64,
    pub meta: ChunkMeta,
}

/// Score every chunk by keyword overlap, keeping only chunks with at
/// least one matching term.
pub fn keyword_candidates(chunks: &[ChunkMeta], query: &str) -> Vec<KeywordHit> {
    let mut query_terms = tokenize(query);
    query_terms.sort();
    query_terms.dedup();
    if query_terms.is_empty() {
        return Vec::new();
    }

    chunks
        .iter()
        .filter_map(|meta| {
            let score = keyword_score(&query_terms, &meta.text);
            (score > 0.0).then(|| KeywordHit {
                score,
                meta: meta.clone(),
            })
        })
        .collect()
}

/// Count of distinct query terms present in the chunk, case-insensitive,
/// normalized by the chunk's token count so long chunks don't win on
/// bulk alone.
pub fn keyword_score(query_terms: &[String], chunk_text: &str) -> f64 {
    let chunk_tokens = tokenize(chunk_text);
    if chunk_tokens.is_empty() {
        return 0.0;
    }
    let present = query_terms
        .iter()
        .filter(|term| chunk_tokens.iter().any(|t| t == *term))
        .count();
    present as f64 / chunk_tokens.len() as f64
}

/// Min-max normalize raw scores to [0, 1]. A single candidate (or all
/// equal scores) normalizes to 1.0.
fn normalize_scores(scores: &[f64]) -> Vec<f64> {
    if scores.is_empty() {
        return Vec::new();
    }
    let s_min = scores.iter().copied().fold(f64::INFINITY, f64::min);
    let s_max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    scores
        .iter()
        .map(|s| {
            if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (s - s_min) / (s_max - s_min)
            }
        })
        .collect()
}

/// Blend the two candidate lists into one deduplicated ranking.
pub fn merge(
    vector_hits: &[VectorHit],
    keyword_hits: &[KeywordHit],
    alpha: f64,
    k: usize,
) -> Vec<ScoredChunk> {
    let vec_norm = normalize_scores(&vector_hits.iter().map(|h| h.score).collect::<Vec<_>>());
    let kw_norm = normalize_scores(&keyword_hits.iter().map(|h| h.score).collect::<Vec<_>>());

    let vec_map: HashMap<String, f64> = vector_hits
        .iter()
        .zip(&vec_norm)
        .map(|(h, s)| (h.meta.chunk_id(), *s))
        .collect();
    let kw_map: HashMap<String, f64> = keyword_hits
        .iter()
        .zip(&kw_norm)
        .map(|(h, s)| (h.meta.chunk_id(), *s))
        .collect();

    // Union of candidates, deduplicated by chunk identity.
    let mut all: HashMap<String, &ChunkMeta> = HashMap::new();
    for h in vector_hits {
        all.entry(h.meta.chunk_id()).or_insert(&h.meta);
    }
    for h in keyword_hits {
        all.entry(h.meta.chunk_id()).or_insert(&h.meta);
    }

    let mut scored: Vec<(f64, &ChunkMeta)> = all
        .into_iter()
        .map(|(chunk_id, meta)| {
            let v = vec_map.get(&chunk_id).copied().unwrap_or(0.0);
            let kw = kw_map.get(&chunk_id).copied().unwrap_or(0.0);
            ((1.0 - alpha) * kw + alpha * v, meta)
        })
        .collect();

    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.1.seq.cmp(&b.1.seq))
    });
    scored.truncate(k);

    scored
        .into_iter()
        .map(|(score, meta)| ScoredChunk {
            section: meta.section.clone(),
            text: meta.text.clone(),
            score,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(section: &str, text: &str, seq: usize) -> ChunkMeta {
        ChunkMeta {
            section: section.to_string(),
            text: text.to_string(),
            offset: 0,
            seq,
        }
    }

    #[test]
    fn test_normalize_empty() {
        assert!(normalize_scores(&[]).is_empty());
    }

    #[test]
    fn test_normalize_single_is_one() {
        assert_eq!(normalize_scores(&[5.0]), vec![1.0]);
    }

    #[test]
    fn test_normalize_range() {
        let norm = normalize_scores(&[10.0, 5.0, 0.0]);
        assert!((norm[0] - 1.0).abs() < 1e-9);
        assert!((norm[1] - 0.5).abs() < 1e-9);
        assert!((norm[2] - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_all_equal_is_one() {
        for s in normalize_scores(&[3.0, 3.0, 3.0]) {
            assert!((s - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_keyword_score_counts_distinct_terms() {
        let terms = vec!["go".to_string(), "kubernetes".to_string()];
        let score = keyword_score(&terms, "Built a Kubernetes autoscaler in Go");
        // 2 of 6 chunk tokens match.
        assert!((score - 2.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_keyword_score_case_insensitive() {
        let terms = vec!["go".to_string()];
        assert!(keyword_score(&terms, "GO and more GO") > 0.0);
    }

    #[test]
    fn test_keyword_candidates_skip_non_matching() {
        let chunks = vec![
            meta("a", "rust systems programming", 0),
            meta("b", "sourdough bread baking", 1),
        ];
        let hits = keyword_candidates(&chunks, "rust programming");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].meta.section, "a");
    }

    #[test]
    fn test_exact_keyword_match_ranks_at_least_as_high() {
        // Two chunks with identical vector scores; only one contains the
        // query keyword. With keyword weight > 0 it must rank first.
        let with_kw = meta("p1", "autoscaler written in go", 0);
        let without_kw = meta("p2", "scaling service for clusters", 1);

        let vector_hits = vec![
            VectorHit {
                score: 0.8,
                meta: without_kw.clone(),
            },
            VectorHit {
                score: 0.8,
                meta: with_kw.clone(),
            },
        ];
        let keyword_hits = keyword_candidates(&[with_kw, without_kw], "go");

        let merged = merge(&vector_hits, &keyword_hits, 0.6, 2);
        assert_eq!(merged[0].section, "p1");
        assert!(merged[0].score >= merged[1].score);
    }

    #[test]
    fn test_merge_deduplicates_by_chunk_identity() {
        let m = meta("p1", "go autoscaler", 0);
        let vector_hits = vec![VectorHit {
            score: 0.9,
            meta: m.clone(),
        }];
        let keyword_hits = keyword_candidates(std::slice::from_ref(&m), "go");

        let merged = merge(&vector_hits, &keyword_hits, 0.5, 10);
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn test_alpha_one_ignores_keyword_channel() {
        let a = meta("a", "go go go", 0);
        let b = meta("b", "unrelated text here", 1);
        let vector_hits = vec![
            VectorHit {
                score: 0.2,
                meta: a.clone(),
            },
            VectorHit {
                score: 0.9,
                meta: b.clone(),
            },
        ];
        let keyword_hits = keyword_candidates(&[a, b], "go");

        let merged = merge(&vector_hits, &keyword_hits, 1.0, 2);
        assert_eq!(merged[0].section, "b");
    }

    #[test]
    fn test_merge_truncates_to_k() {
        let chunks: Vec<ChunkMeta> = (0..10)
            .map(|i| meta(&format!("s{}", i), "go text", i))
            .collect();
        let vector_hits: Vec<VectorHit> = chunks
            .iter()
            .map(|m| VectorHit {
                score: 0.5,
                meta: m.clone(),
            })
            .collect();
        let merged = merge(&vector_hits, &[], 1.0, 3);
        assert_eq!(merged.len(), 3);
    }
}
