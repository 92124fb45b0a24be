//! In-memory response cache for the ask pipeline.
//!
//! Repeated questions against an unchanged knowledge base produce the
//! same retrieval and the same answer, so a full model round trip is
//! wasted work. Entries are keyed on a hash of the normalized question
//! plus the index's content stamp, which makes every cached answer
//! self-invalidating: the moment the knowledge base changes, the stamp
//! changes and old entries simply stop matching.
//!
//! Entries expire after a configured TTL and the map is capped at a
//! configured size, oldest entries evicted first. Not every exchange is
//! cached: questions that are too short, too long, or anchored to the
//! present moment ("today", "right now") are skipped, as are trivially
//! short answers and guardrail refusals.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::agent::Plan;
use crate::config::CacheConfig;
use crate::guardrails::UNSAFE_OUTPUT_REPLACEMENT;
use crate::models::ScoredChunk;

/// Filler lead-ins stripped during normalization so phrasing variants
/// of the same question share a cache key.
const FILLER_PREFIXES: &[&str] = &["can you ", "could you ", "would you ", "please "];

/// Questions anchored to the present are never cached.
const RECENCY_MARKERS: &[&str] = &["today", "right now", "this moment", "latest"];

const MIN_QUESTION_CHARS: usize = 10;
const MAX_QUESTION_CHARS: usize = 500;
const MIN_ANSWER_CHARS: usize = 20;

struct CacheEntry {
    answer: String,
    plan: Plan,
    context: Vec<ScoredChunk>,
    created: Instant,
    hits: u64,
}

/// A cache hit, cloned out so the caller owns it.
pub struct CachedAnswer {
    pub answer: String,
    pub plan: Plan,
    pub context: Vec<ScoredChunk>,
}

#[derive(Debug, serde::Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_hits: u64,
}

pub struct ResponseCache {
    entries: HashMap<String, CacheEntry>,
    enabled: bool,
    max_entries: usize,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: HashMap::new(),
            enabled: config.enabled,
            max_entries: config.max_entries,
            ttl: Duration::from_secs(config.ttl_secs),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            total_hits: self.entries.values().map(|e| e.hits).sum(),
        }
    }

    /// Look up a previously cached answer for this question against the
    /// knowledge state identified by `stamp`.
    pub fn get(&mut self, question: &str, stamp: &str) -> Option<CachedAnswer> {
        self.get_at(question, stamp, Instant::now())
    }

    /// Record an exchange for reuse. Skipped entirely for uncacheable
    /// questions and answers.
    pub fn put(
        &mut self,
        question: &str,
        stamp: &str,
        answer: &str,
        plan: Plan,
        context: &[ScoredChunk],
    ) {
        self.put_at(question, stamp, answer, plan, context, Instant::now());
    }

    /// [`get`](Self::get) with an explicit clock, so TTL expiry is
    /// testable without sleeping.
    pub fn get_at(&mut self, question: &str, stamp: &str, now: Instant) -> Option<CachedAnswer> {
        if !self.enabled || !cacheable_question(question) {
            return None;
        }
        let key = cache_key(question, stamp);

        if let Some(entry) = self.entries.get(&key) {
            if now.duration_since(entry.created) >= self.ttl {
                self.entries.remove(&key);
                return None;
            }
        }

        let entry = self.entries.get_mut(&key)?;
        entry.hits += 1;
        debug!(hits = entry.hits, "response cache hit");
        Some(CachedAnswer {
            answer: entry.answer.clone(),
            plan: entry.plan,
            context: entry.context.clone(),
        })
    }

    /// [`put`](Self::put) with an explicit clock.
    pub fn put_at(
        &mut self,
        question: &str,
        stamp: &str,
        answer: &str,
        plan: Plan,
        context: &[ScoredChunk],
        now: Instant,
    ) {
        if !self.enabled || !cacheable_question(question) || !cacheable_answer(answer) {
            return;
        }

        let key = cache_key(question, stamp);
        self.entries.insert(
            key,
            CacheEntry {
                answer: answer.to_string(),
                plan,
                context: context.to_vec(),
                created: now,
                hits: 0,
            },
        );
        self.cleanup(now);
    }

    /// Drop expired entries, then oldest entries while over the cap.
    fn cleanup(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.entries
            .retain(|_, e| now.duration_since(e.created) < ttl);

        if self.entries.len() > self.max_entries {
            let mut by_age: Vec<(String, Instant)> = self
                .entries
                .iter()
                .map(|(k, e)| (k.clone(), e.created))
                .collect();
            by_age.sort_by_key(|(_, created)| *created);
            let excess = self.entries.len() - self.max_entries;
            for (key, _) in by_age.into_iter().take(excess) {
                self.entries.remove(&key);
            }
        }
    }
}

fn cache_key(question: &str, stamp: &str) -> String {
    let digest = Sha256::digest(format!("{}:{}", normalize(question), stamp).as_bytes());
    format!("{:x}", digest)[..16].to_string()
}

/// Lowercase, strip filler lead-ins and punctuation, collapse
/// whitespace.
fn normalize(question: &str) -> String {
    let mut text = question.trim().to_lowercase();
    for prefix in FILLER_PREFIXES {
        if let Some(rest) = text.strip_prefix(prefix) {
            text = rest.to_string();
        }
    }
    text.chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn cacheable_question(question: &str) -> bool {
    let len = question.trim().chars().count();
    if !(MIN_QUESTION_CHARS..=MAX_QUESTION_CHARS).contains(&len) {
        return false;
    }
    let lower = question.to_lowercase();
    !RECENCY_MARKERS.iter().any(|m| lower.contains(m))
}

fn cacheable_answer(answer: &str) -> bool {
    answer.trim().chars().count() >= MIN_ANSWER_CHARS && answer != UNSAFE_OUTPUT_REPLACEMENT
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> ResponseCache {
        ResponseCache::new(&CacheConfig::default())
    }

    const STAMP: &str = "abc123";
    const ANSWER: &str = "You built a Kubernetes autoscaler in Go.";

    #[test]
    fn test_put_then_get_round_trips() {
        let mut c = cache();
        c.put("What Go projects have I worked on?", STAMP, ANSWER, Plan::SingleStep, &[]);
        let hit = c.get("What Go projects have I worked on?", STAMP).unwrap();
        assert_eq!(hit.answer, ANSWER);
        assert_eq!(hit.plan, Plan::SingleStep);
        assert_eq!(c.stats().total_hits, 1);
    }

    #[test]
    fn test_phrasing_variants_share_a_key() {
        let mut c = cache();
        c.put("What Go projects have I worked on?", STAMP, ANSWER, Plan::SingleStep, &[]);
        assert!(c.get("can you what go projects have i worked on", STAMP).is_some());
    }

    #[test]
    fn test_stamp_change_invalidates() {
        let mut c = cache();
        c.put("What Go projects have I worked on?", STAMP, ANSWER, Plan::SingleStep, &[]);
        assert!(c.get("What Go projects have I worked on?", "different").is_none());
    }

    #[test]
    fn test_entries_expire_after_ttl() {
        let mut c = ResponseCache::new(&CacheConfig {
            ttl_secs: 60,
            ..Default::default()
        });
        let start = Instant::now();
        c.put_at("What Go projects have I worked on?", STAMP, ANSWER, Plan::SingleStep, &[], start);

        assert!(c
            .get_at("What Go projects have I worked on?", STAMP, start + Duration::from_secs(59))
            .is_some());
        assert!(c
            .get_at("What Go projects have I worked on?", STAMP, start + Duration::from_secs(61))
            .is_none());
        assert!(c.is_empty());
    }

    #[test]
    fn test_size_cap_evicts_oldest_first() {
        let mut c = ResponseCache::new(&CacheConfig {
            max_entries: 2,
            ..Default::default()
        });
        let start = Instant::now();
        c.put_at("first question about projects", STAMP, ANSWER, Plan::SingleStep, &[], start);
        c.put_at(
            "second question about skills",
            STAMP,
            ANSWER,
            Plan::SingleStep,
            &[],
            start + Duration::from_secs(1),
        );
        c.put_at(
            "third question about activities",
            STAMP,
            ANSWER,
            Plan::SingleStep,
            &[],
            start + Duration::from_secs(2),
        );

        assert_eq!(c.len(), 2);
        let now = start + Duration::from_secs(3);
        assert!(c.get_at("first question about projects", STAMP, now).is_none());
        assert!(c.get_at("second question about skills", STAMP, now).is_some());
        assert!(c.get_at("third question about activities", STAMP, now).is_some());
    }

    #[test]
    fn test_recency_questions_not_cached() {
        let mut c = cache();
        c.put("what am I working on right now", STAMP, ANSWER, Plan::SingleStep, &[]);
        assert!(c.is_empty());
    }

    #[test]
    fn test_extreme_lengths_not_cached() {
        let mut c = cache();
        c.put("short?", STAMP, ANSWER, Plan::SingleStep, &[]);
        let long = "x".repeat(600);
        c.put(&long, STAMP, ANSWER, Plan::SingleStep, &[]);
        assert!(c.is_empty());
    }

    #[test]
    fn test_refusals_and_trivial_answers_not_cached() {
        let mut c = cache();
        c.put("What Go projects have I worked on?", STAMP, UNSAFE_OUTPUT_REPLACEMENT, Plan::SingleStep, &[]);
        c.put("What Go projects have I worked on?", STAMP, "ok", Plan::SingleStep, &[]);
        assert!(c.is_empty());
    }

    #[test]
    fn test_disabled_cache_stores_nothing() {
        let mut c = ResponseCache::new(&CacheConfig {
            enabled: false,
            ..Default::default()
        });
        c.put("What Go projects have I worked on?", STAMP, ANSWER, Plan::SingleStep, &[]);
        assert!(c.is_empty());
        assert!(c.get("What Go projects have I worked on?", STAMP).is_none());
    }
}
