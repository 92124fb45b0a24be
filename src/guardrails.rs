//! Input/output guardrails around the model call.
//!
//! Three checks, all pattern matching rather than a policy engine:
//! - PII shapes (email, phone-like, national-id-like digit runs) are
//!   replaced with `[MASKED_*]` tokens before text reaches the model, a
//!   log line, or the user.
//! - A fixed unsafe-content denylist rejects input outright
//!   ([`CompanionError::UnsafeContent`]); on output a match replaces the
//!   whole response with a fixed refusal.
//! - A fixed-window rate limit per session identifier fails with
//!   [`CompanionError::RateLimited`] instead of queuing.
//!
//! The model may echo or fabricate sensitive-looking content, so the
//! output path re-applies the same masking and denylist checks.

use anyhow::Result;
use regex::Regex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::warn;

use crate::config::GuardrailsConfig;
use crate::error::CompanionError;

/// Response substituted when model output trips the denylist.
pub const UNSAFE_OUTPUT_REPLACEMENT: &str =
    "I cannot provide that information for safety reasons.";

const RATE_WINDOW: Duration = Duration::from_secs(60);

pub struct Guardrails {
    pii_patterns: Vec<(&'static str, Regex)>,
    unsafe_patterns: Vec<Regex>,
    denylist: Vec<&'static str>,
    pii_enabled: bool,
    max_per_minute: u32,
    /// Timestamps of allowed requests per session, pruned to the window.
    requests: HashMap<String, Vec<Instant>>,
}

impl Guardrails {
    pub fn new(config: &GuardrailsConfig) -> Self {
        let pii_patterns = vec![
            (
                "EMAIL",
                Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").expect("email"),
            ),
            // National-id-like shapes before phone, so 123-45-6789 is
            // not half-consumed by the phone pattern.
            (
                "ID",
                Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").expect("national id"),
            ),
            (
                "PHONE",
                Regex::new(r"\b\d{3}[-.]?\d{3}[-.]?\d{4}\b").expect("phone"),
            ),
        ];

        let unsafe_patterns = vec![
            Regex::new(r"(?i)\b(password|secret|private key|api key)\s*[:=]\s*\S+")
                .expect("credential"),
            Regex::new(r"(?i)<script|javascript:|data:text/html").expect("script"),
        ];

        Self {
            pii_patterns,
            unsafe_patterns,
            denylist: vec!["illegal", "violence", "harmful", "exploit", "malware"],
            pii_enabled: config.pii_detection,
            max_per_minute: config.max_requests_per_minute,
            requests: HashMap::new(),
        }
    }

    /// Validate and sanitize user input before it reaches the planner.
    /// Order: rate limit, denylist rejection, PII masking.
    pub fn check_input(&mut self, session_id: &str, input: &str) -> Result<String> {
        self.check_rate_at(session_id, Instant::now())?;

        if let Some(marker) = self.find_unsafe(input) {
            warn!(session = session_id, marker = %marker, "input rejected by denylist");
            return Err(CompanionError::UnsafeContent(marker).into());
        }

        Ok(self.mask_pii(input))
    }

    /// Sanitize a model response before display. A denylist match
    /// replaces the whole response rather than forwarding it.
    pub fn filter_output(&self, output: &str) -> String {
        if self.find_unsafe(output).is_some() {
            warn!("model output replaced by denylist match");
            return UNSAFE_OUTPUT_REPLACEMENT.to_string();
        }
        self.mask_pii(output)
    }

    /// Forget rate-limit history for a session.
    pub fn reset_session(&mut self, session_id: &str) {
        self.requests.remove(session_id);
    }

    pub fn active_sessions(&self) -> usize {
        self.requests.len()
    }

    /// Drop rate-limit state for sessions with no request inside the
    /// current window, so the per-session map cannot grow unbounded.
    pub fn prune_idle_at(&mut self, now: Instant) {
        self.requests.retain(|_, timestamps| {
            timestamps.retain(|t| now.duration_since(*t) < RATE_WINDOW);
            !timestamps.is_empty()
        });
    }

    /// Fixed-window check with an explicit clock, so the window roll is
    /// testable. Only allowed requests are recorded.
    pub fn check_rate_at(&mut self, session_id: &str, now: Instant) -> Result<()> {
        let timestamps = self.requests.entry(session_id.to_string()).or_default();
        timestamps.retain(|t| now.duration_since(*t) < RATE_WINDOW);

        if timestamps.len() >= self.max_per_minute as usize {
            return Err(CompanionError::RateLimited(self.max_per_minute).into());
        }
        timestamps.push(now);
        Ok(())
    }

    fn mask_pii(&self, text: &str) -> String {
        if !self.pii_enabled {
            return text.to_string();
        }
        let mut masked = text.to_string();
        for (label, pattern) in &self.pii_patterns {
            masked = pattern
                .replace_all(&masked, format!("[MASKED_{}]", label).as_str())
                .into_owned();
        }
        masked
    }

    fn find_unsafe(&self, text: &str) -> Option<String> {
        let lower = text.to_lowercase();
        for marker in &self.denylist {
            if lower.contains(marker) {
                return Some((*marker).to_string());
            }
        }
        for pattern in &self.unsafe_patterns {
            if pattern.is_match(text) {
                return Some("credential or injection pattern".to_string());
            }
        }
        None
    }
}
