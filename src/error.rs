//! Typed error kinds surfaced at the pipeline boundaries.
//!
//! Most internal code uses `anyhow::Result`; these variants exist so the
//! HTTP layer and CLI can map specific failures to specific status codes
//! and user-visible messages instead of matching on message text.

use thiserror::Error;

/// Fixed message shown when the model endpoint cannot be reached.
/// The agent never retries and never returns a partial answer.
pub const LLM_FAILURE_MESSAGE: &str =
    "Sorry, I could not reach the language model. Please check that it is running and try again.";

#[derive(Debug, Error)]
pub enum CompanionError {
    /// A form field was missing or malformed.
    #[error("validation error: {0}")]
    Validation(String),

    /// Search was called before any successful index rebuild.
    #[error("the vector index is empty; rebuild it first")]
    EmptyIndex,

    /// The per-session request budget for the current window is spent.
    #[error("rate limit exceeded: at most {0} requests per minute")]
    RateLimited(u32),

    /// Input or output matched the unsafe-content denylist.
    #[error("unsafe content rejected: {0}")]
    UnsafeContent(String),

    /// The chat endpoint was unreachable, returned a non-success
    /// status, or timed out.
    #[error("LLM endpoint unavailable: {0}")]
    LlmUnavailable(String),
}

impl CompanionError {
    /// Machine-readable code used in JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            CompanionError::Validation(_) => "validation_error",
            CompanionError::EmptyIndex => "empty_index",
            CompanionError::RateLimited(_) => "rate_limited",
            CompanionError::UnsafeContent(_) => "unsafe_content",
            CompanionError::LlmUnavailable(_) => "llm_unavailable",
        }
    }
}
