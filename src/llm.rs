//! Chat-completion client.
//!
//! One blocking round trip per call: the assembled message list is
//! posted to an OpenAI-style `chat/completions` endpoint with the model,
//! temperature, and timeout from config. Unreachable endpoint,
//! non-success status, or timeout all surface as
//! [`CompanionError::LlmUnavailable`]; there is no streaming and no
//! automatic retry.
//!
//! The `echo` provider answers with the retrieved-context block verbatim
//! and exists for offline runs and tests.

use anyhow::{bail, Result};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use crate::config::LlmConfig;
use crate::error::CompanionError;
use crate::models::Role;

/// First line of the retrieved-context system message; the echo backend
/// keys on it.
pub const CONTEXT_HEADER: &str = "Relevant information from your profile:";

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Send one chat round trip with the configured backend.
pub async fn chat(config: &LlmConfig, messages: &[ChatMessage]) -> Result<String> {
    match config.provider.as_str() {
        "http" => chat_http(config, messages).await,
        "echo" => Ok(chat_echo(messages)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

/// Offline backend: return the retrieved-context block, or the last user
/// turn when no context was attached.
fn chat_echo(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .find(|m| m.role == Role::System && m.content.starts_with(CONTEXT_HEADER))
        .or_else(|| messages.iter().rev().find(|m| m.role == Role::User))
        .map(|m| m.content.clone())
        .unwrap_or_default()
}

async fn chat_http(config: &LlmConfig, messages: &[ChatMessage]) -> Result<String> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;

    let body = serde_json::json!({
        "model": config.model,
        "messages": messages,
        "temperature": config.temperature,
        "max_tokens": config.max_tokens,
    });

    debug!(endpoint = %config.endpoint, model = %config.model, turns = messages.len(), "chat request");

    let response = client
        .post(&config.endpoint)
        .header("Content-Type", "application/json")
        .json(&body)
        .send()
        .await
        .map_err(|e| {
            let detail = if e.is_timeout() {
                format!("timed out after {}s", config.timeout_secs)
            } else {
                e.to_string()
            };
            CompanionError::LlmUnavailable(detail)
        })?;

    let status = response.status();
    if !status.is_success() {
        let body_text = response.text().await.unwrap_or_default();
        return Err(
            CompanionError::LlmUnavailable(format!("status {}: {}", status, body_text)).into(),
        );
    }

    let json: serde_json::Value = response
        .json()
        .await
        .map_err(|e| CompanionError::LlmUnavailable(format!("unreadable response: {}", e)))?;

    let content = json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| anyhow::anyhow!("Invalid chat response: missing choices[0].message.content"))?;

    Ok(content.trim().to_string())
}
