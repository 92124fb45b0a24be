use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub data: DataConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub guardrails: GuardrailsConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DataConfig {
    /// Directory holding the knowledge file and index artifacts.
    pub dir: PathBuf,
}

impl DataConfig {
    pub fn knowledge_path(&self) -> PathBuf {
        self.dir.join("knowledge_base.json")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_chars")]
    pub chunk_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_chars: default_chunk_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_chunk_chars() -> usize {
    400
}
fn default_overlap_chars() -> usize {
    80
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Weight of the vector channel in the hybrid blend; the keyword
    /// channel gets `1 - hybrid_alpha`.
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f64,
    /// Vector candidates considered before the hybrid merge.
    #[serde(default = "default_candidate_k")]
    pub candidate_k: usize,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            hybrid_alpha: default_hybrid_alpha(),
            candidate_k: default_candidate_k(),
            top_k: default_top_k(),
        }
    }
}

fn default_hybrid_alpha() -> f64 {
    0.6
}
fn default_candidate_k() -> usize {
    40
}
fn default_top_k() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `hash` (offline, deterministic), `ollama`, or `openai`.
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the `ollama` provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            max_retries: default_max_retries(),
            timeout_secs: default_embed_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "hash".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_embed_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// `http` for an OpenAI-style chat endpoint, `echo` for the offline
    /// backend that returns the retrieved context verbatim.
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            endpoint: default_llm_endpoint(),
            model: default_llm_model(),
            temperature: default_temperature(),
            timeout_secs: default_llm_timeout_secs(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_llm_provider() -> String {
    "http".to_string()
}
fn default_llm_endpoint() -> String {
    "http://localhost:1234/v1/chat/completions".to_string()
}
fn default_llm_model() -> String {
    "local-model".to_string()
}
fn default_temperature() -> f64 {
    0.7
}
fn default_llm_timeout_secs() -> u64 {
    300
}
fn default_max_tokens() -> u32 {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct GuardrailsConfig {
    #[serde(default = "default_max_requests_per_minute")]
    pub max_requests_per_minute: u32,
    #[serde(default = "default_true")]
    pub pii_detection: bool,
}

impl Default for GuardrailsConfig {
    fn default() -> Self {
        Self {
            max_requests_per_minute: default_max_requests_per_minute(),
            pii_detection: default_true(),
        }
    }
}

fn default_max_requests_per_minute() -> u32 {
    10
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    /// Conversation turns retained per session; oldest evicted first.
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    /// Character budget for the retrieved-context block in the prompt.
    /// Chunks past the budget are dropped, lowest-ranked first.
    #[serde(default = "default_context_budget_chars")]
    pub context_budget_chars: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_history: default_max_history(),
            context_budget_chars: default_context_budget_chars(),
        }
    }
}

fn default_max_history() -> usize {
    20
}
fn default_context_budget_chars() -> usize {
    2000
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            max_entries: default_cache_max_entries(),
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

fn default_cache_max_entries() -> usize {
    100
}
fn default_cache_ttl_secs() -> u64 {
    86_400
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7331".to_string()
}

impl Config {
    /// A minimal config rooted at `dir`, used by tests and as a fallback.
    pub fn minimal(dir: impl Into<PathBuf>) -> Self {
        Self {
            data: DataConfig { dir: dir.into() },
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
            guardrails: GuardrailsConfig::default(),
            agent: AgentConfig::default(),
            cache: CacheConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_chars == 0 {
        anyhow::bail!("chunking.chunk_chars must be > 0");
    }
    if config.chunking.overlap_chars >= config.chunking.chunk_chars {
        anyhow::bail!("chunking.overlap_chars must be < chunking.chunk_chars");
    }

    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retrieval.hybrid_alpha) {
        anyhow::bail!("retrieval.hybrid_alpha must be in [0.0, 1.0]");
    }

    match config.embedding.provider.as_str() {
        "hash" | "ollama" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be hash, ollama, or openai.",
            other
        ),
    }
    if config.embedding.provider != "hash" {
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.llm.provider.as_str() {
        "http" | "echo" => {}
        other => anyhow::bail!("Unknown llm provider: '{}'. Must be http or echo.", other),
    }

    if config.guardrails.max_requests_per_minute == 0 {
        anyhow::bail!("guardrails.max_requests_per_minute must be > 0");
    }
    if config.agent.max_history < 2 {
        anyhow::bail!("agent.max_history must be >= 2");
    }
    if config.agent.context_budget_chars == 0 {
        anyhow::bail!("agent.context_budget_chars must be > 0");
    }

    if config.cache.enabled {
        if config.cache.max_entries == 0 {
            anyhow::bail!("cache.max_entries must be > 0 when the cache is enabled");
        }
        if config.cache.ttl_secs == 0 {
            anyhow::bail!("cache.ttl_secs must be > 0 when the cache is enabled");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_is_valid() {
        let config = Config::minimal("/tmp/companion");
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk() {
        let mut config = Config::minimal("/tmp/companion");
        config.chunking.chunk_chars = 100;
        config.chunking.overlap_chars = 100;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_remote_embedding_requires_model_and_dims() {
        let mut config = Config::minimal("/tmp/companion");
        config.embedding.provider = "ollama".to_string();
        assert!(validate(&config).is_err());

        config.embedding.model = Some("nomic-embed-text".to_string());
        config.embedding.dims = Some(768);
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_enabled_cache_requires_positive_bounds() {
        let mut config = Config::minimal("/tmp/companion");
        config.cache.ttl_secs = 0;
        assert!(validate(&config).is_err());

        config.cache.ttl_secs = 60;
        config.cache.max_entries = 0;
        assert!(validate(&config).is_err());

        // Disabled cache skips the bound checks entirely.
        config.cache.enabled = false;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_unknown_llm_provider_rejected() {
        let mut config = Config::minimal("/tmp/companion");
        config.llm.provider = "grpc".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_text = r#"
            [data]
            dir = "data"

            [chunking]
            chunk_chars = 300
            overlap_chars = 60

            [retrieval]
            hybrid_alpha = 0.7
            top_k = 8

            [embedding]
            provider = "hash"

            [llm]
            provider = "echo"

            [guardrails]
            max_requests_per_minute = 5
            pii_detection = false

            [agent]
            context_budget_chars = 1500

            [cache]
            max_entries = 25
            ttl_secs = 3600

            [server]
            bind = "127.0.0.1:9000"
        "#;
        let config: Config = toml::from_str(toml_text).unwrap();
        assert_eq!(config.chunking.chunk_chars, 300);
        assert_eq!(config.retrieval.top_k, 8);
        assert!(!config.guardrails.pii_detection);
        assert_eq!(config.agent.context_budget_chars, 1500);
        assert_eq!(config.cache.max_entries, 25);
        assert_eq!(config.server.bind, "127.0.0.1:9000");
        assert!(validate(&config).is_ok());
    }
}
