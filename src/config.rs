//! TOML configuration.
//!
//! Every section is optional; missing sections and keys fall back to the
//! defaults below, so an empty file is a valid (fully offline) config with
//! both backends disabled.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub answer: AnswerConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_store")]
    pub store: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dir: default_index_dir(),
            store: default_store(),
        }
    }
}

fn default_index_dir() -> PathBuf {
    PathBuf::from("./indexes")
}
fn default_store() -> String {
    "default".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    /// Only honoured by the sliding-window fallback.
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_max_chars() -> usize {
    500
}
fn default_overlap_chars() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            base_url: None,
            batch_size: default_batch_size(),
            max_retries: default_embedding_retries(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

fn default_disabled() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    16
}
fn default_embedding_retries() -> u32 {
    2
}
fn default_embedding_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub chat_model: Option<String>,
    /// Falls back to `chat_model` when unset.
    #[serde(default)]
    pub reasoning_model: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_completion_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_reasoning_timeout")]
    pub reasoning_timeout_secs: u64,
    #[serde(default = "default_completion_retries")]
    pub max_retries: u32,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            base_url: None,
            chat_model: None,
            reasoning_model: None,
            api_key_env: default_api_key_env(),
            timeout_secs: default_completion_timeout(),
            reasoning_timeout_secs: default_reasoning_timeout(),
            max_retries: default_completion_retries(),
        }
    }
}

fn default_api_key_env() -> String {
    "DEEPSEEK_API_KEY".to_string()
}
fn default_completion_timeout() -> u64 {
    120
}
fn default_reasoning_timeout() -> u64 {
    300
}
fn default_completion_retries() -> u32 {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnswerConfig {
    #[serde(default = "default_strategy")]
    pub strategy: String,
    #[serde(default)]
    pub polish: bool,
    #[serde(default = "default_min_polish_chars")]
    pub min_polish_chars: usize,
    #[serde(default = "default_relevance")]
    pub relevance: String,
}

impl Default for AnswerConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            polish: false,
            min_polish_chars: default_min_polish_chars(),
            relevance: default_relevance(),
        }
    }
}

fn default_strategy() -> String {
    "simple".to_string()
}
fn default_min_polish_chars() -> usize {
    10
}
fn default_relevance() -> String {
    "similarity".to_string()
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
    "127.0.0.1:8000".to_string()
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

impl CompletionConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn reasoning_model(&self) -> Option<&str> {
        self.reasoning_model
            .as_deref()
            .or(self.chat_model.as_deref())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = parse_config(&content)?;
    Ok(config)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_chars == 0 {
        anyhow::bail!("chunking.max_chars must be > 0");
    }
    if config.chunking.overlap_chars >= config.chunking.max_chars {
        anyhow::bail!("chunking.overlap_chars must be smaller than chunking.max_chars");
    }
    if config.index.store.trim().is_empty() {
        anyhow::bail!("index.store must not be empty");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "ollama" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, ollama, or openai.",
            other
        ),
    }
    if config.embedding.is_enabled() && config.embedding.model.is_none() {
        anyhow::bail!(
            "embedding.model must be specified when provider is '{}'",
            config.embedding.provider
        );
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    match config.completion.provider.as_str() {
        "disabled" | "ollama" | "openai" => {}
        other => anyhow::bail!(
            "Unknown completion provider: '{}'. Must be disabled, ollama, or openai.",
            other
        ),
    }
    if config.completion.is_enabled() && config.completion.chat_model.is_none() {
        anyhow::bail!(
            "completion.chat_model must be specified when provider is '{}'",
            config.completion.provider
        );
    }

    match config.answer.relevance.as_str() {
        "similarity" | "reasoning" => {}
        other => anyhow::bail!(
            "Unknown relevance estimator: '{}'. Must be similarity or reasoning.",
            other
        ),
    }

    Ok(())
}
