//! Embedding Port and its adapters.
//!
//! Defines the [`Embedder`] trait and concrete implementations:
//! - **[`DisabledEmbedder`]**: always fails; used when embeddings are not configured.
//! - **[`OllamaEmbedder`]**: calls a local Ollama server, one text per request.
//! - **[`OpenAiEmbedder`]**: calls an OpenAI-compatible `/v1/embeddings` endpoint in batches.
//!
//! Also provides the vector utilities the index relies on:
//! - [`l2_normalize`]: scale a vector to unit length in place
//! - [`dot`] / [`cosine_similarity`]: similarity between vectors
//! - [`vec_to_blob`] / [`blob_to_vec`]: little-endian `f32` encoding
//!
//! # Provider Selection
//!
//! ```rust
//! # use rag_harness::config::EmbeddingConfig;
//! # use rag_harness::embedding::create_embedder;
//! let config = EmbeddingConfig::default(); // provider = "disabled"
//! let embedder = create_embedder(&config).unwrap();
//! assert_eq!(embedder.model_name(), "disabled");
//! ```

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::config::EmbeddingConfig;
use crate::http::{join_url, JsonClient};

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const DEFAULT_OPENAI_URL: &str = "https://api.openai.com";

/// A successfully embedded batch item, tagged with its input position.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedded {
    pub position: usize,
    pub vector: Vec<f32>,
}

/// Converts text into fixed-length vectors.
///
/// `embed_batch` may return fewer items than it was given: failed items are
/// omitted, and each returned vector says which input it belongs to.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"qwen3-embedding:8b"`).
    fn model_name(&self) -> &str;

    /// Embed one text. An empty vector counts as a failure.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed many texts, omitting the ones that fail.
    async fn embed_batch(&self, texts: &[String]) -> Vec<Embedded> {
        let mut out = Vec::with_capacity(texts.len());
        for (position, text) in texts.iter().enumerate() {
            match self.embed(text).await {
                Ok(vector) if !vector.is_empty() => out.push(Embedded { position, vector }),
                Ok(_) => warn!(position, "embedding backend returned an empty vector"),
                Err(e) => warn!(position, error = %e, "embedding failed"),
            }
        }
        out
    }
}

// ============ Disabled ============

/// An embedder that always fails.
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        bail!("Embedding provider is disabled")
    }
}

// ============ Ollama ============

/// Embedder backed by Ollama's `POST /api/embeddings`.
pub struct OllamaEmbedder {
    model: String,
    base_url: String,
    client: JsonClient,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
        let client = JsonClient::new(Duration::from_secs(config.timeout_secs), config.max_retries)?;
        Ok(Self {
            model,
            base_url,
            client,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": text,
        });
        let json = self
            .client
            .post(&join_url(&self.base_url, "/api/embeddings"), None, &body)
            .await?;

        let vector = parse_vector(json.get("embedding"))
            .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embedding"))?;
        if vector.is_empty() {
            bail!("Ollama returned an empty embedding");
        }
        Ok(vector)
    }
}

// ============ OpenAI ============

/// Embedder backed by an OpenAI-compatible `POST /v1/embeddings`.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAiEmbedder {
    model: String,
    base_url: String,
    api_key: String,
    batch_size: usize,
    client: JsonClient,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string());
        let client = JsonClient::new(Duration::from_secs(config.timeout_secs), config.max_retries)?;
        Ok(Self {
            model,
            base_url,
            api_key,
            batch_size: config.batch_size.max(1),
            client,
        })
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<(usize, Vec<f32>)>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = self
            .client
            .post(
                &join_url(&self.base_url, "/v1/embeddings"),
                Some(&self.api_key),
                &body,
            )
            .await?;
        parse_openai_response(&json)
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.request(&[text.to_string()])
            .await?
            .into_iter()
            .find(|(index, v)| *index == 0 && !v.is_empty())
            .map(|(_, v)| v)
            .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Vec<Embedded> {
        let mut out = Vec::with_capacity(texts.len());
        for (batch_no, batch) in texts.chunks(self.batch_size).enumerate() {
            let offset = batch_no * self.batch_size;
            match self.request(batch).await {
                Ok(vectors) => out.extend(place_batch(vectors, offset, batch.len())),
                Err(e) => {
                    warn!(offset, size = batch.len(), error = %e, "embedding batch failed");
                }
            }
        }
        out
    }
}

/// Map `(index, vector)` pairs of one batch back to positions in the whole
/// input. Indices outside the batch and empty vectors are dropped.
fn place_batch(vectors: Vec<(usize, Vec<f32>)>, offset: usize, len: usize) -> Vec<Embedded> {
    vectors
        .into_iter()
        .filter(|(index, vector)| {
            if *index >= len {
                warn!(index = *index, batch = len, "embedding index outside the batch; dropped");
                return false;
            }
            !vector.is_empty()
        })
        .map(|(index, vector)| Embedded {
            position: offset + index,
            vector,
        })
        .collect()
}

/// Parse the OpenAI embeddings response into `(index, vector)` pairs sorted
/// by `index`. The backend may omit inputs, so the index is kept.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<(usize, Vec<f32>)>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (fallback, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(fallback);
        let vector = parse_vector(item.get("embedding"))
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;
        indexed.push((index, vector));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed)
}

fn parse_vector(value: Option<&serde_json::Value>) -> Option<Vec<f32>> {
    let array = value?.as_array()?;
    Some(
        array
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect(),
    )
}

/// Create the configured [`Embedder`].
///
/// | Config Value | Embedder |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledEmbedder`] |
/// | `"ollama"` | [`OllamaEmbedder`] |
/// | `"openai"` | [`OpenAiEmbedder`] |
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        "openai" => Ok(Arc::new(OpenAiEmbedder::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Scale `v` to unit length in place.
///
/// Returns `false` (leaving `v` untouched) for zero or non-finite vectors,
/// which cannot be normalized.
pub fn l2_normalize(v: &mut [f32]) -> bool {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if !norm.is_finite() || norm < f32::EPSILON {
        return false;
    }
    for x in v.iter_mut() {
        *x /= norm;
    }
    true
}

/// Inner product of two equal-length vectors.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors or
/// vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Encode a float vector as little-endian `f32` bytes.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode little-endian `f32` bytes. Trailing partial values are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
