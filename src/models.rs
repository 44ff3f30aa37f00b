//! Core data models shared by the index, the strategies, and the API.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Key/value metadata stored next to every fragment.
///
/// Values are JSON so that upstream producers can attach numbers and
/// nested data; only `source` has a meaning to the core.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Metadata key naming the document a fragment came from.
pub const SOURCE_KEY: &str = "source";

/// Placeholder source identifier for fragments without a `source` key.
pub const UNKNOWN_SOURCE: &str = "unknown";

/// A retrievable unit of document text produced by the chunker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub text: String,
    pub source: String,
    /// Position of this fragment within its source document.
    pub index: usize,
}

impl Fragment {
    pub fn new(text: impl Into<String>, source: impl Into<String>, index: usize) -> Self {
        Self {
            text: text.into(),
            source: source.into(),
            index,
        }
    }

    /// Metadata recorded in the index for this fragment.
    pub fn metadata(&self) -> Metadata {
        let mut meta = Metadata::new();
        meta.insert(SOURCE_KEY.to_string(), self.source.clone().into());
        meta.insert("chunk".to_string(), self.index.into());
        meta
    }
}

/// One row of a retrieval result: fragment text, cosine similarity, metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalHit {
    pub text: String,
    pub score: f32,
    pub metadata: Metadata,
}

impl RetrievalHit {
    /// Source document identifier, or [`UNKNOWN_SOURCE`].
    pub fn source(&self) -> &str {
        self.metadata
            .get(SOURCE_KEY)
            .and_then(|v| v.as_str())
            .unwrap_or(UNKNOWN_SOURCE)
    }
}

/// Whether an answer was grounded in retrieved fragments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Local,
    General,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Local => "local",
            SourceType::General => "general",
        }
    }
}

/// The answer returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResult {
    pub content: String,
    /// De-duplicated source identifiers in first-seen order.
    pub sources: Vec<String>,
    pub source_type: SourceType,
    /// Backend failure detail when the answer came from a fallback path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChatResult {
    pub fn local(content: String, sources: Vec<String>) -> Self {
        Self {
            content,
            sources,
            source_type: SourceType::Local,
            error: None,
        }
    }

    pub fn general(content: String) -> Self {
        Self {
            content,
            sources: Vec::new(),
            source_type: SourceType::General,
            error: None,
        }
    }
}

/// Collect source identifiers from hits, each at most once, in first-seen order.
pub fn unique_sources(hits: &[RetrievalHit]) -> Vec<String> {
    let mut sources: Vec<String> = Vec::new();
    for hit in hits {
        let source = hit.source();
        if !sources.iter().any(|s| s == source) {
            sources.push(source.to_string());
        }
    }
    sources
}
