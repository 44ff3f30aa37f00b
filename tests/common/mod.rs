//! Deterministic backends shared by the integration tests.

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use rag_harness::completion::Completer;
use rag_harness::embedding::Embedder;
use rag_harness::models::Metadata;
use rag_harness::strategy::Services;
use rag_harness::vector_index::VectorIndex;

/// Bag-of-words embedder: every lowercase alphanumeric token adds 1.0 to
/// bucket `fnv1a(token) % dim`. Text without tokens fails to embed, as does
/// any text containing `#fail`.
pub struct HashEmbedder {
    pub dim: usize,
}

impl HashEmbedder {
    pub fn new() -> Self {
        Self { dim: 256 }
    }
}

fn fnv1a(token: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in token.bytes() {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash-bow"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.contains("#fail") {
            bail!("scripted embedding failure");
        }
        let mut v = vec![0.0f32; self.dim];
        let lower = text.to_lowercase();
        let mut tokens = 0;
        for token in lower.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()) {
            v[(fnv1a(token) % self.dim as u64) as usize] += 1.0;
            tokens += 1;
        }
        if tokens == 0 {
            bail!("nothing to embed");
        }
        Ok(v)
    }
}

/// Produces 3-dimensional vectors for texts starting with `short:` and
/// 4-dimensional ones otherwise.
pub struct SwitchingEmbedder;

#[async_trait]
impl Embedder for SwitchingEmbedder {
    fn model_name(&self) -> &str {
        "switching"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let seed = text.len() as f32;
        if text.starts_with("short:") {
            Ok(vec![1.0, seed, 0.5])
        } else {
            Ok(vec![1.0, seed, 0.5, 2.0])
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Complete {
        prompt: String,
        context: Option<String>,
    },
    Reason {
        prompt: String,
    },
    Polish {
        text: String,
    },
}

/// Completer with scripted replies that records every call.
///
/// `complete` answers `"answer to: <prompt>"`. `reason` and `polish` return
/// their scripted reply, or fail when it is `None`.
pub struct ScriptedCompleter {
    pub reason_reply: Option<String>,
    pub polish_reply: Option<String>,
    /// Fail `complete` calls that carry a context.
    pub fail_grounded: bool,
    /// Fail every `complete` call.
    pub fail_all: bool,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedCompleter {
    pub fn new() -> Self {
        Self {
            reason_reply: Some("SUFFICIENT".to_string()),
            polish_reply: None,
            fail_grounded: false,
            fail_all: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn reasoning(mut self, reply: Option<&str>) -> Self {
        self.reason_reply = reply.map(str::to_string);
        self
    }

    pub fn polishing(mut self, reply: Option<&str>) -> Self {
        self.polish_reply = reply.map(str::to_string);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Contexts passed to `complete`, in call order.
    pub fn contexts(&self) -> Vec<Option<String>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Complete { context, .. } => Some(context),
                _ => None,
            })
            .collect()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Complete { prompt, .. } => Some(prompt),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }
}

#[async_trait]
impl Completer for ScriptedCompleter {
    async fn complete(&self, prompt: &str, context: Option<&str>) -> Result<String> {
        self.calls.lock().unwrap().push(Call::Complete {
            prompt: prompt.to_string(),
            context: context.map(str::to_string),
        });
        if self.fail_all || (self.fail_grounded && context.is_some()) {
            bail!("scripted completion failure");
        }
        Ok(format!("answer to: {}", prompt))
    }

    async fn reason(&self, prompt: &str, _context: Option<&str>) -> Result<String> {
        self.calls.lock().unwrap().push(Call::Reason {
            prompt: prompt.to_string(),
        });
        match &self.reason_reply {
            Some(reply) => Ok(reply.clone()),
            None => bail!("scripted reasoning failure"),
        }
    }

    async fn polish(&self, text: &str) -> Result<String> {
        self.calls.lock().unwrap().push(Call::Polish {
            text: text.to_string(),
        });
        match &self.polish_reply {
            Some(reply) => Ok(reply.clone()),
            None => bail!("scripted polish failure"),
        }
    }
}

pub const CAPITALS: &[(&str, &str)] = &[
    ("Paris is the capital of France.", "a.txt"),
    ("Rome is the capital of Italy.", "b.txt"),
];

pub const MIXED: &[(&str, &str)] = &[
    ("Paris is the capital of France.", "a.txt"),
    ("Rome is the capital of Italy.", "b.txt"),
    ("Berlin is the capital of Germany.", "c.txt"),
    ("Bananas are rich in potassium.", "fruit.md"),
    ("The Rust borrow checker enforces ownership.", "rust.md"),
    ("Tokio is an async runtime for Rust.", "rust.md"),
    ("Photosynthesis converts light into chemical energy.", "bio.txt"),
];

pub fn metadata(source: &str) -> Metadata {
    let mut meta = Metadata::new();
    meta.insert("source".to_string(), source.into());
    meta
}

pub async fn seed(index: &VectorIndex, store: &str, docs: &[(&str, &str)]) {
    let texts: Vec<String> = docs.iter().map(|(t, _)| t.to_string()).collect();
    let metas: Vec<Metadata> = docs.iter().map(|(_, s)| metadata(s)).collect();
    let report = index.add(&texts, &metas, store).await.unwrap();
    assert_eq!(report.added(), docs.len());
}

pub fn services(
    dir: &std::path::Path,
    completer: Arc<ScriptedCompleter>,
) -> (Arc<VectorIndex>, Services) {
    let index = Arc::new(VectorIndex::new(dir, Arc::new(HashEmbedder::new())));
    let services = Services::new(index.clone(), completer, "default");
    (index, services)
}
