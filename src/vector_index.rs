//! Persistent vector index.
//!
//! A [`VectorIndex`] owns every named store under one directory. Each store
//! is an [`EntryLog`] behind a `tokio::sync::RwLock`: `add`, `save` and
//! `clear` take the write half; `search` and `stats` take the read half. A
//! store is loaded from disk the first time any operation touches it.
//!
//! # Add Pipeline
//!
//! ```text
//! texts ──► embed_batch ──► l2_normalize ──► [write lock] stage ids
//!          (no lock held)                        │
//!                                   rewrite both artifacts
//!                                                │ ok
//!                                          append to log
//! ```
//!
//! Embedding runs before the lock is taken, so a slow backend never blocks
//! readers. The in-memory log only changes after both artifacts were
//! written, so a failed write leaves memory and disk in agreement.
//!
//! # Similarity
//!
//! Vectors are L2-normalized on insertion and queries are normalized before
//! searching, so the inner product computed by the exact scan equals cosine
//! similarity.

use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::artifacts;
use crate::embedding::{l2_normalize, Embedder};
use crate::entry_log::{Candidate, EntryLog, Rejection};
use crate::models::{Metadata, RetrievalHit};

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to (de)serialize {path}: {source}")]
    Serde {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("store '{store}' is corrupt: {reason}")]
    Corrupt { store: String, reason: String },
    #[error("invalid store name '{0}': use letters, digits, '-', '_' or '.'")]
    InvalidStoreName(String),
}

/// Outcome of [`VectorIndex::add`].
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct AddReport {
    /// Ids assigned to the accepted entries, in batch order.
    pub ids: Vec<u64>,
    /// Batch positions whose embedding failed or was degenerate.
    pub failed: Vec<usize>,
    /// Batch items whose dimension disagreed with the store.
    pub rejected: Vec<Rejection>,
}

impl AddReport {
    pub fn added(&self) -> usize {
        self.ids.len()
    }
}

/// Counts reported by [`VectorIndex::stats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub store_name: String,
    /// Number of fragments the store serves.
    pub document_count: usize,
    /// Number of vectors recorded in the persisted vector file.
    pub index_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimension: Option<usize>,
}

impl IndexStats {
    pub fn is_consistent(&self) -> bool {
        self.document_count == self.index_size
    }
}

#[derive(Default)]
struct StoreState {
    loaded: bool,
    log: EntryLog,
}

type StoreHandle = Arc<RwLock<StoreState>>;

pub struct VectorIndex {
    dir: PathBuf,
    embedder: Arc<dyn Embedder>,
    stores: Mutex<HashMap<String, StoreHandle>>,
}

impl VectorIndex {
    pub fn new(dir: impl Into<PathBuf>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            dir: dir.into(),
            embedder,
            stores: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Embed `texts` and append them to `store`.
    ///
    /// `metadatas[i]` belongs to `texts[i]`; missing metadata is empty.
    /// Items whose embedding fails are listed in [`AddReport::failed`] and
    /// items of the wrong dimension in [`AddReport::rejected`]. When no item
    /// survives, nothing is written. Errors are limited to an invalid store
    /// name and failures to read or write the artifacts.
    pub async fn add(
        &self,
        texts: &[String],
        metadatas: &[Metadata],
        store: &str,
    ) -> Result<AddReport, IndexError> {
        validate_store_name(store)?;
        let mut report = AddReport::default();
        if texts.is_empty() {
            return Ok(report);
        }

        let embedded = self.embedder.embed_batch(texts).await;
        let mut embedded_positions = vec![false; texts.len()];
        let mut candidates = Vec::with_capacity(embedded.len());
        for item in embedded {
            let Some(text) = texts.get(item.position) else {
                continue;
            };
            let mut vector = item.vector;
            if !l2_normalize(&mut vector) {
                continue;
            }
            embedded_positions[item.position] = true;
            candidates.push(Candidate {
                position: item.position,
                vector,
                text: text.clone(),
                metadata: metadatas.get(item.position).cloned().unwrap_or_default(),
            });
        }
        report.failed = embedded_positions
            .iter()
            .enumerate()
            .filter(|(_, ok)| !**ok)
            .map(|(i, _)| i)
            .collect();

        if candidates.is_empty() {
            warn!(store, count = texts.len(), "no fragment could be embedded; nothing added");
            return Ok(report);
        }

        let handle = self.handle(store).await;
        let mut state = handle.write().await;
        self.load_locked(store, &mut state)?;

        let (staged, rejected) = state.log.stage(candidates);
        for r in &rejected {
            error!(
                store,
                position = r.position,
                expected = r.expected,
                actual = r.actual,
                "embedding dimension mismatch; fragment rejected"
            );
        }
        report.rejected = rejected;
        if staged.is_empty() {
            return Ok(report);
        }

        artifacts::write(
            &self.dir,
            store,
            state.log.entries().iter().chain(staged.iter()),
        )?;

        report.ids = staged.iter().map(|e| e.id).collect();
        state.log.append(staged);
        info!(
            store,
            added = report.ids.len(),
            total = state.log.len(),
            "fragments indexed"
        );
        Ok(report)
    }

    /// Return up to `k` hits for `query`, best first.
    ///
    /// Never fails: an invalid or unreadable store, an empty store, or a
    /// failed query embedding all produce an empty result.
    pub async fn search(&self, query: &str, k: usize, store: &str) -> Vec<RetrievalHit> {
        if k == 0 {
            return Vec::new();
        }
        if let Err(e) = validate_store_name(store) {
            warn!(store, error = %e, "search skipped");
            return Vec::new();
        }

        let handle = self.handle(store).await;
        if let Err(e) = self.ensure_loaded(store, &handle).await {
            error!(store, error = %e, "store could not be loaded; search returns nothing");
            return Vec::new();
        }
        if handle.read().await.log.is_empty() {
            return Vec::new();
        }

        let mut vector = match self.embedder.embed(query).await {
            Ok(v) => v,
            Err(e) => {
                warn!(store, error = %e, "query embedding failed");
                return Vec::new();
            }
        };
        if !l2_normalize(&mut vector) {
            warn!(store, "query embedding is degenerate");
            return Vec::new();
        }

        let state = handle.read().await;
        let hits: Vec<RetrievalHit> = state
            .log
            .nearest(&vector, k)
            .into_iter()
            .map(|(position, score)| {
                let entry = &state.log.entries()[position];
                RetrievalHit {
                    text: entry.text.clone(),
                    score,
                    metadata: entry.metadata.clone(),
                }
            })
            .collect();
        debug!(store, k, found = hits.len(), "search complete");
        hits
    }

    /// Rewrite both artifacts from memory. An empty store writes nothing.
    pub async fn save(&self, store: &str) -> Result<(), IndexError> {
        validate_store_name(store)?;
        let handle = self.handle(store).await;
        let mut state = handle.write().await;
        self.load_locked(store, &mut state)?;
        if state.log.is_empty() {
            return Ok(());
        }
        artifacts::write(&self.dir, store, state.log.entries().iter())
    }

    /// Drop all entries of `store` and delete its artifacts.
    pub async fn clear(&self, store: &str) -> Result<(), IndexError> {
        validate_store_name(store)?;
        let handle = self.handle(store).await;
        let mut state = handle.write().await;
        artifacts::remove(&self.dir, store)?;
        state.log = EntryLog::new();
        state.loaded = true;
        info!(store, "store cleared");
        Ok(())
    }

    /// Counts for `store`.
    ///
    /// `document_count` is what the store serves from memory; `index_size` is
    /// read from the vector file header on disk. Loading rejects artifacts
    /// that disagree, so a difference means the files were damaged or
    /// replaced after load, or a corrupt store was loaded as empty.
    pub async fn stats(&self, store: &str) -> Result<IndexStats, IndexError> {
        validate_store_name(store)?;
        let handle = self.handle(store).await;
        self.ensure_loaded(store, &handle).await?;
        let state = handle.read().await;

        let index_size = match artifacts::vector_count(&self.dir, store) {
            Ok(count) => count.unwrap_or(0),
            Err(e @ IndexError::Corrupt { .. }) => {
                warn!(store, error = %e, "vector file header unreadable");
                0
            }
            Err(e) => return Err(e),
        };
        let stats = IndexStats {
            store_name: store.to_string(),
            document_count: state.log.len(),
            index_size,
            dimension: state.log.dimension(),
        };
        if !stats.is_consistent() {
            warn!(
                store,
                documents = stats.document_count,
                vectors = stats.index_size,
                "document and vector counts differ"
            );
        }
        Ok(stats)
    }

    async fn handle(&self, store: &str) -> StoreHandle {
        let mut stores = self.stores.lock().await;
        stores.entry(store.to_string()).or_default().clone()
    }

    async fn ensure_loaded(&self, store: &str, handle: &StoreHandle) -> Result<(), IndexError> {
        if handle.read().await.loaded {
            return Ok(());
        }
        let mut state = handle.write().await;
        self.load_locked(store, &mut state)
    }

    /// Load `store` into `state` unless already loaded.
    ///
    /// Corrupt artifacts leave the store empty. I/O failures are returned
    /// and the store stays unloaded so a later call can retry.
    fn load_locked(&self, store: &str, state: &mut StoreState) -> Result<(), IndexError> {
        if state.loaded {
            return Ok(());
        }

        let log = match artifacts::read(&self.dir, store) {
            Ok(None) => EntryLog::new(),
            Ok(Some(entries)) => EntryLog::from_entries(entries).unwrap_or_else(|reason| {
                error!(store, %reason, "index artifacts are inconsistent; treating store as empty");
                EntryLog::new()
            }),
            Err(e @ (IndexError::Corrupt { .. } | IndexError::Serde { .. })) => {
                error!(store, error = %e, "index artifacts are corrupt; treating store as empty");
                EntryLog::new()
            }
            Err(e) => return Err(e),
        };

        debug!(store, entries = log.len(), "store loaded");
        state.log = log;
        state.loaded = true;
        Ok(())
    }
}

/// Store names become file names, so only a conservative alphabet is allowed.
pub fn validate_store_name(store: &str) -> Result<(), IndexError> {
    let valid = !store.is_empty()
        && !store.starts_with('.')
        && store
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(IndexError::InvalidStoreName(store.to_string()))
    }
}
