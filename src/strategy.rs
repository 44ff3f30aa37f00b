//! The shared strategy contract.
//!
//! Every retrieval strategy implements [`Strategy`]. The trait carries the
//! baseline flow as default methods, so a variant only overrides the step
//! it changes:
//!
//! ```text
//! answer ──► retrieve(query, top_k) ──► finish
//!                                        ├─ no hits ─► generate(query, "")     ─► general
//!                                        └─ hits ────► build_context
//!                                                      generate(query, ctx)    ─► local
//! ```
//!
//! Strategies hold no per-request state. Everything a call needs comes in
//! through [`Services`].

use anyhow::Result;
use async_trait::async_trait;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::warn;

use crate::completion::Completer;
use crate::models::{unique_sources, ChatResult, RetrievalHit};
use crate::vector_index::VectorIndex;

/// Collaborators shared by every strategy.
#[derive(Clone)]
pub struct Services {
    pub index: Arc<VectorIndex>,
    pub completer: Arc<dyn Completer>,
    /// Store that retrieval searches.
    pub store: String,
    /// A polished answer shorter than this is discarded.
    pub min_polish_chars: usize,
}

impl Services {
    pub fn new(index: Arc<VectorIndex>, completer: Arc<dyn Completer>, store: impl Into<String>) -> Self {
        Self {
            index,
            completer,
            store: store.into(),
            min_polish_chars: 10,
        }
    }

    pub fn with_min_polish_chars(mut self, chars: usize) -> Self {
        self.min_polish_chars = chars;
        self
    }
}

#[async_trait]
pub trait Strategy: Send + Sync {
    /// Canonical identifier, e.g. `"simple"`.
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Candidate count used by the baseline flow.
    fn top_k(&self) -> usize {
        5
    }

    async fn retrieve(&self, services: &Services, query: &str, k: usize) -> Vec<RetrievalHit> {
        services.index.search(query, k, &services.store).await
    }

    /// Turn retrieved hits into the context string handed to [`Strategy::generate`].
    fn build_context(&self, hits: &[RetrievalHit]) -> String {
        join_context(hits)
    }

    /// Generate an answer. An empty `context` asks for an ungrounded answer.
    async fn generate(&self, services: &Services, query: &str, context: &str) -> Result<String> {
        let context = Some(context).filter(|c| !c.trim().is_empty());
        services.completer.complete(query, context).await
    }

    async fn answer(&self, services: &Services, query: &str, polish: bool) -> Result<ChatResult> {
        let hits = self.retrieve(services, query, self.top_k()).await;
        self.finish(services, query, &hits, polish).await
    }

    /// Generate from already retrieved hits: grounded when there are any,
    /// ungrounded otherwise.
    async fn finish(
        &self,
        services: &Services,
        query: &str,
        hits: &[RetrievalHit],
        polish: bool,
    ) -> Result<ChatResult> {
        if hits.is_empty() {
            let content = self.generate(services, query, "").await?;
            return Ok(ChatResult::general(polish_answer(services, content, polish).await));
        }

        let context = self.build_context(hits);
        let content = self.generate(services, query, &context).await?;
        Ok(ChatResult::local(
            polish_answer(services, content, polish).await,
            unique_sources(hits),
        ))
    }
}

/// Fragment texts separated by blank lines.
pub fn join_context(hits: &[RetrievalHit]) -> String {
    hits.iter()
        .map(|h| h.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Merge hits from several retrieval passes.
///
/// Duplicate fragment texts collapse to their best-scoring occurrence; the
/// result is sorted by score (descending, stable for ties) and cut to `limit`.
pub fn merge_hits(passes: Vec<RetrievalHit>, limit: usize) -> Vec<RetrievalHit> {
    let mut merged: Vec<RetrievalHit> = Vec::with_capacity(passes.len());
    for hit in passes {
        match merged.iter_mut().find(|m| m.text == hit.text) {
            Some(existing) if hit.score > existing.score => *existing = hit,
            Some(_) => {}
            None => merged.push(hit),
        }
    }
    merged.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    merged.truncate(limit);
    merged
}

/// Optionally run the polish pass.
///
/// The original text is kept when polishing is off, when the text itself is
/// shorter than the threshold, when the polish call fails, or when the
/// polished result is shorter than the threshold.
pub async fn polish_answer(services: &Services, text: String, polish: bool) -> String {
    if !polish || text.trim().chars().count() < services.min_polish_chars {
        return text;
    }

    match services.completer.polish(&text).await {
        Ok(polished) if polished.trim().chars().count() >= services.min_polish_chars => polished,
        Ok(_) => {
            warn!("polished answer too short; keeping original");
            text
        }
        Err(e) => {
            warn!(error = %e, "polish failed; keeping original");
            text
        }
    }
}
