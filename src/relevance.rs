//! Relevance estimators for the corrective strategy.
//!
//! An estimator maps each retrieved hit to a score in `[0, 1]`. Two are
//! provided:
//!
//! | Name | Estimator | Score |
//! |------|-----------|-------|
//! | `similarity` | [`SimilarityRelevance`] | the hit's cosine similarity, clamped |
//! | `reasoning` | [`ReasonedRelevance`] | `1.0` / `0.0` from a reasoning-model verdict |
//!
//! `similarity` is the default: it is deterministic and costs no backend
//! calls.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use crate::completion::final_answer;
use crate::models::RetrievalHit;
use crate::strategy::Services;

const CONTEXT_PREVIEW_CHARS: usize = 500;

#[async_trait]
pub trait RelevanceEstimator: Send + Sync {
    fn name(&self) -> &'static str;

    /// One score in `[0, 1]` per hit, in hit order.
    async fn score(&self, services: &Services, query: &str, hits: &[RetrievalHit]) -> Vec<f32>;
}

/// Uses the similarity score the index already computed.
pub struct SimilarityRelevance;

#[async_trait]
impl RelevanceEstimator for SimilarityRelevance {
    fn name(&self) -> &'static str {
        "similarity"
    }

    async fn score(&self, _services: &Services, _query: &str, hits: &[RetrievalHit]) -> Vec<f32> {
        hits.iter().map(|h| clamp_unit(h.score)).collect()
    }
}

/// Asks the reasoning model whether each hit is relevant.
///
/// A failed call falls back to the clamped similarity for that hit.
pub struct ReasonedRelevance;

#[async_trait]
impl RelevanceEstimator for ReasonedRelevance {
    fn name(&self) -> &'static str {
        "reasoning"
    }

    async fn score(&self, services: &Services, query: &str, hits: &[RetrievalHit]) -> Vec<f32> {
        let mut scores = Vec::with_capacity(hits.len());
        for hit in hits {
            let preview: String = hit.text.chars().take(CONTEXT_PREVIEW_CHARS).collect();
            let prompt = format!(
                "Decide whether the context below is relevant to the question.\n\n\
                 Question: {}\nContext: {}\n\n\
                 Reply RELEVANT if it is highly relevant, otherwise reply IRRELEVANT.",
                query, preview
            );
            let score = match services.completer.reason(&prompt, None).await {
                Ok(verdict) => parse_verdict(&verdict),
                Err(e) => {
                    warn!(error = %e, "relevance judgment failed; using similarity");
                    clamp_unit(hit.score)
                }
            };
            scores.push(score);
        }
        scores
    }
}

fn parse_verdict(raw: &str) -> f32 {
    let verdict = final_answer(raw).to_uppercase();
    if verdict.contains("IRRELEVANT") || verdict.contains("NOT RELEVANT") {
        0.0
    } else if verdict.contains("RELEVANT") {
        1.0
    } else {
        0.0
    }
}

fn clamp_unit(score: f32) -> f32 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

/// Resolve the estimator configured as `answer.relevance`.
pub fn create_relevance(name: &str) -> Result<Arc<dyn RelevanceEstimator>> {
    match name {
        "similarity" => Ok(Arc::new(SimilarityRelevance)),
        "reasoning" => Ok(Arc::new(ReasonedRelevance)),
        other => bail!("Unknown relevance estimator: {}", other),
    }
}
