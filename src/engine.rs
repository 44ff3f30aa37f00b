//! Strategy registry and the answer fallback chain.
//!
//! [`Engine::answer`] always returns a [`ChatResult`]:
//!
//! 1. the selected strategy's answer, grounded or not;
//! 2. if the strategy fails, an ungrounded `complete(query)` with the
//!    failure recorded in [`ChatResult::error`];
//! 3. if that fails too, [`SERVICE_UNAVAILABLE`].

use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::completion::create_completer;
use crate::config::Config;
use crate::embedding::create_embedder;
use crate::models::ChatResult;
use crate::relevance::{create_relevance, RelevanceEstimator, SimilarityRelevance};
use crate::strategies;
use crate::strategy::{Services, Strategy};
use crate::vector_index::VectorIndex;

/// Content returned when no backend can produce an answer.
pub const SERVICE_UNAVAILABLE: &str =
    "The answering service is currently unavailable. Please try again later.";

/// Listing entry for one strategy.
#[derive(Debug, Clone, Serialize)]
pub struct StrategyInfo {
    pub name: &'static str,
    pub alias: String,
    pub description: &'static str,
}

/// Strategy listing that needs no backends.
pub fn catalog() -> Vec<StrategyInfo> {
    describe(&strategies::all(Arc::new(SimilarityRelevance)))
}

fn describe(strategies: &[Box<dyn Strategy>]) -> Vec<StrategyInfo> {
    strategies
        .iter()
        .enumerate()
        .map(|(i, s)| StrategyInfo {
            name: s.name(),
            alias: format!("option{}", i + 1),
            description: s.description(),
        })
        .collect()
}

pub struct Engine {
    services: Services,
    strategies: Vec<Box<dyn Strategy>>,
}

impl Engine {
    pub fn new(services: Services, relevance: Arc<dyn RelevanceEstimator>) -> Self {
        Self {
            services,
            strategies: strategies::all(relevance),
        }
    }

    /// Wire the configured embedding and completion backends into an engine.
    pub fn from_config(config: &Config) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let completer = create_completer(&config.completion)?;
        let relevance = create_relevance(&config.answer.relevance)?;

        let index = Arc::new(VectorIndex::new(&config.index.dir, embedder));
        let services = Services::new(index, completer, &config.index.store)
            .with_min_polish_chars(config.answer.min_polish_chars);
        Ok(Self::new(services, relevance))
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Map a selector (`"hyde"`, `"option14"`, any case) to a strategy.
    /// Unknown selectors resolve to the direct strategy.
    pub fn resolve(&self, selector: &str) -> &dyn Strategy {
        let wanted = selector.trim().to_lowercase();
        let position = self.strategies.iter().position(|s| s.name() == wanted).or_else(|| {
            wanted
                .strip_prefix("option")
                .and_then(|n| n.parse::<usize>().ok())
                .filter(|n| (1..=self.strategies.len()).contains(n))
                .map(|n| n - 1)
        });

        match position {
            Some(i) => self.strategies[i].as_ref(),
            None => {
                debug!(selector, "unknown strategy; using direct retrieval");
                self.strategies[0].as_ref()
            }
        }
    }

    pub fn strategies(&self) -> Vec<StrategyInfo> {
        describe(&self.strategies)
    }

    /// Answer `query` with the selected strategy. Never fails.
    pub async fn answer(&self, query: &str, selector: &str, polish: bool) -> ChatResult {
        let query = query.trim();
        if query.is_empty() {
            return ChatResult::general(String::new());
        }

        let strategy = self.resolve(selector);
        info!(strategy = strategy.name(), store = %self.services.store, "answering");

        let failure = match strategy.answer(&self.services, query, polish).await {
            Ok(result) => {
                debug!(
                    strategy = strategy.name(),
                    source_type = result.source_type.as_str(),
                    sources = result.sources.len(),
                    "answered"
                );
                return result;
            }
            Err(e) => e,
        };

        warn!(strategy = strategy.name(), error = %failure, "strategy failed; answering without context");
        match self.services.completer.complete(query, None).await {
            Ok(content) => ChatResult {
                error: Some(failure.to_string()),
                ..ChatResult::general(content)
            },
            Err(e) => {
                error!(error = %e, "completion backend unavailable");
                ChatResult {
                    error: Some(format!("{}; fallback: {}", failure, e)),
                    ..ChatResult::general(SERVICE_UNAVAILABLE.to_string())
                }
            }
        }
    }
}
