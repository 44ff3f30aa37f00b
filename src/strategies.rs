//! The seventeen retrieval strategies.
//!
//! Most variants only change the candidate count or one step of the
//! baseline flow in [`Strategy`]. The ones that call the reasoning model
//! (query transformation, expansion, self-reflection, hypothetical
//! documents) degrade to the plain query or the first answer when that call
//! fails, so a broken reasoning backend never costs more than the rewrite.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::completion::final_answer;
use crate::models::{ChatResult, RetrievalHit};
use crate::relevance::RelevanceEstimator;
use crate::strategy::{merge_hits, polish_answer, Services, Strategy};

/// Hits kept for the context after a merge or truncation.
const CONTEXT_HITS: usize = 5;

/// Run a reasoning prompt and reduce it to its final answer.
async fn reason_or_none(services: &Services, strategy: &str, prompt: &str) -> Option<String> {
    match services.completer.reason(prompt, None).await {
        Ok(raw) => Some(final_answer(&raw)).filter(|s| !s.is_empty()),
        Err(e) => {
            warn!(strategy, error = %e, "reasoning call failed");
            None
        }
    }
}

// ============ Baseline-shaped ============

/// Retrieve five, generate.
pub struct Direct;

#[async_trait]
impl Strategy for Direct {
    fn name(&self) -> &'static str {
        "simple"
    }
    fn description(&self) -> &'static str {
        "Direct retrieval of the top 5 fragments"
    }
}

/// A wider net: eight candidates.
pub struct BroadRecall;

#[async_trait]
impl Strategy for BroadRecall {
    fn name(&self) -> &'static str {
        "semantic_chunking"
    }
    fn description(&self) -> &'static str {
        "Broad recall over the top 8 fragments"
    }
    fn top_k(&self) -> usize {
        8
    }
}

/// Reserved for widening each hit with its neighbouring fragments; the
/// default retrieval currently passes hits through unchanged.
pub struct ContextEnriched;

#[async_trait]
impl Strategy for ContextEnriched {
    fn name(&self) -> &'static str {
        "context_enriched"
    }
    fn description(&self) -> &'static str {
        "Context-enriched retrieval"
    }
}

/// Prefix each fragment with its source so the model can attribute claims.
pub struct HeaderedContext;

#[async_trait]
impl Strategy for HeaderedContext {
    fn name(&self) -> &'static str {
        "chunk_headers"
    }
    fn description(&self) -> &'static str {
        "Fragments headed by their source document"
    }
    fn top_k(&self) -> usize {
        6
    }

    fn build_context(&self, hits: &[RetrievalHit]) -> String {
        hits.iter()
            .map(|h| format!("[Source: {}]\n{}", h.source(), h.text))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Baseline shape; reserved for injecting supplementary documents.
pub struct DocumentAugmented;

#[async_trait]
impl Strategy for DocumentAugmented {
    fn name(&self) -> &'static str {
        "doc_augmentation"
    }
    fn description(&self) -> &'static str {
        "Document augmentation"
    }
}

/// Single-shot baseline. The returned sources and content are what a
/// caller-driven refinement round would feed back.
pub struct FeedbackLoop;

#[async_trait]
impl Strategy for FeedbackLoop {
    fn name(&self) -> &'static str {
        "feedback_loop"
    }
    fn description(&self) -> &'static str {
        "Answer with sources for caller feedback"
    }
}

/// Six candidates; stands in for summary-then-detail retrieval.
pub struct Hierarchical;

#[async_trait]
impl Strategy for Hierarchical {
    fn name(&self) -> &'static str {
        "hierarchical"
    }
    fn description(&self) -> &'static str {
        "Hierarchical retrieval over the top 6 fragments"
    }
    fn top_k(&self) -> usize {
        6
    }
}

// ============ Prompt variants ============

/// Ask the model to extract entities and relations before answering.
pub struct KnowledgeGraph;

#[async_trait]
impl Strategy for KnowledgeGraph {
    fn name(&self) -> &'static str {
        "knowledge_graph"
    }
    fn description(&self) -> &'static str {
        "Entity and relation extraction before answering"
    }
    fn top_k(&self) -> usize {
        6
    }

    async fn generate(&self, services: &Services, query: &str, context: &str) -> Result<String> {
        if context.trim().is_empty() {
            return services.completer.complete(query, None).await;
        }
        let prompt = format!(
            "Using the documents below, first list the entities they mention and the relations \
             between them, then answer the question.\n\n{}\n\nQuestion: {}",
            context, query
        );
        services.completer.complete(&prompt, None).await
    }
}

/// Tell the model to flag questions that need images or tables it cannot see.
pub struct MultiModalAware;

#[async_trait]
impl Strategy for MultiModalAware {
    fn name(&self) -> &'static str {
        "multimodal"
    }
    fn description(&self) -> &'static str {
        "Flags answers that need non-text content"
    }

    async fn generate(&self, services: &Services, query: &str, context: &str) -> Result<String> {
        if context.trim().is_empty() {
            return services.completer.complete(query, None).await;
        }
        let prompt = format!(
            "Answer the question using the document content below. If the question involves \
             images, tables or other non-text content, say so.\n\n\
             Document content:\n{}\n\nQuestion: {}\n\n\
             Note: if the original file (pictures, tables and so on) is needed, say \
             \"Consult the source document for the complete information.\"",
            context, query
        );
        services.completer.complete(&prompt, None).await
    }
}

// ============ Query rewriting ============

/// Paraphrase the query up to three times and pool the hits.
pub struct QueryTransformation;

impl QueryTransformation {
    const MAX_VARIANTS: usize = 3;
    const PER_VARIANT_K: usize = 3;

    async fn variants(&self, services: &Services, query: &str) -> Vec<String> {
        let mut variants = vec![query.to_string()];
        let prompt = format!(
            "Rewrite the following question in {} different ways, keeping its meaning. \
             Put each version on its own line.\n{}",
            Self::MAX_VARIANTS,
            query
        );
        if let Some(raw) = reason_or_none(services, self.name(), &prompt).await {
            variants.extend(parse_variants(&raw, query).into_iter().take(Self::MAX_VARIANTS));
        }
        variants
    }
}

/// One query variant per line, list markers removed. Short lines, separators,
/// preambles ending in a colon and repeats of the original are skipped.
fn parse_variants(raw: &str, original: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for line in raw.lines() {
        let line = line
            .trim()
            .trim_start_matches(|c: char| c.is_ascii_digit() || matches!(c, '.' | ')' | '-' | '*'))
            .trim();
        if line.chars().count() <= 5 || line.starts_with('=') || line.ends_with([':', '：']) {
            continue;
        }
        if line == original || out.iter().any(|v| v == line) {
            continue;
        }
        out.push(line.to_string());
    }
    out
}

#[async_trait]
impl Strategy for QueryTransformation {
    fn name(&self) -> &'static str {
        "query_transform"
    }
    fn description(&self) -> &'static str {
        "Paraphrased query variants with pooled retrieval"
    }

    async fn answer(&self, services: &Services, query: &str, polish: bool) -> Result<ChatResult> {
        let variants = self.variants(services, query).await;
        debug!(strategy = self.name(), variants = variants.len(), "query variants");

        let mut pool = Vec::new();
        for variant in &variants {
            pool.extend(self.retrieve(services, variant, Self::PER_VARIANT_K).await);
        }
        let hits = merge_hits(pool, CONTEXT_HITS);
        self.finish(services, query, &hits, polish).await
    }
}

/// Pull a large pool and keep the index's top five.
pub struct Rerank;

#[async_trait]
impl Strategy for Rerank {
    fn name(&self) -> &'static str {
        "reranker"
    }
    fn description(&self) -> &'static str {
        "Top 5 of a 20-candidate pool"
    }

    async fn answer(&self, services: &Services, query: &str, polish: bool) -> Result<ChatResult> {
        let mut hits = self.retrieve(services, query, 20).await;
        hits.truncate(CONTEXT_HITS);
        self.finish(services, query, &hits, polish).await
    }
}

/// Expand the query with related concepts, search with the expansion,
/// keep the top five.
pub struct ExpandRerank;

#[async_trait]
impl Strategy for ExpandRerank {
    fn name(&self) -> &'static str {
        "rse"
    }
    fn description(&self) -> &'static str {
        "Query expansion followed by truncation to the top 5"
    }

    async fn answer(&self, services: &Services, query: &str, polish: bool) -> Result<ChatResult> {
        let prompt = format!(
            "Expand the following question with related concepts and keywords for information \
             retrieval:\n{}",
            query
        );
        let expanded = reason_or_none(services, self.name(), &prompt)
            .await
            .unwrap_or_else(|| query.to_string());

        let mut hits = self.retrieve(services, &expanded, 10).await;
        hits.truncate(CONTEXT_HITS);
        self.finish(services, query, &hits, polish).await
    }
}

/// Search with a hypothetical answer instead of the question.
pub struct HypotheticalDocument;

#[async_trait]
impl Strategy for HypotheticalDocument {
    fn name(&self) -> &'static str {
        "hyde"
    }
    fn description(&self) -> &'static str {
        "Retrieval by hypothetical answer"
    }

    async fn answer(&self, services: &Services, query: &str, polish: bool) -> Result<ChatResult> {
        let prompt = format!(
            "Write a detailed hypothetical answer to the question below. It does not need to be \
             true; draw on common knowledge.\n\nQuestion: {}",
            query
        );
        let hypothetical = reason_or_none(services, self.name(), &prompt)
            .await
            .unwrap_or_else(|| query.to_string());

        let hits = self.retrieve(services, &hypothetical, self.top_k()).await;
        self.finish(services, query, &hits, polish).await
    }
}

/// Two retrieval passes merged into one ranked context.
pub struct Fusion;

#[async_trait]
impl Strategy for Fusion {
    fn name(&self) -> &'static str {
        "fusion"
    }
    fn description(&self) -> &'static str {
        "Fused results of two retrieval passes"
    }

    async fn answer(&self, services: &Services, query: &str, polish: bool) -> Result<ChatResult> {
        let mut pool = self.retrieve(services, query, 3).await;
        pool.extend(self.retrieve(services, query, 3).await);
        let hits = merge_hits(pool, CONTEXT_HITS);
        self.finish(services, query, &hits, polish).await
    }
}

// ============ Branching ============

/// Pick the candidate count from the kind of question.
pub struct Adaptive;

/// Markers of definition, identity, quantity and time questions.
const SIMPLE_QUESTION_MARKERS: &[&str] = &[
    "what is",
    "what's",
    "define",
    "definition of",
    "explain",
    "who is",
    "which is",
    "how many",
    "how much",
    "when",
    "什么是",
    "定义",
    "解释",
    "谁是",
    "哪个是",
    "多少",
    "什么时候",
];

/// `true` when the query looks like a short factual question.
pub fn is_simple_question(query: &str) -> bool {
    let lower = query.to_lowercase();
    SIMPLE_QUESTION_MARKERS.iter().any(|m| lower.contains(m))
}

#[async_trait]
impl Strategy for Adaptive {
    fn name(&self) -> &'static str {
        "adaptive_rag"
    }
    fn description(&self) -> &'static str {
        "3 fragments for simple questions, 8 for complex ones"
    }

    async fn answer(&self, services: &Services, query: &str, polish: bool) -> Result<ChatResult> {
        let k = if is_simple_question(query) { 3 } else { 8 };
        debug!(strategy = self.name(), k, "question classified");

        let hits = self.retrieve(services, query, k).await;
        if !hits.is_empty() {
            return self.finish(services, query, &hits, polish).await;
        }
        let hits = self.retrieve(services, query, self.top_k()).await;
        self.finish(services, query, &hits, polish).await
    }
}

/// Answer, judge the answer, and retry with a wider net when it falls short.
pub struct SelfReflective;

const IMPROVEMENT_MARKERS: &[&str] = &["NEEDS IMPROVEMENT", "需要改进"];

/// `true` when a verdict asks for another pass.
pub fn needs_improvement(verdict: &str) -> bool {
    let upper = final_answer(verdict).to_uppercase();
    IMPROVEMENT_MARKERS.iter().any(|m| upper.contains(m))
}

#[async_trait]
impl Strategy for SelfReflective {
    fn name(&self) -> &'static str {
        "self_rag"
    }
    fn description(&self) -> &'static str {
        "Self-judged answer with a wider second pass"
    }

    async fn answer(&self, services: &Services, query: &str, polish: bool) -> Result<ChatResult> {
        let hits = self.retrieve(services, query, self.top_k()).await;
        let mut result = self.finish(services, query, &hits, false).await?;

        let prompt = format!(
            "Judge whether the answer fully addresses the question.\n\n\
             Question: {}\nAnswer: {}\n\n\
             If the answer is incomplete or uncertain reply NEEDS IMPROVEMENT, otherwise reply SUFFICIENT.",
            query, result.content
        );
        let improve = match services.completer.reason(&prompt, None).await {
            Ok(verdict) => needs_improvement(&verdict),
            Err(e) => {
                warn!(strategy = self.name(), error = %e, "reflection failed; keeping first answer");
                false
            }
        };

        if improve {
            let wider = self.retrieve(services, query, 10).await;
            if !wider.is_empty() {
                debug!(strategy = self.name(), hits = wider.len(), "second pass");
                result = self.finish(services, query, &wider, false).await?;
            }
        }

        result.content = polish_answer(services, result.content, polish).await;
        Ok(result)
    }
}

/// Gate the context on estimated relevance.
///
/// A mean score below `0.5` discards the retrieval entirely; otherwise only
/// hits scoring above `0.3` reach the model.
pub struct Corrective {
    relevance: Arc<dyn RelevanceEstimator>,
}

impl Corrective {
    pub const MEAN_THRESHOLD: f32 = 0.5;
    pub const KEEP_THRESHOLD: f32 = 0.3;

    pub fn new(relevance: Arc<dyn RelevanceEstimator>) -> Self {
        Self { relevance }
    }
}

#[async_trait]
impl Strategy for Corrective {
    fn name(&self) -> &'static str {
        "crag"
    }
    fn description(&self) -> &'static str {
        "Relevance-gated context with ungrounded fallback"
    }

    async fn answer(&self, services: &Services, query: &str, polish: bool) -> Result<ChatResult> {
        let hits = self.retrieve(services, query, self.top_k()).await;
        if hits.is_empty() {
            return self.finish(services, query, &[], polish).await;
        }

        let scores = self.relevance.score(services, query, &hits).await;
        let mean = scores.iter().sum::<f32>() / scores.len().max(1) as f32;
        if scores.len() != hits.len() || mean < Self::MEAN_THRESHOLD {
            debug!(strategy = self.name(), estimator = self.relevance.name(), mean, "retrieval judged irrelevant");
            return self.finish(services, query, &[], polish).await;
        }

        let kept: Vec<RetrievalHit> = hits
            .into_iter()
            .zip(scores)
            .filter(|(_, score)| *score > Self::KEEP_THRESHOLD)
            .map(|(hit, _)| hit)
            .collect();
        self.finish(services, query, &kept, polish).await
    }
}

/// All strategies in selector order: entry `i` answers to `option{i + 1}`.
pub fn all(relevance: Arc<dyn RelevanceEstimator>) -> Vec<Box<dyn Strategy>> {
    vec![
        Box::new(Direct),
        Box::new(BroadRecall),
        Box::new(ContextEnriched),
        Box::new(HeaderedContext),
        Box::new(DocumentAugmented),
        Box::new(QueryTransformation),
        Box::new(Rerank),
        Box::new(ExpandRerank),
        Box::new(FeedbackLoop),
        Box::new(Adaptive),
        Box::new(SelfReflective),
        Box::new(KnowledgeGraph),
        Box::new(Hierarchical),
        Box::new(HypotheticalDocument),
        Box::new(Fusion),
        Box::new(Corrective::new(relevance)),
        Box::new(MultiModalAware),
    ]
}
