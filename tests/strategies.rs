mod common;

use async_trait::async_trait;
use std::sync::Arc;
use tempfile::TempDir;

use common::{seed, services, Call, ScriptedCompleter, CAPITALS, MIXED};
use rag_harness::engine::{catalog, Engine, SERVICE_UNAVAILABLE};
use rag_harness::models::{RetrievalHit, SourceType};
use rag_harness::relevance::{RelevanceEstimator, SimilarityRelevance};
use rag_harness::strategies::{
    Adaptive, BroadRecall, Corrective, Direct, ExpandRerank, Fusion, HeaderedContext, Hierarchical,
    HypotheticalDocument, KnowledgeGraph, MultiModalAware, QueryTransformation, Rerank,
    SelfReflective,
};
use rag_harness::strategy::{Services, Strategy};

/// Returns a fixed score list, cut to the number of hits.
struct FixedRelevance(Vec<f32>);

#[async_trait]
impl RelevanceEstimator for FixedRelevance {
    fn name(&self) -> &'static str {
        "fixed"
    }

    async fn score(&self, _services: &Services, _query: &str, hits: &[RetrievalHit]) -> Vec<f32> {
        self.0.iter().copied().take(hits.len()).collect()
    }
}

/// `MIXED` plus three more documents, enough to tell k=5, 6 and 8 apart.
fn wide_fixture() -> Vec<(&'static str, &'static str)> {
    let mut docs = MIXED.to_vec();
    docs.extend([
        ("Madrid is the capital of Spain.", "d.txt"),
        ("Apples grow on trees in orchards.", "fruit.md"),
        ("Mitochondria produce cellular energy.", "bio.txt"),
    ]);
    docs
}

fn fragments_in(context: &str) -> Vec<&str> {
    context.split("\n\n").filter(|s| !s.is_empty()).collect()
}

async fn seeded(docs: &[(&str, &str)], completer: ScriptedCompleter) -> (TempDir, Services, Arc<ScriptedCompleter>) {
    let tmp = TempDir::new().unwrap();
    let completer = Arc::new(completer);
    let (index, services) = services(tmp.path(), completer.clone());
    seed(&index, "default", docs).await;
    (tmp, services, completer)
}

#[tokio::test]
async fn every_strategy_falls_back_on_an_empty_index() {
    let tmp = TempDir::new().unwrap();
    let completer = Arc::new(ScriptedCompleter::new().reasoning(Some("NEEDS IMPROVEMENT")));
    let (_, services) = services(tmp.path(), completer.clone());
    let engine = Engine::new(services, Arc::new(SimilarityRelevance));

    for info in catalog() {
        let result = engine.answer("What is the capital of France?", info.name, false).await;
        assert_eq!(result.source_type, SourceType::General, "{}", info.name);
        assert!(result.sources.is_empty(), "{}", info.name);
        assert!(result.error.is_none(), "{}", info.name);
        assert!(result.content.starts_with("answer to:"), "{}", info.name);
    }
    assert!(completer.contexts().iter().all(|c| c.is_none()));
}

#[tokio::test]
async fn direct_grounds_the_answer_in_retrieved_text() {
    let (_tmp, services, completer) = seeded(CAPITALS, ScriptedCompleter::new()).await;

    let result = Direct.answer(&services, "capital of France", false).await.unwrap();
    assert_eq!(result.source_type, SourceType::Local);
    assert_eq!(result.sources, vec!["a.txt", "b.txt"]);
    assert_eq!(result.content, "answer to: capital of France");

    let context = completer.contexts()[0].clone().unwrap();
    assert_eq!(
        fragments_in(&context),
        vec!["Paris is the capital of France.", "Rome is the capital of Italy."]
    );
}

#[tokio::test]
async fn headered_context_names_sources() {
    let (_tmp, services, completer) = seeded(CAPITALS, ScriptedCompleter::new()).await;
    HeaderedContext
        .answer(&services, "capital of France", false)
        .await
        .unwrap();
    let context = completer.contexts()[0].clone().unwrap();
    assert!(context.starts_with("[Source: a.txt]\nParis is the capital of France."));
    assert!(context.contains("[Source: b.txt]\nRome is the capital of Italy."));
}

#[tokio::test]
async fn rerank_keeps_top_five() {
    let (_tmp, services, completer) = seeded(MIXED, ScriptedCompleter::new()).await;
    Rerank
        .answer(&services, "What is the capital of France?", false)
        .await
        .unwrap();
    let context = completer.contexts()[0].clone().unwrap();
    let fragments = fragments_in(&context);
    assert_eq!(fragments.len(), 5);
    assert_eq!(fragments[0], "Paris is the capital of France.");
}

#[tokio::test]
async fn candidate_counts_differ_per_strategy() {
    let docs = wide_fixture();
    let (_tmp, services, completer) = seeded(&docs, ScriptedCompleter::new()).await;

    Direct.answer(&services, "capital of France", false).await.unwrap();
    BroadRecall.answer(&services, "capital of France", false).await.unwrap();
    Hierarchical.answer(&services, "capital of France", false).await.unwrap();

    let counts: Vec<usize> = completer
        .contexts()
        .iter()
        .map(|c| fragments_in(c.as_deref().unwrap()).len())
        .collect();
    assert_eq!(counts, vec![5, 8, 6]);
}

#[tokio::test]
async fn expansion_drives_retrieval_then_keeps_five() {
    let docs = wide_fixture();
    let (_tmp, services, completer) =
        seeded(&docs, ScriptedCompleter::new().reasoning(Some("Tokio async runtime"))).await;

    let result = ExpandRerank
        .answer(&services, "capital of France", false)
        .await
        .unwrap();
    assert_eq!(result.source_type, SourceType::Local);
    assert_eq!(result.sources[0], "rust.md");

    let context = completer.contexts()[0].clone().unwrap();
    let fragments = fragments_in(&context);
    assert_eq!(fragments.len(), 5);
    assert_eq!(fragments[0], "Tokio is an async runtime for Rust.");
    // generation still answers the original question
    assert_eq!(completer.prompts(), vec!["capital of France"]);
}

#[tokio::test]
async fn expansion_failure_searches_the_original_query() {
    let docs = wide_fixture();
    let (_tmp, services, completer) =
        seeded(&docs, ScriptedCompleter::new().reasoning(None)).await;

    let result = ExpandRerank
        .answer(&services, "capital of France", false)
        .await
        .unwrap();
    assert_eq!(result.sources[0], "a.txt");
    let context = completer.contexts()[0].clone().unwrap();
    assert_eq!(fragments_in(&context).len(), 5);
}

#[tokio::test]
async fn adaptive_widens_for_complex_questions() {
    let (_tmp, services, completer) = seeded(MIXED, ScriptedCompleter::new()).await;

    Adaptive
        .answer(&services, "What is the capital of France?", false)
        .await
        .unwrap();
    Adaptive
        .answer(&services, "Compare the capital of France with Rust", false)
        .await
        .unwrap();

    let contexts = completer.contexts();
    assert_eq!(fragments_in(contexts[0].as_deref().unwrap()).len(), 3);
    assert_eq!(fragments_in(contexts[1].as_deref().unwrap()).len(), MIXED.len());
}

#[tokio::test]
async fn query_transformation_merges_without_duplicates() {
    let variants = "1. Which city is the capital of France?\n2. France capital city\n3. Where is Paris located?";
    let (_tmp, services, completer) =
        seeded(MIXED, ScriptedCompleter::new().reasoning(Some(variants))).await;

    let result = QueryTransformation
        .answer(&services, "What is the capital of France?", false)
        .await
        .unwrap();
    assert_eq!(result.source_type, SourceType::Local);
    assert_eq!(result.sources[0], "a.txt");

    let mut unique = result.sources.clone();
    unique.dedup();
    assert_eq!(unique.len(), result.sources.len());

    let context = completer.contexts()[0].clone().unwrap();
    let fragments = fragments_in(&context);
    assert!(fragments.len() <= 5);
    let mut sorted = fragments.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(sorted.len(), fragments.len());
    assert_eq!(fragments[0], "Paris is the capital of France.");
}

#[tokio::test]
async fn query_transformation_survives_reasoning_failure() {
    let (_tmp, services, _completer) =
        seeded(CAPITALS, ScriptedCompleter::new().reasoning(None)).await;
    let result = QueryTransformation
        .answer(&services, "capital of France", false)
        .await
        .unwrap();
    assert_eq!(result.source_type, SourceType::Local);
    assert_eq!(result.sources, vec!["a.txt", "b.txt"]);
}

#[tokio::test]
async fn fusion_deduplicates_passes() {
    let (_tmp, services, completer) = seeded(MIXED, ScriptedCompleter::new()).await;
    let result = Fusion
        .answer(&services, "capital of France", false)
        .await
        .unwrap();

    let context = completer.contexts()[0].clone().unwrap();
    let fragments = fragments_in(&context);
    assert_eq!(fragments.len(), 3);
    assert_eq!(fragments[0], "Paris is the capital of France.");
    assert_eq!(result.sources, vec!["a.txt", "b.txt", "c.txt"]);
}

#[tokio::test]
async fn hypothetical_answer_drives_retrieval() {
    let reply = "<think>the user asks about capitals</think><answer>Rome is in Italy</answer>";
    let (_tmp, services, completer) =
        seeded(CAPITALS, ScriptedCompleter::new().reasoning(Some(reply))).await;

    let result = HypotheticalDocument
        .answer(&services, "capital of France", false)
        .await
        .unwrap();
    assert_eq!(result.sources[0], "b.txt");
    // generation still answers the original question
    assert_eq!(completer.prompts(), vec!["capital of France"]);
}

#[tokio::test]
async fn self_reflection_retries_when_marked() {
    let (_tmp, services, completer) = seeded(
        CAPITALS,
        ScriptedCompleter::new().reasoning(Some("Verdict: NEEDS IMPROVEMENT")),
    )
    .await;
    let result = SelfReflective
        .answer(&services, "capital of France", false)
        .await
        .unwrap();
    assert_eq!(result.source_type, SourceType::Local);
    assert_eq!(completer.contexts().len(), 2);
}

#[tokio::test]
async fn self_reflection_keeps_sufficient_answers() {
    let (_tmp, services, completer) =
        seeded(CAPITALS, ScriptedCompleter::new().reasoning(Some("SUFFICIENT"))).await;
    SelfReflective
        .answer(&services, "capital of France", false)
        .await
        .unwrap();
    assert_eq!(completer.contexts().len(), 1);
    assert_eq!(completer.count(|c| matches!(c, Call::Reason { .. })), 1);
}

#[tokio::test]
async fn corrective_falls_back_on_low_relevance() {
    let (_tmp, services, completer) = seeded(MIXED, ScriptedCompleter::new()).await;

    let uniform_low = Corrective::new(Arc::new(FixedRelevance(vec![0.1; 5])));
    let result = uniform_low
        .answer(&services, "zebra stripes pattern", false)
        .await
        .unwrap();
    assert_eq!(result.source_type, SourceType::General);
    assert!(result.sources.is_empty());

    // raw similarity of an unrelated question is zero everywhere
    let similarity = Corrective::new(Arc::new(SimilarityRelevance));
    let result = similarity
        .answer(&services, "zebra stripes pattern", false)
        .await
        .unwrap();
    assert_eq!(result.source_type, SourceType::General);
    assert!(completer.contexts().iter().all(|c| c.is_none()));
}

#[tokio::test]
async fn corrective_keeps_only_relevant_hits() {
    let (_tmp, services, completer) = seeded(CAPITALS, ScriptedCompleter::new()).await;

    let corrective = Corrective::new(Arc::new(FixedRelevance(vec![0.9, 0.2])));
    let result = corrective
        .answer(&services, "capital of France", false)
        .await
        .unwrap();
    assert_eq!(result.source_type, SourceType::Local);
    assert_eq!(result.sources, vec!["a.txt"]);
    assert_eq!(
        completer.contexts()[0].as_deref(),
        Some("Paris is the capital of France.")
    );

    let similarity = Corrective::new(Arc::new(SimilarityRelevance));
    let result = similarity
        .answer(&services, "capital of France", false)
        .await
        .unwrap();
    assert_eq!(result.source_type, SourceType::Local);
    assert_eq!(result.sources, vec!["a.txt", "b.txt"]);
}

#[tokio::test]
async fn prompt_variants_embed_context_in_the_prompt() {
    let (_tmp, services, completer) = seeded(CAPITALS, ScriptedCompleter::new()).await;
    KnowledgeGraph
        .answer(&services, "capital of France", false)
        .await
        .unwrap();
    MultiModalAware
        .answer(&services, "capital of France", false)
        .await
        .unwrap();

    let prompts = completer.prompts();
    assert!(prompts[0].contains("entities") && prompts[0].contains("Paris is the capital"));
    assert!(prompts[1].contains("Consult the source document"));
    assert!(completer.contexts().iter().all(|c| c.is_none()));
}

#[tokio::test]
async fn polish_replaces_only_with_substantial_text() {
    let polished = "A thoroughly polished answer about Paris.";
    let (_tmp, services, _) =
        seeded(CAPITALS, ScriptedCompleter::new().polishing(Some(polished))).await;
    let result = Direct.answer(&services, "capital of France", true).await.unwrap();
    assert_eq!(result.content, polished);

    let (_tmp, services, _) = seeded(CAPITALS, ScriptedCompleter::new().polishing(Some("ok"))).await;
    let result = Direct.answer(&services, "capital of France", true).await.unwrap();
    assert_eq!(result.content, "answer to: capital of France");

    let (_tmp, services, _) = seeded(CAPITALS, ScriptedCompleter::new().polishing(None)).await;
    let result = Direct.answer(&services, "capital of France", true).await.unwrap();
    assert_eq!(result.content, "answer to: capital of France");
}

#[tokio::test]
async fn self_reflection_polishes_once() {
    let (_tmp, services, completer) = seeded(
        CAPITALS,
        ScriptedCompleter::new()
            .reasoning(Some("NEEDS IMPROVEMENT"))
            .polishing(Some("A polished, improved answer.")),
    )
    .await;
    let result = SelfReflective
        .answer(&services, "capital of France", true)
        .await
        .unwrap();
    assert_eq!(result.content, "A polished, improved answer.");
    assert_eq!(completer.count(|c| matches!(c, Call::Polish { .. })), 1);
}

#[tokio::test]
async fn engine_retries_ungrounded_when_generation_fails() {
    let mut scripted = ScriptedCompleter::new();
    scripted.fail_grounded = true;
    let (_tmp, services, _) = seeded(CAPITALS, scripted).await;
    let engine = Engine::new(services, Arc::new(SimilarityRelevance));

    let result = engine.answer("capital of France", "option1", false).await;
    assert_eq!(result.source_type, SourceType::General);
    assert!(result.sources.is_empty());
    assert_eq!(result.content, "answer to: capital of France");
    assert!(result.error.unwrap().contains("scripted completion failure"));
}

#[tokio::test]
async fn engine_reports_unavailable_when_everything_fails() {
    let mut scripted = ScriptedCompleter::new();
    scripted.fail_all = true;
    let (_tmp, services, _) = seeded(CAPITALS, scripted).await;
    let engine = Engine::new(services, Arc::new(SimilarityRelevance));

    let result = engine.answer("capital of France", "rse", false).await;
    assert_eq!(result.content, SERVICE_UNAVAILABLE);
    assert_eq!(result.source_type, SourceType::General);
    assert!(result.error.is_some());
}

#[tokio::test]
async fn unknown_selector_uses_direct() {
    let (_tmp, services, completer) = seeded(CAPITALS, ScriptedCompleter::new()).await;
    let engine = Engine::new(services, Arc::new(SimilarityRelevance));

    let result = engine.answer("capital of France", "option99", false).await;
    assert_eq!(result.source_type, SourceType::Local);
    assert_eq!(completer.count(|c| matches!(c, Call::Reason { .. })), 0);
}
