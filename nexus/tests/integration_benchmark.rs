//! Benchmark runs over labelled queries: routing accuracy, failure
//! taxonomy, cost accounting against the baseline and per-query timeouts.

mod common;

use std::sync::Arc;
use std::time::Duration;

use approx::assert_relative_eq;
use common::*;
use nexus::orchestration::{FailureKind, OrchestrationError};
use nexus_core::{InMemoryCheckpointStore, Stage};
use nexus_semantic::{KnnRouter, LabelledQuery, MockProvider};

const GREETING: &str = r#"{"can_self_answer": true, "self_answer": "Hi! What can I do for you?", "is_ambiguous": false, "is_critical": false, "subtasks": []}"#;
const AMBIGUOUS: &str = r#"{"is_ambiguous": true, "clarifying_question": "Which language?", "subtasks": []}"#;

fn labelled() -> Vec<LabelledQuery> {
    vec![
        LabelledQuery::new("write quicksort in python", CODER),
        LabelledQuery::new("causes of world war one", HISTORIAN),
        // Shares "of" with the history prototypes and loses the vote
        LabelledQuery::new("capital city of spain", GENERALIST),
        LabelledQuery::new("hello", GENERALIST),
        LabelledQuery::new("fix my code", CODER),
    ]
}

fn benchmark_gateway() -> ScriptedGateway {
    ScriptedGateway::new()
        .on_contains(CLASSIFIER, "Query: hello", Reply::text(GREETING, 0.0001))
        .on_contains(CLASSIFIER, "Query: fix my code", Reply::text(AMBIGUOUS, 0.0001))
        .on(CLASSIFIER, Reply::text(&classification(false, &[]), 0.0001))
        .on(CODER, Reply::text("fn quicksort() {}", 0.001))
        .on(HISTORIAN, Reply::text("Alliances and nationalism.", 0.002))
}

#[tokio::test]
async fn test_benchmark_report() {
    let gateway = Arc::new(benchmark_gateway());
    let orchestrator = orchestrator(gateway.clone()).await;

    let report = orchestrator.benchmark(&labelled(), Duration::from_secs(90)).await;
    let cases = &report.cases;
    assert_eq!(cases.len(), 5);
    assert_eq!(cases.iter().map(|c| c.id).collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);

    assert!(cases[0].correct_routing);
    assert_eq!(cases[0].used_models, vec![CODER.to_string()]);
    assert_eq!(cases[0].flow.first(), Some(&Stage::Classifier));
    assert_eq!(cases[0].flow.last(), Some(&Stage::Finalizer));
    assert!(cases[0].knn_top_score > 0.99);

    assert!(cases[1].correct_routing);
    assert!(!cases[2].correct_routing);
    assert_eq!(cases[2].routed_model.as_deref(), Some(HISTORIAN));

    // Answered by the classifier: successful but never routed
    assert_eq!(cases[3].failure, Some(FailureKind::EarlySelfAnswer));
    assert!(cases[3].success);
    assert!(cases[3].routed_model.is_none());

    // Suspended, then resumed with a best guess
    assert!(cases[4].correct_routing);
    assert!(cases[4].flow.contains(&Stage::Clarification));
    assert_eq!(gateway.calls_to(CODER).len(), 2);

    let summary = &report.summary;
    assert_eq!(summary.total_queries, 5);
    assert_eq!(summary.successful_queries, 5);
    assert_eq!(summary.failed_queries, 0);
    assert_eq!(summary.early_self_answer_exits, 1);
    assert_eq!(summary.no_routing_cases, 0);
    assert_relative_eq!(summary.routing_accuracy_pct, 60.0, epsilon = 1e-9);

    let total: f64 = cases.iter().map(|c| c.cost_usd).sum();
    assert_relative_eq!(summary.total_cost_usd, total, epsilon = 1e-12);
    assert_relative_eq!(summary.baseline_total_usd, 0.012 * 5.0, epsilon = 1e-12);
    assert_relative_eq!(summary.saved_total_usd, 0.012 * 5.0 - total, epsilon = 1e-12);
    // Classifier plus one routed text plus the coder
    assert_relative_eq!(cases[0].cost_usd, 0.0001 + 0.00001 + 0.001, epsilon = 1e-12);
}

#[tokio::test(start_paused = true)]
async fn test_benchmark_query_timeout() {
    let gateway = Arc::new(
        ScriptedGateway::new()
            .on(CLASSIFIER, Reply::text(&classification(false, &[]), 0.0))
            .on(CODER, Reply::delayed(Duration::from_secs(300), "too late")),
    );
    let orchestrator = orchestrator(gateway).await;

    let queries = vec![LabelledQuery::new("write quicksort in python", CODER)];
    let report = orchestrator.benchmark(&queries, Duration::from_secs(10)).await;

    let case = &report.cases[0];
    assert_eq!(case.failure, Some(FailureKind::Timeout));
    assert!(!case.success);
    assert_relative_eq!(case.latency_s, 10.0, epsilon = 1e-6);
    assert_eq!(case.cost_usd, 0.0);

    assert_eq!(report.summary.timeout_failures, 1);
    assert_eq!(report.summary.successful_queries, 0);
    assert_eq!(report.summary.routing_accuracy_pct, 0.0);
    assert_eq!(report.summary.baseline_total_usd, 0.0);
}

#[tokio::test]
async fn test_benchmark_without_index_reports_runtime_failures() {
    let config = test_config();
    let router = KnnRouter::without_index(Arc::new(MockProvider::new(256)));
    let orchestrator = nexus::orchestration::Orchestrator::new(
        config,
        Arc::new(benchmark_gateway()),
        router,
        Arc::new(InMemoryCheckpointStore::new()),
    );

    let report = orchestrator.benchmark(&labelled()[..2], Duration::from_secs(90)).await;
    assert!(report
        .cases
        .iter()
        .all(|c| matches!(c.failure, Some(FailureKind::Runtime(_)))));
    assert_eq!(report.summary.failed_queries, 2);

    let err = orchestrator.evaluate_routing(&labelled()).await.unwrap_err();
    assert!(matches!(err, OrchestrationError::RoutingUnavailable(_)));
}

#[tokio::test]
async fn test_evaluate_routing_skips_models() {
    let gateway = Arc::new(benchmark_gateway());
    let orchestrator = orchestrator(gateway.clone()).await;

    let report = orchestrator.evaluate_routing(&labelled()).await.unwrap();
    assert_eq!(report.total, 5);
    // Routing alone sends "hello" to a class too
    assert!(report.cases[3].routed_model.is_some());
    assert_eq!(report.per_model[CODER].expected, 2);
    assert!(gateway.calls().is_empty());
}
