//! Failure containment: upstream errors, timeouts, panics and a missing index
//! degrade a run instead of aborting it.

mod common;

use std::sync::Arc;
use std::time::Duration;

use approx::assert_relative_eq;
use common::*;
use nexus::orchestration::{Orchestrator, RunOutcome};
use nexus::stages::execution::TIMEOUT_SENTINEL;
use nexus_core::{InMemoryCheckpointStore, SessionStatus, Stage, StageOutcome};
use nexus_semantic::{KnnRouter, MockProvider};

const TWO_PARTS: &str = "explain the causes of world war one and its economic impact";

fn fan_out_gateway(first: Reply, second: Reply) -> ScriptedGateway {
    ScriptedGateway::new()
        .on(
            CLASSIFIER,
            Reply::text(
                &classification(false, &["what triggered the great war", "economic impact of the war"]),
                0.0,
            ),
        )
        .on_contains(HISTORIAN, "triggered the great war", first)
        .on_contains(HISTORIAN, "economic impact of the war", second)
}

#[tokio::test]
async fn test_failed_subtask_does_not_sink_siblings() {
    let gateway = Arc::new(
        fan_out_gateway(
            Reply::fail("rate limited"),
            Reply::text("Debt and inflation.", 0.002),
        )
        .on(AGGREGATOR, Reply::text("partial synthesis", 0.0)),
    );
    let orchestrator = orchestrator(gateway.clone()).await;

    let outcome = orchestrator.run("isolation", TWO_PARTS).await;
    let answer = outcome.answer().expect("completed");
    assert_eq!(answer.text, "partial synthesis");

    // The surviving subtask plus one routing embedding per subtask
    assert_relative_eq!(answer.total_cost, 0.002 + 2.0 * 0.00001, epsilon = 1e-12);

    let checkpoint = orchestrator.checkpoint("isolation").await.unwrap();
    let responses = &checkpoint.state.worker_responses;
    assert_eq!(responses.len(), 2);
    assert!(responses[0].text.starts_with("Error: "));
    assert!(responses[0].text.contains("rate limited"));
    assert_eq!(responses[0].cost_usd, 0.0);
    assert_eq!(responses[1].text, "Debt and inflation.");

    // The aggregator still sees both slots, in subtask order
    let transcript = gateway.calls_to(AGGREGATOR)[0].transcript();
    let failed = transcript.find("[what triggered the great war]: Error: ").unwrap();
    let succeeded = transcript.find("[economic impact of the war]: Debt and inflation.").unwrap();
    assert!(failed < succeeded);
}

#[tokio::test]
async fn test_panicking_worker_is_contained() {
    let gateway = Arc::new(
        fan_out_gateway(Reply::Panic, Reply::text("Debt and inflation.", 0.0))
            .on(AGGREGATOR, Reply::text("synthesis", 0.0)),
    );
    let orchestrator = orchestrator(gateway).await;

    let outcome = orchestrator.run("panic", TWO_PARTS).await;
    assert_eq!(outcome.answer().expect("completed").text, "synthesis");

    let state = orchestrator.checkpoint("panic").await.unwrap().state;
    assert_eq!(state.worker_responses.len(), 2);
    assert!(state.worker_responses[0].text.starts_with("Error: worker task failed"));
    assert_eq!(state.worker_responses[0].model, HISTORIAN);
    assert_eq!(state.worker_responses[1].text, "Debt and inflation.");
}

#[tokio::test]
async fn test_aggregation_failure_keeps_raw_outputs() {
    let gateway = Arc::new(
        fan_out_gateway(
            Reply::text("Alliances and nationalism.", 0.0),
            Reply::text("Debt and inflation.", 0.0),
        )
        .on(AGGREGATOR, Reply::fail("overloaded")),
    );
    let orchestrator = orchestrator(gateway).await;

    let outcome = orchestrator.run("raw", TWO_PARTS).await;
    let text = &outcome.answer().expect("completed").text;

    assert!(text.starts_with("Error during aggregation: "));
    assert!(text.contains("[Agent 1] Alliances and nationalism."));
    assert!(text.contains("[Agent 2] Debt and inflation."));
}

#[tokio::test(start_paused = true)]
async fn test_slow_worker_times_out() {
    let gateway = Arc::new(
        ScriptedGateway::new()
            .on(CLASSIFIER, Reply::text(&classification(false, &[]), 0.0))
            .on(CODER, Reply::delayed(Duration::from_secs(120), "too late")),
    );
    let orchestrator = orchestrator(gateway).await;

    let outcome = orchestrator.run("slow", "write quicksort in python").await;
    let answer = outcome.answer().expect("completed");

    assert_eq!(answer.text, TIMEOUT_SENTINEL);
    assert!(answer.total_latency >= 30.0);
    assert!(answer.total_latency < 120.0);

    let state = orchestrator.checkpoint("slow").await.unwrap().state;
    assert_eq!(state.worker_responses[0].cost_usd, 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_fan_out_timeout_is_contained() {
    let gateway = Arc::new(
        fan_out_gateway(
            Reply::delayed(Duration::from_secs(120), "too late"),
            Reply::delayed(Duration::from_secs(5), "Debt and inflation."),
        )
        .on(AGGREGATOR, Reply::text("synthesis", 0.0)),
    );
    let orchestrator = orchestrator(gateway).await;

    let outcome = orchestrator.run("fan-out-timeout", TWO_PARTS).await;
    let answer = outcome.answer().expect("completed");
    assert_eq!(answer.text, "synthesis");

    // Stage latency is the slowest worker, capped by the timeout
    assert_relative_eq!(answer.total_latency, 30.0, epsilon = 1e-6);

    let state = orchestrator.checkpoint("fan-out-timeout").await.unwrap().state;
    let texts: Vec<_> = state
        .worker_responses
        .iter()
        .map(|r| (r.text.as_str(), r.latency_ms))
        .collect();
    assert_eq!(texts.len(), 2);
    assert_eq!(texts[0].0, TIMEOUT_SENTINEL);
    assert_relative_eq!(texts[0].1, 30_000.0, epsilon = 1e-3);
    assert_eq!(texts[1].0, "Debt and inflation.");
    assert_relative_eq!(texts[1].1, 5_000.0, epsilon = 1e-3);
}

#[tokio::test]
async fn test_missing_index_fails_the_run() {
    let gateway = Arc::new(
        ScriptedGateway::new().on(CLASSIFIER, Reply::text(&classification(false, &[]), 0.0001)),
    );
    let router = KnnRouter::without_index(Arc::new(MockProvider::new(256)));
    let orchestrator = Orchestrator::new(
        test_config(),
        gateway.clone(),
        router,
        Arc::new(InMemoryCheckpointStore::new()),
    );

    let outcome = orchestrator.run("no-index", "write quicksort in python").await;
    let RunOutcome::Failed { message } = outcome else {
        panic!("expected a failed run, got {:?}", outcome);
    };
    assert!(message.starts_with("Routing unavailable"));

    // No specialist was ever called
    assert_eq!(gateway.calls().len(), 1);

    let checkpoint = orchestrator.checkpoint("no-index").await.unwrap();
    assert_eq!(checkpoint.status, SessionStatus::Failed);
    assert_eq!(checkpoint.state.error.as_deref(), Some(message.as_str()));
    let last = checkpoint.state.trace.last().unwrap();
    assert_eq!((last.stage, last.outcome), (Stage::Router, StageOutcome::Error));

    let health = orchestrator.health();
    assert!(!health.index_loaded);
    assert_eq!(health.vectors, 0);
    assert_eq!(health.knn_k, 5);
}

#[tokio::test]
async fn test_passing_verdict_skips_escalation() {
    let gateway = Arc::new(
        ScriptedGateway::new()
            .on(CLASSIFIER, Reply::text(&classification(true, &[]), 0.0))
            .on(CODER, Reply::text("a solid quicksort", 0.0))
            .on(JUDGE, Reply::text(&verdict(8.5, ""), 0.0)),
    );
    let orchestrator = orchestrator(gateway.clone()).await;

    let outcome = orchestrator.run("pass", "write quicksort in python").await;
    let answer = outcome.answer().expect("completed");

    assert_eq!(answer.text, "a solid quicksort");
    assert_eq!(answer.escalation_count, 0);
    assert_eq!(answer.judge_score, Some(8.5));
    assert!(gateway.calls_to(ESCALATION).is_empty());
}

#[tokio::test]
async fn test_malformed_verdict_fails_closed() {
    let gateway = Arc::new(
        ScriptedGateway::new()
            .on(CLASSIFIER, Reply::text(&classification(true, &[]), 0.0))
            .on(CODER, Reply::text("a sloppy quicksort", 0.0))
            .on(JUDGE, Reply::text("Looks fine to me!", 0.0))
            .on(ESCALATION, Reply::text("a careful quicksort", 0.0)),
    );
    let orchestrator = orchestrator(gateway.clone()).await;

    let outcome = orchestrator.run("closed", "write quicksort in python").await;
    let answer = outcome.answer().expect("completed");

    assert_eq!(answer.text, "a careful quicksort");
    assert_eq!(answer.judge_score, Some(0.0));
    assert_eq!(answer.escalation_count, 1);

    let prompt = gateway.calls_to(ESCALATION)[0].transcript();
    assert!(prompt.starts_with("Previous attempt failed: Retry with a highly intelligent model."));
}

#[tokio::test]
async fn test_escalation_ceiling_bounds_retries() {
    let mut config = test_config();
    config.orchestration.max_escalations = 2;

    let gateway = Arc::new(
        ScriptedGateway::new()
            .on(CLASSIFIER, Reply::text(&classification(true, &[]), 0.0))
            .on(CODER, Reply::text("draft", 0.0))
            .on(JUDGE, Reply::text(&verdict(2.0, "try harder"), 0.0))
            .on(ESCALATION, Reply::text("still weak", 0.0)),
    );
    let orchestrator =
        orchestrator_with(config, gateway.clone(), Arc::new(InMemoryCheckpointStore::new())).await;

    let outcome = orchestrator.run("ceiling", "write quicksort in python").await;
    let answer = outcome.answer().expect("completed");

    assert_eq!(answer.escalation_count, 2);
    assert_eq!(gateway.calls_to(JUDGE).len(), 2);
    assert_eq!(gateway.calls_to(ESCALATION).len(), 2);
    assert_eq!(answer.used_models, vec![CODER, ESCALATION, ESCALATION]);
}

#[tokio::test]
async fn test_failed_escalation_still_counts() {
    let gateway = Arc::new(
        ScriptedGateway::new()
            .on(CLASSIFIER, Reply::text(&classification(true, &[]), 0.0))
            .on(CODER, Reply::text("draft", 0.0))
            .on(JUDGE, Reply::text(&verdict(1.0, "start over"), 0.0))
            .on(ESCALATION, Reply::fail("provider down")),
    );
    let orchestrator = orchestrator(gateway).await;

    let outcome = orchestrator.run("down", "write quicksort in python").await;
    let answer = outcome.answer().expect("completed");

    assert!(answer.text.starts_with("Escalation failed entirely: "));
    assert_eq!(answer.escalation_count, 1);
}

#[tokio::test]
async fn test_aggregate_is_not_rejudged_after_escalation() {
    let mut config = test_config();
    config.orchestration.max_escalations = 3;

    let gateway = Arc::new(
        ScriptedGateway::new()
            .on(
                CLASSIFIER,
                Reply::text(
                    &classification(true, &["what triggered the great war", "economic impact of the war"]),
                    0.0,
                ),
            )
            .on(HISTORIAN, Reply::text("One side of the story.", 0.0))
            .on(AGGREGATOR, Reply::text("thin synthesis", 0.0))
            .on(JUDGE, Reply::text(&verdict(4.0, "cover the treaty terms"), 0.0))
            .on(ESCALATION, Reply::text("a thorough account", 0.0)),
    );
    let orchestrator =
        orchestrator_with(config, gateway.clone(), Arc::new(InMemoryCheckpointStore::new())).await;

    let outcome = orchestrator.run("critical-fan-out", TWO_PARTS).await;
    let answer = outcome.answer().expect("completed");

    // The aggregate takes precedence in the final answer
    assert_eq!(answer.text, "thin synthesis");
    assert_eq!(answer.escalation_count, 1);
    assert_eq!(gateway.calls_to(JUDGE).len(), 1);
    assert_eq!(gateway.calls_to(ESCALATION).len(), 1);
}
