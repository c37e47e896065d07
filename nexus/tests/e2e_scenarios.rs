//! End-to-end scenarios through the full stage pipeline with a scripted gateway.

mod common;

use std::sync::Arc;

use approx::assert_relative_eq;
use common::*;
use futures::StreamExt;
use nexus::orchestration::{RunEvent, RunOutcome};
use nexus_core::{Stage, StageOutcome};

#[tokio::test]
async fn test_greeting_short_circuits() {
    let gateway = Arc::new(ScriptedGateway::new().on(
        CLASSIFIER,
        Reply::text(
            r#"{"can_self_answer": true, "self_answer": "Hello! How can I help?", "is_ambiguous": false, "is_critical": false, "subtasks": []}"#,
            0.0001,
        ),
    ));
    let orchestrator = orchestrator(gateway.clone()).await;

    let outcome = orchestrator.run("greeting", "hello").await;
    let answer = outcome.answer().expect("completed");

    assert_eq!(answer.text, "Hello! How can I help?");
    assert!(answer.routed_models.is_empty());
    assert!(answer.used_models.is_empty());
    assert_eq!(gateway.calls().len(), 1);
    assert_relative_eq!(answer.total_cost, 0.0001);

    let stages: Vec<_> = orchestrator
        .trace("greeting")
        .await
        .unwrap()
        .iter()
        .map(|e| e.stage)
        .collect();
    assert_eq!(stages, vec![Stage::Classifier, Stage::Finalizer]);
}

#[tokio::test]
async fn test_self_answer_refused_for_real_question() {
    let gateway = Arc::new(
        ScriptedGateway::new()
            .on(
                CLASSIFIER,
                Reply::text(
                    r#"{"can_self_answer": true, "self_answer": "Sure, here it is", "subtasks": []}"#,
                    0.0,
                ),
            )
            .on(CODER, Reply::text("def quicksort(xs): ...", 0.0002)),
    );
    let orchestrator = orchestrator(gateway.clone()).await;

    let outcome = orchestrator.run("s", "write quicksort in python").await;
    let answer = outcome.answer().expect("completed");

    assert_eq!(answer.text, "def quicksort(xs): ...");
    assert_eq!(answer.routed_models, vec![CODER]);
    assert_eq!(gateway.calls_to(CODER).len(), 1);
}

#[tokio::test]
async fn test_two_subtasks_are_aggregated() {
    let query = "explain the causes of world war one and its economic impact";
    let gateway = Arc::new(
        ScriptedGateway::new()
            .on(
                CLASSIFIER,
                Reply::text(
                    &classification(false, &["what triggered the great war", "economic impact of the war"]),
                    0.0001,
                ),
            )
            .on_contains(HISTORIAN, "triggered the great war", Reply::text("Alliances and nationalism.", 0.001))
            .on_contains(HISTORIAN, "economic impact of the war", Reply::text("Debt and inflation.", 0.002))
            .on(AGGREGATOR, Reply::text("A merged account of causes and consequences.", 0.0005)),
    );
    let orchestrator = orchestrator(gateway.clone()).await;

    let outcome = orchestrator.run("parallel", query).await;
    let answer = outcome.answer().expect("completed");

    assert_eq!(answer.text, "A merged account of causes and consequences.");
    assert_eq!(answer.routed_models, vec![HISTORIAN, HISTORIAN]);
    assert_eq!(answer.used_models, vec![HISTORIAN, HISTORIAN]);
    assert_eq!(answer.escalation_count, 0);

    // classifier + two embeddings + workers + aggregator
    assert_relative_eq!(answer.total_cost, 0.0001 + 2.0 * 0.00001 + 0.001 + 0.002 + 0.0005, epsilon = 1e-12);
    assert_relative_eq!(answer.cost_saved, 0.012 - answer.total_cost, epsilon = 1e-12);

    // Non-critical: never judged
    assert!(gateway.calls_to(JUDGE).is_empty());

    let aggregation = &gateway.calls_to(AGGREGATOR)[0];
    let transcript = aggregation.transcript();
    assert!(transcript.contains("[what triggered the great war]: Alliances and nationalism."));
    assert!(transcript.contains("[economic impact of the war]: Debt and inflation."));
}

#[tokio::test]
async fn test_critical_query_is_escalated_once() {
    let gateway = Arc::new(
        ScriptedGateway::new()
            .on(CLASSIFIER, Reply::text(&classification(true, &[]), 0.0))
            .on(CODER, Reply::text("def quicksort(xs): return xs", 0.0003))
            .on(JUDGE, Reply::text(&verdict(3.0, "handle duplicates and recursion"), 0.0001))
            .on(ESCALATION, Reply::text("a correct quicksort", 0.01)),
    );
    let orchestrator = orchestrator(gateway.clone()).await;

    let outcome = orchestrator.run("critical", "write quicksort in python").await;
    let answer = outcome.answer().expect("completed");

    assert_eq!(answer.text, "a correct quicksort");
    assert_eq!(answer.escalation_count, 1);
    assert_eq!(answer.routed_models, vec![CODER]);
    assert_eq!(answer.used_models, vec![CODER, ESCALATION]);
    assert_eq!(answer.judge_score, Some(3.0));

    // Ceiling reached: no second verdict
    assert_eq!(gateway.calls_to(JUDGE).len(), 1);

    let escalation = &gateway.calls_to(ESCALATION)[0];
    let prompt = escalation.transcript();
    assert!(prompt.starts_with("Previous attempt failed: handle duplicates and recursion."));
    assert!(prompt.ends_with("Query: write quicksort in python"));
}

#[tokio::test]
async fn test_ambiguous_query_suspends_and_resumes() {
    let gateway = Arc::new(
        ScriptedGateway::new()
            .on(
                CLASSIFIER,
                Reply::text(
                    r#"{"is_ambiguous": true, "clarifying_question": "Which language, and what is broken?", "subtasks": []}"#,
                    0.0,
                ),
            )
            .on(CODER, Reply::text("Fixed: keep equal elements in the partition.", 0.0002)),
    );
    let orchestrator = orchestrator(gateway.clone()).await;

    let outcome = orchestrator.run("hitl", "fix my code").await;
    assert_eq!(
        outcome,
        RunOutcome::AwaitingClarification {
            session_id: "hitl".to_string(),
            question: "Which language, and what is broken?".to_string(),
        }
    );
    assert!(gateway.calls_to(CODER).is_empty());

    let resumed = orchestrator
        .run_resume("hitl", Some("python quicksort drops duplicates"))
        .await
        .unwrap();
    let answer = resumed.answer().expect("completed");
    assert_eq!(answer.text, "Fixed: keep equal elements in the partition.");

    // The classifier is not consulted again
    assert_eq!(gateway.calls_to(CLASSIFIER).len(), 1);

    let worker_call = &gateway.calls_to(CODER)[0];
    assert_eq!(
        worker_call.transcript(),
        "fix my code [Clarified: python quicksort drops duplicates]"
    );

    let trace = orchestrator.trace("hitl").await.unwrap();
    let outcomes: Vec<_> = trace.iter().map(|e| (e.stage, e.outcome)).collect();
    assert!(outcomes.contains(&(Stage::Clarification, StageOutcome::Suspended)));
    assert!(outcomes.contains(&(Stage::Clarification, StageOutcome::Resumed)));
}

#[tokio::test]
async fn test_stream_ends_with_single_terminal_event() {
    let gateway = Arc::new(
        ScriptedGateway::new()
            .on(CLASSIFIER, Reply::text(&classification(false, &[]), 0.0))
            .on(CODER, Reply::text("done", 0.0)),
    );
    let orchestrator = orchestrator(gateway).await;

    let events: Vec<RunEvent> = orchestrator
        .start("stream", "write quicksort in python")
        .collect()
        .await;

    let terminal: Vec<_> = events.iter().filter(|e| e.is_terminal()).collect();
    assert_eq!(terminal.len(), 1);
    assert!(matches!(events.last(), Some(RunEvent::Completed(_))));

    let stages: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            RunEvent::StageCompleted { stage, .. } => Some(*stage),
            _ => None,
        })
        .collect();
    assert_eq!(
        stages,
        vec![Stage::Classifier, Stage::Router, Stage::Worker, Stage::Finalizer]
    );
}

#[tokio::test]
async fn test_classifier_failure_uses_safe_defaults() {
    let gateway = Arc::new(
        ScriptedGateway::new()
            .on(CLASSIFIER, Reply::text("this is not json", 0.0001))
            .on(CODER, Reply::text("def quicksort(xs): ...", 0.0)),
    );
    let orchestrator = orchestrator(gateway.clone()).await;

    let outcome = orchestrator.run("s", "write quicksort in python").await;
    let answer = outcome.answer().expect("completed");
    assert_eq!(answer.text, "def quicksort(xs): ...");
    assert!(gateway.calls_to(JUDGE).is_empty());
}
