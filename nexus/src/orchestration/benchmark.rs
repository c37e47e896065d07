//! End-to-end benchmark over labelled queries.
//!
//! Each query runs as its own session through the full state machine. A
//! session that suspends for clarification is resumed once with a blank
//! answer, so the run proceeds on a best guess. The report compares the
//! routed model against the label and accounts cost against the configured
//! single-model baseline.

use std::time::Duration;

use chrono::{DateTime, Utc};
use nexus_core::{RunState, Stage};
use nexus_semantic::{LabelledQuery, RoutingReport};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use super::{OrchestrationError, Orchestrator, Result, RunOutcome};

/// Why a benchmark case did not produce a routed answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureKind {
    /// The query exceeded the per-query time limit
    Timeout,
    /// The run failed or could not be started
    Runtime(String),
    /// The classifier answered directly, nothing was routed
    EarlySelfAnswer,
    /// The run finished without a routing decision
    NoRouting,
}

impl FailureKind {
    /// Errors discard the case from accuracy and cost figures
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Timeout | Self::Runtime(_))
    }
}

/// One benchmarked query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkCase {
    pub id: usize,
    pub query: String,
    pub expected_model: String,
    /// First routed model, if any
    pub routed_model: Option<String>,
    pub routed_models: Vec<String>,
    pub used_models: Vec<String>,
    pub correct_routing: bool,
    pub critical: bool,
    pub escalated: bool,
    pub can_self_answer: bool,
    /// Wall-clock seconds including the automatic resume
    pub latency_s: f64,
    /// Latency accounted by the run itself
    pub graph_latency_s: f64,
    pub cost_usd: f64,
    pub saved_usd: f64,
    pub knn_top_score: f32,
    pub flow: Vec<Stage>,
    pub failure: Option<FailureKind>,
    pub success: bool,
}

impl BenchmarkCase {
    fn new(
        id: usize,
        labelled: &LabelledQuery,
        state: Option<&RunState>,
        error: Option<FailureKind>,
        latency_s: f64,
        baseline_cost: f64,
    ) -> Self {
        let empty = RunState::default();
        let state = state.unwrap_or(&empty);

        let routed_model = state.selected_models.first().cloned();
        let flow: Vec<Stage> = state.trace.iter().map(|entry| entry.stage).collect();
        let failure = error.or_else(|| {
            if routed_model.is_some() {
                None
            } else if state.can_self_answer && !flow.contains(&Stage::Router) {
                Some(FailureKind::EarlySelfAnswer)
            } else {
                Some(FailureKind::NoRouting)
            }
        });
        let success = !failure.as_ref().is_some_and(FailureKind::is_error);

        Self {
            id,
            query: labelled.query.clone(),
            expected_model: labelled.expected_model.clone(),
            correct_routing: routed_model.as_deref() == Some(labelled.expected_model.as_str()),
            routed_model,
            routed_models: state.selected_models.clone(),
            used_models: state.used_models(),
            critical: state.is_critical,
            escalated: state.escalation_count > 0,
            can_self_answer: state.can_self_answer,
            latency_s,
            graph_latency_s: state.total_latency,
            cost_usd: state.total_cost,
            saved_usd: baseline_cost - state.total_cost,
            knn_top_score: state.similarity_scores.values().copied().fold(0.0f32, f32::max),
            flow,
            failure,
            success,
        }
    }
}

/// Aggregate figures over the successful cases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkSummary {
    pub generated_at: DateTime<Utc>,
    pub total_queries: usize,
    pub successful_queries: usize,
    pub failed_queries: usize,
    pub timeout_failures: usize,
    pub early_self_answer_exits: usize,
    pub no_routing_cases: usize,
    pub routing_accuracy_pct: f64,
    pub avg_latency_s: f64,
    pub avg_cost_usd: f64,
    pub total_cost_usd: f64,
    pub baseline_per_query_usd: f64,
    pub baseline_total_usd: f64,
    pub saved_total_usd: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub summary: BenchmarkSummary,
    pub cases: Vec<BenchmarkCase>,
}

impl BenchmarkReport {
    pub fn from_cases(cases: Vec<BenchmarkCase>, baseline_cost: f64) -> Self {
        let count = |kind: &FailureKind| cases.iter().filter(|c| c.failure.as_ref() == Some(kind)).count();
        let successes: Vec<&BenchmarkCase> = cases.iter().filter(|c| c.success).collect();
        let succeeded = successes.len();

        let total_cost: f64 = successes.iter().map(|c| c.cost_usd).sum();
        let total_latency: f64 = successes.iter().map(|c| c.latency_s).sum();
        let correct = successes.iter().filter(|c| c.correct_routing).count();
        let mean = |sum: f64| if succeeded == 0 { 0.0 } else { sum / succeeded as f64 };
        let baseline_total = baseline_cost * succeeded as f64;

        let summary = BenchmarkSummary {
            generated_at: Utc::now(),
            total_queries: cases.len(),
            successful_queries: succeeded,
            failed_queries: cases.len() - succeeded,
            timeout_failures: count(&FailureKind::Timeout),
            early_self_answer_exits: count(&FailureKind::EarlySelfAnswer),
            no_routing_cases: count(&FailureKind::NoRouting),
            routing_accuracy_pct: mean(correct as f64) * 100.0,
            avg_latency_s: mean(total_latency),
            avg_cost_usd: mean(total_cost),
            total_cost_usd: total_cost,
            baseline_per_query_usd: baseline_cost,
            baseline_total_usd: baseline_total,
            saved_total_usd: baseline_total - total_cost,
        };

        Self { summary, cases }
    }
}

impl Orchestrator {
    /// Route labelled queries without running any stage.
    pub async fn evaluate_routing(&self, queries: &[LabelledQuery]) -> Result<RoutingReport> {
        nexus_semantic::evaluate_routing(self.ctx.router.as_ref(), queries)
            .await
            .map_err(|e| OrchestrationError::RoutingUnavailable(e.to_string()))
    }

    /// Run every labelled query end to end, one after another.
    pub async fn benchmark(&self, queries: &[LabelledQuery], query_timeout: Duration) -> BenchmarkReport {
        let baseline_cost = self.ctx.config.orchestration.baseline_cost;
        info!("Benchmarking {} queries", queries.len());

        let mut cases = Vec::with_capacity(queries.len());
        for (i, labelled) in queries.iter().enumerate() {
            let case = self.benchmark_one(i + 1, labelled, query_timeout).await;
            info!(
                "[{}/{}] {} {} routed={} latency={:.2}s",
                case.id,
                queries.len(),
                if case.success { "OK" } else { "FAIL" },
                if case.correct_routing { "match" } else { "mismatch" },
                case.routed_model.as_deref().unwrap_or("none"),
                case.latency_s
            );
            cases.push(case);
        }

        BenchmarkReport::from_cases(cases, baseline_cost)
    }

    async fn benchmark_one(&self, id: usize, labelled: &LabelledQuery, query_timeout: Duration) -> BenchmarkCase {
        let baseline_cost = self.ctx.config.orchestration.baseline_cost;
        let session_id = format!("bench-{}", Uuid::new_v4());
        let started = Instant::now();

        let run = async {
            let mut outcome = self.run(session_id.as_str(), labelled.query.as_str()).await;
            if matches!(outcome, RunOutcome::AwaitingClarification { .. }) {
                outcome = self.run_resume(&session_id, None).await?;
            }
            Ok::<_, OrchestrationError>(outcome)
        };

        let error = match tokio::time::timeout(query_timeout, run).await {
            Err(_) => Some(FailureKind::Timeout),
            Ok(Err(e)) => Some(FailureKind::Runtime(e.to_string())),
            Ok(Ok(RunOutcome::Failed { message })) => Some(FailureKind::Runtime(message)),
            Ok(Ok(RunOutcome::AwaitingClarification { .. })) => {
                Some(FailureKind::Runtime("still awaiting clarification".to_string()))
            }
            Ok(Ok(RunOutcome::Completed(_))) => None,
        };
        let latency_s = started.elapsed().as_secs_f64();

        let state = match &error {
            Some(failure) => {
                warn!("Benchmark query {} failed: {:?}", id, failure);
                None
            }
            None => match self.checkpoint(&session_id).await {
                Ok(checkpoint) => Some(checkpoint.state),
                Err(e) => {
                    warn!("No checkpoint for benchmark session {}: {}", session_id, e);
                    None
                }
            },
        };

        BenchmarkCase::new(id, labelled, state.as_ref(), error, latency_s, baseline_cost)
    }
}
