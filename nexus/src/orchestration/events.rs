//! Events streamed to callers while a run progresses.

use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use nexus_core::{ModelPricing, RunState, Stage, StageOutcome};
use serde::{Deserialize, Serialize};

/// Final result of a completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalAnswer {
    pub session_id: String,
    pub text: String,
    /// USD
    pub total_cost: f64,
    /// Seconds
    pub total_latency: f64,
    /// Models chosen by the router, in subtask order
    pub routed_models: Vec<String>,
    /// Models that produced a response, escalation included
    pub used_models: Vec<String>,
    pub escalation_count: u32,
    pub judge_score: Option<f64>,
    /// Cost of sending the query to a single frontier model
    pub baseline_cost: f64,
    pub cost_saved: f64,
    pub completed_at: DateTime<Utc>,
}

impl FinalAnswer {
    pub fn from_state(state: &RunState, baseline_cost: f64) -> Self {
        Self {
            session_id: state.session_id.clone(),
            text: state.final_response.clone().unwrap_or_default(),
            total_cost: state.total_cost,
            total_latency: state.total_latency,
            routed_models: state.selected_models.clone(),
            used_models: state.used_models(),
            escalation_count: state.escalation_count,
            judge_score: state.judge_score,
            baseline_cost,
            cost_saved: baseline_cost - state.total_cost,
            completed_at: Utc::now(),
        }
    }
}

/// Progress of a run.
///
/// A stream yields any number of `StageCompleted` events followed by exactly
/// one terminal event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    StageCompleted {
        stage: Stage,
        outcome: StageOutcome,
        detail: String,
    },
    ClarificationRequested {
        session_id: String,
        question: String,
    },
    Completed(FinalAnswer),
    Failed {
        message: String,
    },
}

impl RunEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::StageCompleted { .. })
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(FinalAnswer),
    AwaitingClarification { session_id: String, question: String },
    Failed { message: String },
}

impl RunOutcome {
    /// Drain an event stream into its terminal outcome.
    pub async fn collect<S>(events: S) -> Self
    where
        S: Stream<Item = RunEvent>,
    {
        let mut events = std::pin::pin!(events);
        while let Some(event) = events.next().await {
            match event {
                RunEvent::StageCompleted { .. } => {}
                RunEvent::Completed(answer) => return Self::Completed(answer),
                RunEvent::ClarificationRequested {
                    session_id,
                    question,
                } => return Self::AwaitingClarification { session_id, question },
                RunEvent::Failed { message } => return Self::Failed { message },
            }
        }
        Self::Failed {
            message: "Run ended without a result".to_string(),
        }
    }

    pub fn answer(&self) -> Option<&FinalAnswer> {
        match self {
            Self::Completed(answer) => Some(answer),
            _ => None,
        }
    }
}

/// One capability class as reported by [`Orchestrator::models`](super::Orchestrator::models).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub class: String,
    pub model: String,
    pub pricing: Option<ModelPricing>,
}

/// Readiness report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub index_loaded: bool,
    pub vectors: usize,
    pub classes: usize,
    /// Neighbours consulted per routing vote
    pub knn_k: usize,
    pub embedding_model: String,
}
