//! Run state threaded through every orchestration stage.
//!
//! Stages never mutate [`RunState`] directly. Each stage returns a
//! [`StageUpdate`] describing its partial output and the orchestrator folds it
//! into the state with [`RunState::apply`], which owns the merge rule of every
//! field:
//!
//! - `trace` and `worker_responses` are append-only (concatenation)
//! - `total_cost` and `total_latency` accumulate non-negative deltas
//! - `escalation_count` only moves upwards (max)
//! - `similarity_scores` keeps the best score seen per capability class
//! - every other field is last-writer-wins when the update carries a value

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Stages and trace
// ============================================================================

/// Named stage of the orchestration state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Classifier,
    Clarification,
    Router,
    Worker,
    ParallelWorkers,
    Aggregator,
    Judge,
    Escalator,
    Finalizer,
}

impl Stage {
    /// Stable stage name used in traces and events
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classifier => "classifier",
            Self::Clarification => "clarification",
            Self::Router => "router",
            Self::Worker => "worker",
            Self::ParallelWorkers => "parallel_workers",
            Self::Aggregator => "aggregator",
            Self::Judge => "judge",
            Self::Escalator => "escalator",
            Self::Finalizer => "finalizer",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome recorded for one stage execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Classified,
    SelfAnswered,
    Suspended,
    Resumed,
    Routed,
    Completed,
    FanOut,
    Merged,
    Approved,
    Rejected,
    Escalated,
    Finalized,
    Error,
}

impl StageOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classified => "classified",
            Self::SelfAnswered => "self_answered",
            Self::Suspended => "suspended",
            Self::Resumed => "resumed",
            Self::Routed => "routed",
            Self::Completed => "completed",
            Self::FanOut => "fan_out",
            Self::Merged => "merged",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Escalated => "escalated",
            Self::Finalized => "finalized",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the append-only execution log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub stage: Stage,
    pub outcome: StageOutcome,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

impl TraceEntry {
    pub fn new(stage: Stage, outcome: StageOutcome, detail: impl Into<String>) -> Self {
        Self {
            stage,
            outcome,
            detail: detail.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Result of one completed specialist call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerResponse {
    /// Model that produced the text
    pub model: String,

    /// Generated text, or a sentinel / error description
    pub text: String,

    /// Attributed cost in USD (zero on failure)
    pub cost_usd: f64,

    /// Wall-clock latency of the call in milliseconds
    pub latency_ms: f64,

    /// Subtask this response answers, when the query was decomposed
    #[serde(default)]
    pub subtask: Option<String>,

    /// Produced by the escalator rather than a routed specialist
    #[serde(default)]
    pub escalated: bool,
}

// ============================================================================
// Run state
// ============================================================================

/// Accumulating record of one logical conversation session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunState {
    pub session_id: String,

    // Query
    pub query: String,
    pub enriched_query: String,
    pub user_clarification: String,
    pub conversation_turns: u32,

    // Classification
    pub can_self_answer: bool,
    pub is_ambiguous: bool,
    pub is_critical: bool,
    pub clarifying_question: String,
    pub subtasks: Vec<String>,

    // Routing
    pub selected_models: Vec<String>,
    pub similarity_scores: BTreeMap<String, f32>,

    // Execution
    pub worker_responses: Vec<WorkerResponse>,
    pub aggregated_response: Option<String>,
    pub final_response: Option<String>,

    // Quality control
    pub judge_score: Option<f64>,
    pub judge_dimensions: BTreeMap<String, f64>,
    pub judge_feedback: String,
    pub escalation_model: Option<String>,
    pub escalation_instruction: String,
    pub escalation_count: u32,

    // Accounting
    pub total_cost: f64,
    pub total_latency: f64,

    // Observability
    pub trace: Vec<TraceEntry>,

    /// Fatal error that stopped the run, if any
    pub error: Option<String>,
}

impl RunState {
    /// Create an empty state for a new session
    pub fn new(session_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            query: query.into(),
            ..Default::default()
        }
    }

    /// Query text downstream stages should work on
    pub fn effective_query(&self) -> &str {
        if self.enriched_query.is_empty() {
            &self.query
        } else {
            &self.enriched_query
        }
    }

    /// Text of the most recent worker response
    pub fn last_worker_text(&self) -> Option<&str> {
        self.worker_responses.last().map(|w| w.text.as_str())
    }

    /// Models actually called by workers and the escalator, in call order
    pub fn used_models(&self) -> Vec<String> {
        self.worker_responses.iter().map(|w| w.model.clone()).collect()
    }

    /// Fold a stage's partial output into the state.
    pub fn apply(&mut self, update: StageUpdate) {
        assign(&mut self.enriched_query, update.enriched_query);
        assign(&mut self.user_clarification, update.user_clarification);
        assign(&mut self.conversation_turns, update.conversation_turns);

        assign(&mut self.can_self_answer, update.can_self_answer);
        assign(&mut self.is_ambiguous, update.is_ambiguous);
        assign(&mut self.is_critical, update.is_critical);
        assign(&mut self.clarifying_question, update.clarifying_question);
        assign(&mut self.subtasks, update.subtasks);

        assign(&mut self.selected_models, update.selected_models);
        for (class, score) in update.similarity_scores {
            self.similarity_scores
                .entry(class)
                .and_modify(|best| {
                    if score > *best {
                        *best = score;
                    }
                })
                .or_insert(score);
        }

        self.worker_responses.extend(update.worker_responses);
        if update.aggregated_response.is_some() {
            self.aggregated_response = update.aggregated_response;
        }
        if update.final_response.is_some() {
            self.final_response = update.final_response;
        }

        if update.judge_score.is_some() {
            self.judge_score = update.judge_score;
        }
        assign(&mut self.judge_dimensions, update.judge_dimensions);
        assign(&mut self.judge_feedback, update.judge_feedback);
        if update.escalation_model.is_some() {
            self.escalation_model = update.escalation_model;
        }
        assign(&mut self.escalation_instruction, update.escalation_instruction);
        if let Some(count) = update.escalation_count {
            self.escalation_count = self.escalation_count.max(count);
        }

        self.total_cost += non_negative(update.cost_delta);
        self.total_latency += non_negative(update.latency_delta);

        self.trace.extend(update.trace);

        if update.error.is_some() {
            self.error = update.error;
        }
    }
}

fn assign<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

/// Accumulator deltas are never allowed to shrink a total.
fn non_negative(delta: f64) -> f64 {
    if delta.is_finite() && delta > 0.0 {
        delta
    } else {
        0.0
    }
}

// ============================================================================
// Stage update
// ============================================================================

/// Partial output of one stage execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageUpdate {
    pub enriched_query: Option<String>,
    pub user_clarification: Option<String>,
    pub conversation_turns: Option<u32>,

    pub can_self_answer: Option<bool>,
    pub is_ambiguous: Option<bool>,
    pub is_critical: Option<bool>,
    pub clarifying_question: Option<String>,
    pub subtasks: Option<Vec<String>>,

    pub selected_models: Option<Vec<String>>,
    pub similarity_scores: BTreeMap<String, f32>,

    pub worker_responses: Vec<WorkerResponse>,
    pub aggregated_response: Option<String>,
    pub final_response: Option<String>,

    pub judge_score: Option<f64>,
    pub judge_dimensions: Option<BTreeMap<String, f64>>,
    pub judge_feedback: Option<String>,
    pub escalation_model: Option<String>,
    pub escalation_instruction: Option<String>,
    pub escalation_count: Option<u32>,

    /// Cost added by this stage (USD)
    pub cost_delta: f64,

    /// Latency added by this stage (seconds)
    pub latency_delta: f64,

    pub trace: Vec<TraceEntry>,
    pub error: Option<String>,
}

impl StageUpdate {
    /// Update carrying a single trace entry
    pub fn traced(stage: Stage, outcome: StageOutcome, detail: impl Into<String>) -> Self {
        Self {
            trace: vec![TraceEntry::new(stage, outcome, detail)],
            ..Default::default()
        }
    }

    pub fn with_cost(mut self, cost_usd: f64) -> Self {
        self.cost_delta = cost_usd;
        self
    }

    pub fn with_latency(mut self, seconds: f64) -> Self {
        self.latency_delta = seconds;
        self
    }
}
