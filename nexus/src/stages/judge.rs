//! Quality gate: judge a candidate answer and escalate failures.

use std::collections::BTreeMap;

use nexus_core::config::NexusConfig;
use nexus_core::{RunState, Stage, StageOutcome, StageUpdate, WorkerResponse};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::json::{number_field, number_value, parse_object, str_field};
use super::{timed_call, StageContext};
use crate::gateway::{ChatMessage, CompletionRequest};

/// Candidate text when nothing was produced.
pub const NO_RESPONSE: &str = "No response generated.";

const SYSTEM_ERROR_INSTRUCTION: &str = "Retry with a highly intelligent model.";

const DIMENSIONS: &[&str] = &["accuracy", "completeness", "reasoning_depth"];

/// The judge's assessment of one answer.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    /// Overall quality on a 0-10 scale
    pub score: f64,
    pub dimensions: BTreeMap<String, f64>,
    pub failure_reason: String,
    pub retry_instruction: String,
    /// Model to retry with
    pub escalate_to: String,
}

impl Verdict {
    /// Read a verdict from model output.
    ///
    /// A missing score counts as zero; a blank `escalate_to` becomes
    /// `fallback_model`.
    pub fn from_json(text: &str, fallback_model: &str) -> Option<Self> {
        let object = parse_object(text)?;

        let score = number_field(&object, "score").unwrap_or(0.0).clamp(0.0, 10.0);

        let mut dimensions = BTreeMap::new();
        if let Some(Value::Object(reported)) = object.get("dimensions") {
            for name in DIMENSIONS {
                if let Some(value) = reported.get(*name).and_then(number_value) {
                    dimensions.insert(name.to_string(), value.clamp(0.0, 10.0));
                }
            }
        }

        Some(Self {
            score,
            dimensions,
            failure_reason: str_field(&object, "failure_reason").unwrap_or_default(),
            retry_instruction: str_field(&object, "retry_instruction").unwrap_or_default(),
            escalate_to: str_field(&object, "escalate_to")
                .unwrap_or_else(|| fallback_model.to_string()),
        })
    }

    /// Fail-closed verdict used when the judge itself could not run.
    pub fn system_error(reason: impl std::fmt::Display, fallback_model: &str) -> Self {
        Self {
            score: 0.0,
            dimensions: BTreeMap::new(),
            failure_reason: format!("Evaluation system error: {}", reason),
            retry_instruction: SYSTEM_ERROR_INSTRUCTION.to_string(),
            escalate_to: fallback_model.to_string(),
        }
    }

    pub fn passed(&self, threshold: f64) -> bool {
        self.score >= threshold
    }
}

/// Answer the judge evaluates: aggregate, else last worker output.
pub fn candidate(state: &RunState) -> &str {
    state
        .aggregated_response
        .as_deref()
        .or_else(|| state.last_worker_text())
        .unwrap_or(NO_RESPONSE)
}

/// Escalate iff the query is critical, the last verdict failed and the
/// ceiling allows another attempt.
pub fn should_escalate(state: &RunState, config: &NexusConfig) -> bool {
    let failed = state
        .judge_score
        .is_some_and(|score| score < config.orchestration.judge_threshold);
    state.is_critical && failed && state.escalation_count < config.orchestration.max_escalations
}

fn judge_prompt(query: &str, answer: &str) -> String {
    format!(
        "Evaluate the answer an agent gave to the query below. Respond with a single JSON object containing only:\n\
         - score: number from 0 to 10, overall quality\n\
         - dimensions: object with accuracy, completeness and reasoning_depth, each 0 to 10\n\
         - failure_reason: string, why the answer falls short, empty if it is good\n\
         - retry_instruction: string, what a new attempt must do better, empty if it is good\n\
         - escalate_to: string, a more capable model to retry with\n\n\
         Query: {}\n\
         Answer: {}",
        query, answer
    )
}

/// Run the judge stage.
pub async fn judge(ctx: &StageContext, state: &RunState) -> StageUpdate {
    let config = &ctx.config;
    let model = config.models.judge.as_str();
    let fallback = config.models.escalation_fallback.as_str();
    let threshold = config.orchestration.judge_threshold;

    let request = CompletionRequest::new(
        model,
        vec![
            ChatMessage::system(format!(
                "You are a strict evaluator. Any score below {} must come with a failure_reason and a retry_instruction.",
                threshold
            )),
            ChatMessage::user(judge_prompt(state.effective_query(), candidate(state))),
        ],
    )
    .json();

    let (result, elapsed) = timed_call(ctx.gateway.as_ref(), request, ctx.call_timeout()).await;

    let (verdict, cost, latency) = match result {
        Ok(completion) => match Verdict::from_json(&completion.text, fallback) {
            Some(verdict) => (verdict, completion.cost_usd, elapsed.as_secs_f64()),
            None => {
                warn!("Judge returned malformed JSON, failing closed");
                debug!("Judge output: {}", completion.text);
                (
                    Verdict::system_error("malformed judge response", fallback),
                    completion.cost_usd,
                    elapsed.as_secs_f64(),
                )
            }
        },
        Err(e) => {
            warn!("Judge call failed, failing closed: {}", e);
            (Verdict::system_error(e, fallback), 0.0, 0.0)
        }
    };

    verdict_update(verdict, threshold)
        .with_cost(cost)
        .with_latency(latency)
}

fn verdict_update(verdict: Verdict, threshold: f64) -> StageUpdate {
    let passed = verdict.passed(threshold);
    let (outcome, detail) = if passed {
        (StageOutcome::Approved, format!("score {:.1}, passed", verdict.score))
    } else {
        (
            StageOutcome::Rejected,
            format!("score {:.1}, reason: {}", verdict.score, verdict.failure_reason),
        )
    };
    info!("Judge {}", detail);

    let mut update = StageUpdate {
        judge_score: Some(verdict.score),
        judge_dimensions: Some(verdict.dimensions),
        judge_feedback: Some(verdict.failure_reason),
        ..StageUpdate::traced(Stage::Judge, outcome, detail)
    };
    if !passed {
        update.escalation_model = Some(verdict.escalate_to);
        update.escalation_instruction = Some(verdict.retry_instruction);
    }
    update
}

/// Retry the query once with the escalation model.
pub async fn escalate(ctx: &StageContext, state: &RunState) -> StageUpdate {
    let model = state
        .escalation_model
        .clone()
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| ctx.config.models.escalation_fallback.clone());

    let prompt = format!(
        "Previous attempt failed: {}. Fix this specifically and address the query below.\n\nQuery: {}",
        state.escalation_instruction,
        state.effective_query()
    );
    let request = CompletionRequest::prompt(model.as_str(), prompt);

    let (result, elapsed) = timed_call(ctx.gateway.as_ref(), request, ctx.call_timeout()).await;

    let (text, cost, latency) = match result {
        Ok(completion) => (completion.text, completion.cost_usd.max(0.0), elapsed.as_secs_f64()),
        Err(e) => {
            warn!("Escalation to {} failed: {}", model, e);
            (format!("Escalation failed entirely: {}", e), 0.0, 0.0)
        }
    };

    let count = state.escalation_count + 1;
    let detail = format!("used {} after judge rejection (escalation {})", model, count);
    info!("Escalator {}", detail);

    let response = WorkerResponse {
        model,
        text: text.clone(),
        cost_usd: cost,
        latency_ms: latency * 1000.0,
        subtask: None,
        escalated: true,
    };

    StageUpdate {
        final_response: Some(text),
        worker_responses: vec![response],
        escalation_count: Some(count),
        ..StageUpdate::traced(Stage::Escalator, StageOutcome::Escalated, detail)
    }
    .with_cost(cost)
    .with_latency(latency)
}
