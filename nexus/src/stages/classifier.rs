//! Query classification.
//!
//! One cheap structured call decides whether the query can be answered on the
//! spot, needs a human clarification, is critical enough for the quality
//! gate, and whether it splits into independent subtasks.

use nexus_core::{RunState, Stage, StageOutcome, StageUpdate};
use tracing::{debug, info, warn};

use super::json::{bool_field, parse_object, str_field, string_list_field};
use super::{timed_call, StageContext};
use crate::gateway::CompletionRequest;

const GREETINGS: &[&str] = &[
    "hi",
    "hello",
    "hey",
    "yo",
    "good morning",
    "good afternoon",
    "good evening",
    "how are you",
    "how are you doing",
    "whats up",
    "what's up",
];

const GREETING_PREFIXES: &[&str] = &["hi ", "hello ", "hey "];

/// Decision extracted from the classifier's answer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classification {
    pub can_self_answer: bool,
    pub self_answer: Option<String>,
    pub is_ambiguous: bool,
    pub clarifying_question: Option<String>,
    pub is_critical: bool,
    pub subtasks: Vec<String>,
}

impl Classification {
    /// Read a classification from model output; `None` if it is not a JSON object.
    pub fn from_json(text: &str) -> Option<Self> {
        let object = parse_object(text)?;
        Some(Self {
            can_self_answer: bool_field(&object, "can_self_answer").unwrap_or(false),
            self_answer: str_field(&object, "self_answer"),
            is_ambiguous: bool_field(&object, "is_ambiguous").unwrap_or(false),
            clarifying_question: str_field(&object, "clarifying_question"),
            is_critical: bool_field(&object, "is_critical").unwrap_or(false),
            subtasks: string_list_field(&object, "subtasks"),
        })
    }
}

/// Whether `query` is plain small talk a classifier may answer directly.
pub fn is_small_talk(query: &str) -> bool {
    let normalized = query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    if normalized.is_empty() {
        return false;
    }

    GREETINGS.contains(&normalized.as_str())
        || GREETING_PREFIXES
            .iter()
            .any(|prefix| normalized.starts_with(prefix))
}

fn prompt(query: &str) -> String {
    format!(
        "Classify the query below. Respond with a single JSON object and nothing else, using exactly these keys:\n\
         - can_self_answer: boolean, true only for a greeting or trivial small talk you can answer right away\n\
         - self_answer: string or null, your reply when can_self_answer is true\n\
         - is_ambiguous: boolean, true when the query is missing details a human must supply\n\
         - clarifying_question: string or null, what to ask the user when is_ambiguous is true\n\
         - is_critical: boolean, true for sensitive data, important logic, or medical, legal or financial topics\n\
         - subtasks: array of strings, one per independent part of a multi-part query, empty otherwise\n\n\
         Query: {}",
        query
    )
}

/// Run the classifier stage.
pub async fn classify(ctx: &StageContext, state: &RunState) -> StageUpdate {
    let model = &ctx.config.models.classifier;
    let request = CompletionRequest::prompt(model.as_str(), prompt(&state.query)).json();

    let (result, elapsed) = timed_call(ctx.gateway.as_ref(), request, ctx.call_timeout()).await;

    let (classification, cost, latency) = match result {
        Ok(completion) => match Classification::from_json(&completion.text) {
            Some(classification) => (classification, completion.cost_usd, elapsed.as_secs_f64()),
            None => {
                warn!("Classifier returned malformed JSON, using safe defaults");
                debug!("Classifier output: {}", completion.text);
                (Classification::default(), completion.cost_usd, elapsed.as_secs_f64())
            }
        },
        Err(e) => {
            warn!("Classifier call failed, using safe defaults: {}", e);
            (Classification::default(), 0.0, 0.0)
        }
    };

    apply_rules(state, classification)
        .with_cost(cost)
        .with_latency(latency)
}

/// Guardrails layered over the model's decision.
fn apply_rules(state: &RunState, classification: Classification) -> StageUpdate {
    let can_self_answer = classification.can_self_answer && is_small_talk(&state.query);
    // A clarified query is never sent back for another round
    let is_ambiguous = classification.is_ambiguous && state.conversation_turns == 0;

    let self_answer = if can_self_answer {
        classification.self_answer
    } else {
        None
    };

    let detail = format!(
        "self={} ambiguous={} critical={} subtasks={}",
        can_self_answer,
        is_ambiguous,
        classification.is_critical,
        classification.subtasks.len()
    );
    info!("Classified query: {}", detail);

    let outcome = if self_answer.is_some() {
        StageOutcome::SelfAnswered
    } else {
        StageOutcome::Classified
    };

    StageUpdate {
        can_self_answer: Some(can_self_answer),
        is_ambiguous: Some(is_ambiguous),
        is_critical: Some(classification.is_critical),
        clarifying_question: Some(classification.clarifying_question.unwrap_or_default()),
        subtasks: Some(classification.subtasks),
        final_response: self_answer,
        ..StageUpdate::traced(Stage::Classifier, outcome, detail)
    }
}
