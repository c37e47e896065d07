//! Human-in-the-loop clarification.

use nexus_core::{RunState, Stage, StageOutcome, StageUpdate};

/// Answer assumed when the user resumes without saying anything.
pub const DEFAULT_CLARIFICATION: &str = "please proceed with best guess";

/// Question to put to the user for an ambiguous query.
pub fn clarifying_question(state: &RunState) -> String {
    let question = state.clarifying_question.trim();
    if question.is_empty() {
        format!(
            "Your query '{}' is ambiguous. Could you please provide more details?",
            state.query
        )
    } else {
        question.to_string()
    }
}

/// Update recorded when the run suspends on `question`.
pub fn suspend(question: &str) -> StageUpdate {
    StageUpdate {
        clarifying_question: Some(question.to_string()),
        ..StageUpdate::traced(Stage::Clarification, StageOutcome::Suspended, question)
    }
}

/// Fold the user's answer into the query.
pub fn resume(state: &RunState, answer: Option<&str>) -> StageUpdate {
    let clarification = answer
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .unwrap_or(DEFAULT_CLARIFICATION)
        .to_string();

    let enriched = format!("{} [Clarified: {}]", state.query, clarification);
    let detail: String = clarification.chars().take(80).collect();

    StageUpdate {
        user_clarification: Some(clarification),
        enriched_query: Some(enriched),
        conversation_turns: Some(state.conversation_turns + 1),
        ..StageUpdate::traced(Stage::Clarification, StageOutcome::Resumed, detail)
    }
}
