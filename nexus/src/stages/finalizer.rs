//! Final answer selection.

use nexus_core::{RunState, Stage, StageOutcome, StageUpdate};

use super::judge::NO_RESPONSE;

/// Answer text and the field it came from.
///
/// Aggregate first, then the last worker response, then an answer set
/// earlier (self-answer), then the placeholder.
pub fn select(state: &RunState) -> (&str, &'static str) {
    if let Some(aggregated) = state.aggregated_response.as_deref() {
        return (aggregated, "aggregated");
    }
    if let Some(last) = state.last_worker_text() {
        return (last, "worker");
    }
    if let Some(existing) = state.final_response.as_deref() {
        return (existing, "existing");
    }
    (NO_RESPONSE, "none")
}

pub fn finalize(state: &RunState) -> StageUpdate {
    let (text, source) = select(state);
    StageUpdate {
        final_response: Some(text.to_string()),
        ..StageUpdate::traced(Stage::Finalizer, StageOutcome::Finalized, format!("source={}", source))
    }
}
