//! Synthesis of parallel worker outputs.

use nexus_core::{RunState, Stage, StageOutcome, StageUpdate, WorkerResponse};
use tracing::{info, warn};

use super::{timed_call, StageContext};
use crate::gateway::{ChatMessage, CompletionRequest};

/// Responses produced by the latest fan-out.
fn fan_out_responses(state: &RunState) -> &[WorkerResponse] {
    let count = state.subtasks.len().min(state.worker_responses.len());
    let count = if count == 0 {
        state.worker_responses.len()
    } else {
        count
    };
    &state.worker_responses[state.worker_responses.len() - count..]
}

fn labelled(responses: &[WorkerResponse]) -> String {
    responses
        .iter()
        .enumerate()
        .map(|(i, response)| {
            let label = response
                .subtask
                .clone()
                .unwrap_or_else(|| format!("Agent {}", i + 1));
            format!("[{}]: {}", label, response.text)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Raw outputs kept verbatim when the synthesis call fails.
fn raw_outputs(responses: &[WorkerResponse]) -> String {
    responses
        .iter()
        .enumerate()
        .map(|(i, response)| format!("[Agent {}] {}", i + 1, response.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Merge the parallel responses into one answer.
pub async fn aggregate(ctx: &StageContext, state: &RunState) -> StageUpdate {
    let model = ctx.config.models.aggregator.as_str();
    let responses = fan_out_responses(state);

    let request = CompletionRequest::new(
        model,
        vec![
            ChatMessage::system(
                "Combine the agent responses below into one answer. Remove redundancy and keep every insight.",
            ),
            ChatMessage::user(format!(
                "Query: {}\n\nAgent responses:\n{}",
                state.effective_query(),
                labelled(responses)
            )),
        ],
    );

    let (result, elapsed) = timed_call(ctx.gateway.as_ref(), request, ctx.call_timeout()).await;

    let (text, cost, latency) = match result {
        Ok(completion) => (completion.text, completion.cost_usd, elapsed.as_secs_f64()),
        Err(e) => {
            warn!("Aggregation failed, returning raw outputs: {}", e);
            (
                format!(
                    "Error during aggregation: {}\n\nRaw outputs:\n{}",
                    e,
                    raw_outputs(responses)
                ),
                0.0,
                0.0,
            )
        }
    };

    let detail = format!("merged {} responses using {}", responses.len(), model);
    info!("Aggregator {}", detail);

    StageUpdate {
        aggregated_response: Some(text),
        ..StageUpdate::traced(Stage::Aggregator, StageOutcome::Merged, detail)
    }
    .with_cost(cost)
    .with_latency(latency)
}
