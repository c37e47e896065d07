//! Specialist execution: one call for a plain query, a concurrent fan-out for
//! a decomposed one.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use nexus_core::{RunState, Stage, StageOutcome, StageUpdate, WorkerResponse};
use tracing::{debug, info, warn};

use super::{timed_call, StageContext};
use crate::gateway::{ChatMessage, CompletionGateway, CompletionRequest, GatewayError};

/// Text recorded for a call that hit its timeout.
pub const TIMEOUT_SENTINEL: &str = "[timeout]";

/// Run one specialist call and contain its failure.
async fn invoke(
    gateway: &dyn CompletionGateway,
    model: String,
    request: CompletionRequest,
    timeout: Duration,
    subtask: Option<String>,
) -> WorkerResponse {
    let (result, elapsed) = timed_call(gateway, request, timeout).await;

    let (text, cost_usd, latency) = match result {
        Ok(completion) => {
            debug!("{} served by {}", model, completion.model);
            (completion.text, completion.cost_usd.max(0.0), elapsed)
        }
        Err(GatewayError::Timeout(limit)) => {
            warn!("{} timed out after {:?}", model, limit);
            (TIMEOUT_SENTINEL.to_string(), 0.0, limit)
        }
        Err(e) => {
            warn!("{} failed: {}", model, e);
            (format!("Error: {}", e), 0.0, elapsed)
        }
    };

    WorkerResponse {
        model,
        text,
        cost_usd,
        latency_ms: latency.as_secs_f64() * 1000.0,
        subtask,
        escalated: false,
    }
}

/// Model assigned to subtask `index`: its routed model, else the last routed
/// model, else the default worker.
pub fn model_for_subtask(state: &RunState, index: usize, default_worker: &str) -> String {
    state
        .selected_models
        .get(index)
        .or_else(|| state.selected_models.last())
        .cloned()
        .unwrap_or_else(|| default_worker.to_string())
}

/// Answer the undivided query with the routed specialist.
pub async fn run_single(ctx: &StageContext, state: &RunState) -> StageUpdate {
    let model = model_for_subtask(state, 0, &ctx.config.models.default_worker);
    let request = CompletionRequest::prompt(model.as_str(), state.effective_query());

    let response = invoke(ctx.gateway.as_ref(), model, request, ctx.call_timeout(), None).await;

    let detail = format!(
        "model={} latency={:.0}ms cost=${:.6}",
        response.model, response.latency_ms, response.cost_usd
    );
    info!("Worker completed: {}", detail);

    let cost = response.cost_usd;
    let latency = response.latency_ms / 1000.0;

    StageUpdate {
        worker_responses: vec![response],
        ..StageUpdate::traced(Stage::Worker, StageOutcome::Completed, detail)
    }
    .with_cost(cost)
    .with_latency(latency)
}

fn subtask_request(model: &str, query: &str, subtask: &str) -> CompletionRequest {
    CompletionRequest::new(
        model,
        vec![
            ChatMessage::system(format!(
                "You are a specialist working on one part of a larger request. Address only this subtask: {}",
                subtask
            )),
            ChatMessage::user(format!(
                "Original query: {}\nYour part: {}",
                query, subtask
            )),
        ],
    )
}

/// Answer every subtask concurrently, one task per subtask.
///
/// Results come back in subtask order whatever the completion order. A task
/// that dies is recorded as an error response of its model.
pub async fn run_parallel(ctx: &StageContext, state: &RunState) -> StageUpdate {
    let query = state.effective_query();
    let timeout = ctx.call_timeout();

    let tasks: Vec<_> = state
        .subtasks
        .iter()
        .enumerate()
        .map(|(index, subtask)| {
            let model = model_for_subtask(state, index, &ctx.config.models.default_worker);
            let request = subtask_request(&model, query, subtask);
            let gateway = Arc::clone(&ctx.gateway);
            let task_model = model.clone();
            let task_subtask = subtask.clone();

            debug!("Dispatching subtask {} to {}", index + 1, model);
            let handle = tokio::spawn(async move {
                invoke(gateway.as_ref(), task_model, request, timeout, Some(task_subtask)).await
            });
            (model, subtask.clone(), handle)
        })
        .collect();

    let responses: Vec<WorkerResponse> = join_all(tasks.into_iter().map(
        |(model, subtask, handle)| async move {
            match handle.await {
                Ok(response) => response,
                Err(e) => {
                    warn!("Worker task for {} did not complete: {}", model, e);
                    WorkerResponse {
                        model,
                        text: format!("Error: worker task failed: {}", e),
                        cost_usd: 0.0,
                        latency_ms: 0.0,
                        subtask: Some(subtask),
                        escalated: false,
                    }
                }
            }
        },
    ))
    .await;

    let cost: f64 = responses.iter().map(|r| r.cost_usd).sum();
    let latency = responses
        .iter()
        .map(|r| r.latency_ms / 1000.0)
        .fold(0.0, f64::max);

    let detail = format!("{} agents dispatched", responses.len());
    info!("Parallel workers completed: {} (cost=${:.6})", detail, cost);

    StageUpdate {
        worker_responses: responses,
        ..StageUpdate::traced(Stage::ParallelWorkers, StageOutcome::FanOut, detail)
    }
    .with_cost(cost)
    .with_latency(latency)
}
