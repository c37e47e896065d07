//! Semantic routing stage: one specialist model per (sub)query.

use std::collections::BTreeMap;

use futures::future::join_all;
use nexus_core::{RunState, Stage, StageOutcome, StageUpdate};
use nexus_semantic::SemanticError;
use tracing::{info, warn};

use super::StageContext;

/// Route the query, or each subtask independently.
///
/// Fails only when the router has no usable prototype index; a (sub)query
/// that cannot be embedded falls back to the default class.
pub async fn route(ctx: &StageContext, state: &RunState) -> Result<StageUpdate, SemanticError> {
    if !ctx.router.is_ready() {
        return Err(SemanticError::IndexNotBuilt);
    }

    let texts: Vec<&str> = if state.subtasks.is_empty() {
        vec![state.effective_query()]
    } else {
        state.subtasks.iter().map(String::as_str).collect()
    };

    let decisions = join_all(texts.iter().map(|text| ctx.router.route(text))).await;

    let default_class = &ctx.config.orchestration.default_class;
    let default_model = ctx
        .config
        .model_for_class(default_class)
        .unwrap_or_else(|| ctx.config.models.default_worker.clone());

    let mut selected_models = Vec::with_capacity(texts.len());
    let mut classes = Vec::with_capacity(texts.len());
    let mut similarity_scores: BTreeMap<String, f32> = BTreeMap::new();

    for (text, decision) in texts.iter().zip(decisions) {
        match decision {
            Ok(decision) => {
                for (class, score) in decision.class_scores {
                    similarity_scores
                        .entry(class)
                        .and_modify(|best| *best = best.max(score))
                        .or_insert(score);
                }
                classes.push(decision.class);
                selected_models.push(decision.model);
            }
            Err(e) if e.is_index_unavailable() => return Err(e),
            Err(e) => {
                warn!("Routing failed for '{}', using default class {}: {}", text, default_class, e);
                classes.push(default_class.clone());
                selected_models.push(default_model.clone());
            }
        }
    }

    let detail = format!("classes=[{}] models=[{}]", classes.join(", "), selected_models.join(", "));
    info!("Routed {} text(s): {}", texts.len(), detail);

    let cost = ctx.config.orchestration.embedding_cost_per_query * texts.len() as f64;

    Ok(StageUpdate {
        selected_models: Some(selected_models),
        similarity_scores,
        ..StageUpdate::traced(Stage::Router, StageOutcome::Routed, detail)
    }
    .with_cost(cost))
}
