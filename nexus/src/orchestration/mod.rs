//! Orchestration Engine
//!
//! Drives a query through the stage state machine:
//!
//! - classifier: self-answer goes straight to the finalizer, an ambiguous
//!   query suspends for clarification, anything else is routed
//! - clarification: suspends; `resume` re-enters at the router
//! - router: one specialist per (sub)query, then a single worker or a
//!   parallel fan-out followed by the aggregator
//! - judge: critical queries only; a failed verdict escalates while the
//!   escalation ceiling allows it
//! - finalizer: picks the answer and ends the run
//!
//! `start` and `resume` return a stream of [`RunEvent`]s. Suspension persists
//! the whole run state through a [`CheckpointStore`], so a session may be
//! resumed by another process sharing the store. [`benchmark`] replays
//! labelled queries through the same machine.

use std::pin::Pin;
use std::sync::Arc;

use async_stream::stream;
use futures::Stream;
use nexus_core::checkpoint::{
    Checkpoint, CheckpointStore, Claim, FileCheckpointStore, InMemoryCheckpointStore,
    SessionStatus,
};
use nexus_core::config::CheckpointBackend;
use nexus_core::{CoreError, NexusConfig, RunState, Stage, StageOutcome, StageUpdate, TraceEntry};
use nexus_semantic::{EmbeddingProvider, KnnRouter, PrototypeIndex};
use tracing::{error, info, warn};

use crate::gateway::CompletionGateway;
use crate::stages::{
    aggregator, clarification, classifier, execution, finalizer, judge, routing, StageContext,
};

pub mod benchmark;
pub mod events;

pub use benchmark::{BenchmarkCase, BenchmarkReport, BenchmarkSummary, FailureKind};
pub use events::{FinalAnswer, HealthReport, ModelInfo, RunEvent, RunOutcome};

/// Result type for orchestration operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

/// Orchestration errors
#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    #[error("Routing unavailable: {0}")]
    RoutingUnavailable(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session {session_id} is not awaiting clarification (status: {status:?})")]
    NotSuspended {
        session_id: String,
        status: SessionStatus,
    },

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Boxed event stream of one run.
pub type RunStream = Pin<Box<dyn Stream<Item = RunEvent> + Send>>;

/// Open the checkpoint store selected by the configuration.
pub async fn open_checkpoint_store(config: &NexusConfig) -> Result<Arc<dyn CheckpointStore>> {
    match config.checkpoint.backend {
        CheckpointBackend::Memory => Ok(Arc::new(InMemoryCheckpointStore::new())),
        CheckpointBackend::File => {
            let store = FileCheckpointStore::open(config.checkpoint_dir()?).await?;
            Ok(Arc::new(store))
        }
    }
}

/// Main orchestrator; cheap to clone, every session shares the same index.
#[derive(Clone)]
pub struct Orchestrator {
    ctx: StageContext,
    store: Arc<dyn CheckpointStore>,
}

impl Orchestrator {
    /// Create an orchestrator around an already built router
    pub fn new(
        config: NexusConfig,
        gateway: Arc<dyn CompletionGateway>,
        router: KnnRouter,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            ctx: StageContext::new(Arc::new(config), gateway, Arc::new(router)),
            store,
        }
    }

    /// Build the prototype index from the configured catalog and create the
    /// orchestrator.
    ///
    /// A failed index build is logged and leaves routing unavailable; runs
    /// then fail at the router instead of the process refusing to start.
    pub async fn bootstrap(
        config: NexusConfig,
        gateway: Arc<dyn CompletionGateway>,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        let router = match PrototypeIndex::build(embedder.as_ref(), &config.catalog()).await {
            Ok(index) => KnnRouter::new(embedder, Arc::new(index), config.orchestration.knn_k),
            Err(e) => {
                error!("Failed to build prototype index, routing disabled: {}", e);
                KnnRouter::without_index(embedder)
            }
        };
        Self::new(config, gateway, router, store)
    }

    pub fn config(&self) -> &NexusConfig {
        &self.ctx.config
    }

    /// Start a new session.
    pub fn start(&self, session_id: impl Into<String>, query: impl Into<String>) -> RunStream {
        let state = RunState::new(session_id, query);
        info!("Starting session {}", state.session_id);
        self.clone().drive(state, None, Stage::Classifier)
    }

    /// Resume a session suspended for clarification.
    ///
    /// A missing or blank answer lets the run proceed on a best guess. The
    /// session is claimed atomically first, so of two concurrent resumes one
    /// gets [`OrchestrationError::NotSuspended`].
    pub async fn resume(&self, session_id: &str, answer: Option<&str>) -> Result<RunStream> {
        let checkpoint = match self
            .store
            .claim(session_id)
            .await
            .map_err(|e| OrchestrationError::Checkpoint(e.to_string()))?
        {
            Claim::Claimed(checkpoint) => checkpoint,
            Claim::NotFound => return Err(OrchestrationError::SessionNotFound(session_id.to_string())),
            Claim::Unavailable(status) => {
                return Err(OrchestrationError::NotSuspended {
                    session_id: session_id.to_string(),
                    status,
                });
            }
        };

        let resume_at = checkpoint.resume_at.unwrap_or(Stage::Router);
        let state = checkpoint.state;

        info!("Resuming session {} at {}", session_id, resume_at);
        let update = clarification::resume(&state, answer);
        Ok(self.clone().drive(state, Some(update), resume_at))
    }

    /// Reopen a session whose resume was claimed but never finished, e.g.
    /// because the resuming process died.
    pub async fn release(&self, session_id: &str) -> Result<()> {
        let released = self
            .store
            .release(session_id)
            .await
            .map_err(|e| OrchestrationError::Checkpoint(e.to_string()))?;
        if released {
            warn!("Session {} released for another resume", session_id);
            return Ok(());
        }

        let checkpoint = self.checkpoint(session_id).await?;
        if checkpoint.status == SessionStatus::AwaitingClarification {
            return Ok(());
        }
        Err(OrchestrationError::NotSuspended {
            session_id: session_id.to_string(),
            status: checkpoint.status,
        })
    }

    /// Start a session and wait for its outcome.
    pub async fn run(&self, session_id: impl Into<String>, query: impl Into<String>) -> RunOutcome {
        RunOutcome::collect(self.start(session_id, query)).await
    }

    /// Resume a session and wait for its outcome.
    pub async fn run_resume(&self, session_id: &str, answer: Option<&str>) -> Result<RunOutcome> {
        let events = self.resume(session_id, answer).await?;
        Ok(RunOutcome::collect(events).await)
    }

    /// Persisted trace of a suspended or finished session
    pub async fn trace(&self, session_id: &str) -> Result<Vec<TraceEntry>> {
        Ok(self.checkpoint(session_id).await?.state.trace)
    }

    /// Latest persisted checkpoint of a session
    pub async fn checkpoint(&self, session_id: &str) -> Result<Checkpoint> {
        self.store
            .load(session_id)
            .await
            .map_err(|e| OrchestrationError::Checkpoint(e.to_string()))?
            .ok_or_else(|| OrchestrationError::SessionNotFound(session_id.to_string()))
    }

    /// Capability classes with their specialist models and pricing
    pub fn models(&self) -> Vec<ModelInfo> {
        let config = &self.ctx.config;
        config
            .catalog()
            .into_iter()
            .map(|entry| ModelInfo {
                pricing: config.price_for(&entry.model),
                class: entry.class,
                model: entry.model,
            })
            .collect()
    }

    pub fn health(&self) -> HealthReport {
        let router = &self.ctx.router;
        let embedding = router.embedding_model();
        HealthReport {
            index_loaded: router.is_ready(),
            vectors: router.index().map_or(0, |index| index.len()),
            classes: router.index().map_or(0, |index| index.class_models().len()),
            knn_k: router.k(),
            embedding_model: format!("{}/{}", embedding.provider, embedding.model_name),
        }
    }

    async fn archive(&self, state: &RunState, status: SessionStatus) {
        if let Err(e) = self.store.save(&Checkpoint::archived(state.clone(), status)).await {
            warn!("Failed to archive session {}: {}", state.session_id, e);
        }
    }

    /// Run the state machine from `stage` until a terminal event.
    fn drive(self, mut state: RunState, initial: Option<StageUpdate>, stage: Stage) -> RunStream {
        Box::pin(stream! {
            if let Some(update) = initial {
                for event in apply(&mut state, update) {
                    yield event;
                }
            }

            let ctx = self.ctx.clone();
            let mut stage = stage;
            loop {
                stage = match stage {
                    Stage::Classifier => {
                        let update = classifier::classify(&ctx, &state).await;
                        for event in apply(&mut state, update) {
                            yield event;
                        }
                        if state.can_self_answer && state.final_response.is_some() {
                            Stage::Finalizer
                        } else if state.is_ambiguous {
                            Stage::Clarification
                        } else {
                            Stage::Router
                        }
                    }
                    Stage::Clarification => {
                        let question = clarification::clarifying_question(&state);
                        for event in apply(&mut state, clarification::suspend(&question)) {
                            yield event;
                        }

                        let checkpoint = Checkpoint::suspended(state.clone(), question.clone(), Stage::Router);
                        match self.store.save(&checkpoint).await {
                            Ok(()) => {
                                info!("Session {} suspended for clarification", state.session_id);
                                yield RunEvent::ClarificationRequested {
                                    session_id: state.session_id.clone(),
                                    question,
                                };
                            }
                            Err(e) => {
                                error!("Failed to suspend session {}: {}", state.session_id, e);
                                yield RunEvent::Failed {
                                    message: OrchestrationError::Checkpoint(e.to_string()).to_string(),
                                };
                            }
                        }
                        return;
                    }
                    Stage::Router => match routing::route(&ctx, &state).await {
                        Ok(update) => {
                            for event in apply(&mut state, update) {
                                yield event;
                            }
                            if state.subtasks.is_empty() {
                                Stage::Worker
                            } else {
                                Stage::ParallelWorkers
                            }
                        }
                        Err(e) => {
                            let message = OrchestrationError::RoutingUnavailable(e.to_string()).to_string();
                            error!("Session {} failed: {}", state.session_id, message);

                            let update = StageUpdate {
                                error: Some(message.clone()),
                                ..StageUpdate::traced(Stage::Router, StageOutcome::Error, message.clone())
                            };
                            for event in apply(&mut state, update) {
                                yield event;
                            }
                            self.archive(&state, SessionStatus::Failed).await;
                            yield RunEvent::Failed { message };
                            return;
                        }
                    },
                    Stage::Worker => {
                        let update = execution::run_single(&ctx, &state).await;
                        for event in apply(&mut state, update) {
                            yield event;
                        }
                        if state.is_critical { Stage::Judge } else { Stage::Finalizer }
                    }
                    Stage::ParallelWorkers => {
                        let update = execution::run_parallel(&ctx, &state).await;
                        for event in apply(&mut state, update) {
                            yield event;
                        }
                        Stage::Aggregator
                    }
                    Stage::Aggregator => {
                        let update = aggregator::aggregate(&ctx, &state).await;
                        for event in apply(&mut state, update) {
                            yield event;
                        }
                        if state.is_critical { Stage::Judge } else { Stage::Finalizer }
                    }
                    Stage::Judge => {
                        let update = judge::judge(&ctx, &state).await;
                        for event in apply(&mut state, update) {
                            yield event;
                        }
                        if judge::should_escalate(&state, &ctx.config) {
                            Stage::Escalator
                        } else {
                            Stage::Finalizer
                        }
                    }
                    Stage::Escalator => {
                        let update = judge::escalate(&ctx, &state).await;
                        for event in apply(&mut state, update) {
                            yield event;
                        }
                        // The aggregate outranks the escalated answer, so a new
                        // verdict would re-score the same text
                        let rejudge = state.aggregated_response.is_none()
                            && state.escalation_count < ctx.config.orchestration.max_escalations;
                        if rejudge {
                            Stage::Judge
                        } else {
                            Stage::Finalizer
                        }
                    }
                    Stage::Finalizer => {
                        let update = finalizer::finalize(&state);
                        for event in apply(&mut state, update) {
                            yield event;
                        }
                        self.archive(&state, SessionStatus::Completed).await;

                        let answer = FinalAnswer::from_state(&state, ctx.config.orchestration.baseline_cost);
                        info!(
                            "Session {} completed: cost=${:.6} latency={:.2}s escalations={}",
                            state.session_id, answer.total_cost, answer.total_latency, answer.escalation_count
                        );
                        yield RunEvent::Completed(answer);
                        return;
                    }
                };
            }
        })
    }
}

/// Fold `update` into `state` and report its trace entries as events.
fn apply(state: &mut RunState, update: StageUpdate) -> Vec<RunEvent> {
    let events = update
        .trace
        .iter()
        .map(|entry| RunEvent::StageCompleted {
            stage: entry.stage,
            outcome: entry.outcome,
            detail: entry.detail.clone(),
        })
        .collect();
    state.apply(update);
    events
}
