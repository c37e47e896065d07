//! Orchestration stages.
//!
//! Each stage reads the current [`RunState`](nexus_core::RunState) and returns
//! a [`StageUpdate`](nexus_core::StageUpdate); the orchestrator folds updates
//! into the state and picks the next stage. Stages never fail the run except
//! the router when no prototype index is available: upstream failures degrade
//! to safe defaults inside the stage.

use std::sync::Arc;
use std::time::Duration;

use nexus_core::NexusConfig;
use nexus_semantic::KnnRouter;
use tokio::time::Instant;

use crate::gateway::{self, Completion, CompletionGateway, CompletionRequest, GatewayError};

pub mod aggregator;
pub mod classifier;
pub mod clarification;
pub mod execution;
pub mod finalizer;
pub mod judge;
pub mod json;
pub mod routing;

/// Shared collaborators handed to every stage.
#[derive(Clone)]
pub struct StageContext {
    pub config: Arc<NexusConfig>,
    pub gateway: Arc<dyn CompletionGateway>,
    pub router: Arc<KnnRouter>,
}

impl StageContext {
    pub fn new(
        config: Arc<NexusConfig>,
        gateway: Arc<dyn CompletionGateway>,
        router: Arc<KnnRouter>,
    ) -> Self {
        Self {
            config,
            gateway,
            router,
        }
    }

    /// Per-call timeout for upstream completions
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.config.orchestration.worker_timeout_secs)
    }
}

/// Gateway call bounded by `timeout`, with its measured wall-clock time.
pub async fn timed_call(
    gateway: &dyn CompletionGateway,
    request: CompletionRequest,
    timeout: Duration,
) -> (gateway::Result<Completion>, Duration) {
    let started = Instant::now();
    let result = match tokio::time::timeout(timeout, gateway.complete(request)).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::Timeout(timeout)),
    };
    (result, started.elapsed())
}
