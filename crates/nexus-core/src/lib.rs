//! Core types and abstractions for the Nexus routing orchestrator.
//!
//! This crate provides the run state threaded through every orchestration
//! stage together with its merge rules, the configuration system, the model
//! catalog and the checkpoint stores used to suspend and resume sessions.

pub mod catalog;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod state;

pub use catalog::{CatalogEntry, ModelPricing};
pub use checkpoint::{
    Checkpoint, CheckpointStore, Claim, FileCheckpointStore, InMemoryCheckpointStore,
    SessionStatus,
};
pub use config::NexusConfig;
pub use error::{CoreError, Result};
pub use state::{RunState, Stage, StageOutcome, StageUpdate, TraceEntry, WorkerResponse};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::checkpoint::{Checkpoint, CheckpointStore, Claim, SessionStatus};
    pub use crate::config::NexusConfig;
    pub use crate::error::{CoreError, Result};
    pub use crate::state::{RunState, Stage, StageOutcome, StageUpdate, TraceEntry, WorkerResponse};
}
