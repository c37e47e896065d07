//! # Nexus
//!
//! Adaptive LLM routing orchestrator. A query is classified by a cheap model,
//! optionally clarified with the user, routed to specialist models by
//! nearest-neighbour voting over embedded example queries, answered by one
//! specialist or a parallel fan-out, quality-gated by a judge for critical
//! queries and escalated to a stronger model when the judge rejects it.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use nexus::gateway::OpenAiCompatibleGateway;
//! use nexus::orchestration::{Orchestrator, RunOutcome};
//! use nexus_core::{InMemoryCheckpointStore, NexusConfig};
//! use nexus_semantic::MockProvider;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = NexusConfig::default();
//! let gateway = Arc::new(OpenAiCompatibleGateway::new(&config)?);
//! let embedder = Arc::new(MockProvider::new(256));
//! let store = Arc::new(InMemoryCheckpointStore::new());
//!
//! let orchestrator = Orchestrator::bootstrap(config, gateway, embedder, store).await;
//! if let RunOutcome::Completed(answer) = orchestrator.run("session-1", "write quicksort in python").await {
//!     println!("{} (${:.6})", answer.text, answer.total_cost);
//! }
//! # Ok(())
//! # }
//! ```

pub mod gateway;
pub mod orchestration;
pub mod stages;

pub use gateway::{ChatMessage, Completion, CompletionGateway, CompletionRequest, GatewayError};
pub use orchestration::{
    FinalAnswer, OrchestrationError, Orchestrator, RunEvent, RunOutcome, RunStream,
};
