//! Semantic routing for Nexus.
//!
//! This crate turns a natural-language (sub)query into a capability class by
//! nearest-neighbour voting over embedded prototype queries:
//!
//! - **Embedding Providers**: generate vector embeddings from text
//! - **Prototype Index**: immutable flat index of labelled prototype vectors,
//!   built once at startup from the model catalog
//! - **Router**: embeds a query, takes the top-k most similar prototypes and
//!   votes the winning class
//! - **Evaluation**: routing accuracy over labelled queries
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use nexus_core::catalog::default_catalog;
//! use nexus_semantic::{KnnRouter, MockProvider, PrototypeIndex};
//!
//! # async fn example() -> nexus_semantic::Result<()> {
//! let provider = Arc::new(MockProvider::new(256));
//! let index = PrototypeIndex::build(provider.as_ref(), &default_catalog()).await?;
//! let router = KnnRouter::new(provider, Arc::new(index), 5);
//!
//! let decision = router.route("write quicksort in python").await?;
//! println!("{} -> {}", decision.class, decision.model);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod eval;
pub mod index;
pub mod providers;
pub mod router;

pub use error::{Result, SemanticError};
pub use eval::{default_benchmark, evaluate_routing, LabelledQuery, ModelAccuracy, RoutingCase, RoutingReport};
pub use index::{cosine_similarity, Neighbor, Prototype, PrototypeIndex};
pub use providers::{EmbeddingModel, EmbeddingProvider, MockProvider, OpenAIConfig, OpenAIProvider};
pub use router::{plurality_vote, KnnRouter, RouteDecision, DEFAULT_K};

/// A vector embedding.
pub type Vector = Vec<f32>;
