//! Error types for semantic routing.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SemanticError>;

#[derive(Debug, Error)]
pub enum SemanticError {
    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Prototype index has not been built")]
    IndexNotBuilt,

    #[error("Catalog contains no prototypes")]
    EmptyCatalog,

    #[error("Invalid dimension: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SemanticError {
    /// Routing cannot proceed at all, as opposed to a per-query failure
    pub fn is_index_unavailable(&self) -> bool {
        matches!(self, Self::IndexNotBuilt)
    }
}
