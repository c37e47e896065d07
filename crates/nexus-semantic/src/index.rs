//! Flat prototype index with brute-force cosine search.
//!
//! The index is built once at startup and never mutated afterwards, so it can
//! be shared behind an `Arc` by every session without locking.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use nexus_core::catalog::CatalogEntry;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, SemanticError};
use crate::providers::EmbeddingProvider;
use crate::Vector;

/// Cosine similarity of two vectors; zero when either has no magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
    }
}

/// One labelled prototype vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prototype {
    pub class: String,
    pub vector: Vector,
}

/// A prototype matched by a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    /// Position of the prototype in the index
    pub position: usize,
    pub class: String,
    pub similarity: f32,
}

/// Immutable mapping of capability classes to prototype embeddings.
#[derive(Debug, Clone)]
pub struct PrototypeIndex {
    dimension: usize,
    prototypes: Vec<Prototype>,
    models: BTreeMap<String, String>,
}

impl PrototypeIndex {
    /// Embed every catalog example and store all `(vector, class)` pairs.
    ///
    /// Each class is embedded in one batch call.
    pub async fn build(provider: &dyn EmbeddingProvider, catalog: &[CatalogEntry]) -> Result<Self> {
        let mut prototypes = Vec::new();
        let mut models = BTreeMap::new();

        for entry in catalog {
            if entry.examples.is_empty() {
                continue;
            }
            let vectors = provider.embed_batch(&entry.examples).await?;
            if vectors.len() != entry.examples.len() {
                return Err(SemanticError::Embedding(format!(
                    "Expected {} embeddings for class '{}', got {}",
                    entry.examples.len(),
                    entry.class,
                    vectors.len()
                )));
            }
            debug!("Embedded {} prototypes for class {}", vectors.len(), entry.class);

            models.insert(entry.class.clone(), entry.model.clone());
            prototypes.extend(vectors.into_iter().map(|vector| Prototype {
                class: entry.class.clone(),
                vector,
            }));
        }

        let index = Self::from_prototypes(prototypes, models)?;
        info!(
            "Prototype index built: {} vectors across {} classes",
            index.len(),
            index.models.len()
        );
        Ok(index)
    }

    /// Assemble an index from precomputed prototypes.
    ///
    /// Classes missing from `models` map to a model named after the class.
    pub fn from_prototypes(
        prototypes: Vec<Prototype>,
        mut models: BTreeMap<String, String>,
    ) -> Result<Self> {
        let first = prototypes.first().ok_or(SemanticError::EmptyCatalog)?;
        let dimension = first.vector.len();

        for prototype in &prototypes {
            if prototype.vector.len() != dimension {
                return Err(SemanticError::DimensionMismatch {
                    expected: dimension,
                    got: prototype.vector.len(),
                });
            }
            models
                .entry(prototype.class.clone())
                .or_insert_with(|| prototype.class.clone());
        }

        Ok(Self {
            dimension,
            prototypes,
            models,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.prototypes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prototypes.is_empty()
    }

    /// Capability classes with their specialist models
    pub fn class_models(&self) -> &BTreeMap<String, String> {
        &self.models
    }

    /// Specialist model designated for a class
    pub fn model_for(&self, class: &str) -> Option<&str> {
        self.models.get(class).map(String::as_str)
    }

    /// The `k` prototypes most similar to `query`, most similar first.
    ///
    /// Equal similarities keep index order, so results are fully
    /// deterministic for a fixed index and query.
    pub fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if query.len() != self.dimension {
            return Err(SemanticError::DimensionMismatch {
                expected: self.dimension,
                got: query.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = self
            .prototypes
            .iter()
            .enumerate()
            .map(|(position, prototype)| {
                let similarity = cosine_similarity(query, &prototype.vector);
                let similarity = if similarity.is_nan() {
                    f32::NEG_INFINITY
                } else {
                    similarity
                };
                (position, similarity)
            })
            .collect();

        // Stable sort: ties stay in index order
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(position, similarity)| Neighbor {
                position,
                class: self.prototypes[position].class.clone(),
                similarity,
            })
            .collect())
    }
}
