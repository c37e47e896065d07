//! KNN router: embed, take the top-k prototypes, vote.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SemanticError};
use crate::index::{Neighbor, PrototypeIndex};
use crate::providers::{EmbeddingModel, EmbeddingProvider};

/// Default neighbourhood size.
pub const DEFAULT_K: usize = 5;

/// Outcome of routing one text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDecision {
    /// Winning capability class
    pub class: String,

    /// Specialist model designated for the class
    pub model: String,

    /// Neighbours that took part in the vote, most similar first
    pub neighbors: Vec<Neighbor>,

    /// Best similarity reached by each class among the neighbours
    pub class_scores: BTreeMap<String, f32>,
}

/// Most frequent class among `neighbors`.
///
/// On a tie the class reached first in the (descending) neighbour order wins.
pub fn plurality_vote(neighbors: &[Neighbor]) -> Option<&str> {
    let mut tally: Vec<(&str, usize)> = Vec::new();
    for neighbor in neighbors {
        match tally.iter_mut().find(|(class, _)| *class == neighbor.class) {
            Some((_, count)) => *count += 1,
            None => tally.push((neighbor.class.as_str(), 1)),
        }
    }

    let mut winner: Option<(&str, usize)> = None;
    for (class, count) in tally {
        match winner {
            Some((_, best)) if count <= best => {}
            _ => winner = Some((class, count)),
        }
    }
    winner.map(|(class, _)| class)
}

fn class_scores(neighbors: &[Neighbor]) -> BTreeMap<String, f32> {
    let mut scores: BTreeMap<String, f32> = BTreeMap::new();
    for neighbor in neighbors {
        scores
            .entry(neighbor.class.clone())
            .and_modify(|s| *s = s.max(neighbor.similarity))
            .or_insert(neighbor.similarity);
    }
    scores
}

/// Routes texts to specialist models by nearest-neighbour voting.
///
/// Stateless after construction; safe to share across sessions.
#[derive(Clone)]
pub struct KnnRouter {
    provider: Arc<dyn EmbeddingProvider>,
    index: Option<Arc<PrototypeIndex>>,
    k: usize,
}

impl KnnRouter {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, index: Arc<PrototypeIndex>, k: usize) -> Self {
        Self {
            provider,
            index: Some(index),
            k: k.max(1),
        }
    }

    /// A router whose index failed to build. Every route call fails.
    pub fn without_index(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            provider,
            index: None,
            k: DEFAULT_K,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.index.as_ref().is_some_and(|index| !index.is_empty())
    }

    pub fn index(&self) -> Option<&Arc<PrototypeIndex>> {
        self.index.as_ref()
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn embedding_model(&self) -> &EmbeddingModel {
        self.provider.model()
    }

    fn ready_index(&self) -> Result<&PrototypeIndex> {
        match self.index.as_deref() {
            Some(index) if !index.is_empty() => Ok(index),
            _ => Err(SemanticError::IndexNotBuilt),
        }
    }

    /// Embed `text` and route it.
    pub async fn route(&self, text: &str) -> Result<RouteDecision> {
        // Fail fast without paying for an embedding
        self.ready_index()?;
        let vector = self.provider.embed(text).await?;
        self.route_vector(&vector)
    }

    /// Route an already embedded query.
    pub fn route_vector(&self, vector: &[f32]) -> Result<RouteDecision> {
        let index = self.ready_index()?;
        let neighbors = index.nearest(vector, self.k)?;

        let class = plurality_vote(&neighbors)
            .ok_or(SemanticError::IndexNotBuilt)?
            .to_string();
        let model = index.model_for(&class).unwrap_or(class.as_str()).to_string();
        let class_scores = class_scores(&neighbors);

        debug!(
            "Routed to {} ({}) with {} neighbours",
            class,
            model,
            neighbors.len()
        );

        Ok(RouteDecision {
            class,
            model,
            neighbors,
            class_scores,
        })
    }
}

impl std::fmt::Debug for KnnRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnnRouter")
            .field("provider", &self.provider.model())
            .field("index_len", &self.index.as_ref().map(|i| i.len()))
            .field("k", &self.k)
            .finish()
    }
}
