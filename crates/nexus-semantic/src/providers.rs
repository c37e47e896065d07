//! Embedding providers for generating vector embeddings.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, SemanticError};
use crate::Vector;

/// Embedding model identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmbeddingModel {
    pub provider: String,
    pub model_name: String,
    pub dimension: usize,
}

impl EmbeddingModel {
    pub fn new(provider: impl Into<String>, model_name: impl Into<String>, dimension: usize) -> Self {
        Self {
            provider: provider.into(),
            model_name: model_name.into(),
            dimension,
        }
    }
}

/// Trait for embedding providers.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embedding for a single text.
    async fn embed(&self, text: &str) -> Result<Vector>;

    /// Generate embeddings for multiple texts (batched).
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vector>>;

    /// Get the embedding model information.
    fn model(&self) -> &EmbeddingModel;

    /// Get the embedding dimension.
    fn dimension(&self) -> usize {
        self.model().dimension
    }
}

// ============================================================================
// OpenAI
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIConfig {
    /// API key (can be set via OPENAI_API_KEY env var)
    pub api_key: Option<String>,

    /// Model name
    pub model: String,

    /// API endpoint
    pub endpoint: String,

    /// Dimension override
    pub dimension: Option<usize>,

    /// Request timeout in seconds
    pub timeout_seconds: u64,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            model: "text-embedding-3-small".to_string(),
            endpoint: "https://api.openai.com/v1/embeddings".to_string(),
            dimension: None,
            timeout_seconds: 30,
        }
    }
}

/// OpenAI embedding provider.
pub struct OpenAIProvider {
    client: Client,
    api_key: String,
    config: OpenAIConfig,
    model: EmbeddingModel,
}

#[derive(Serialize)]
struct OpenAIRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    data: Vec<OpenAIEmbedding>,
}

#[derive(Deserialize)]
struct OpenAIEmbedding {
    embedding: Vec<f32>,
}

impl OpenAIProvider {
    pub fn new(config: OpenAIConfig) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            SemanticError::Config("OpenAI API key not configured".to_string())
        })?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        let dimension = config.dimension.unwrap_or(match config.model.as_str() {
            "text-embedding-3-large" => 3072,
            _ => 1536,
        });

        let model = EmbeddingModel::new("openai", &config.model, dimension);

        info!("Initialized OpenAI provider with model: {}", config.model);

        Ok(Self {
            client,
            api_key,
            config,
            model,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    async fn embed(&self, text: &str) -> Result<Vector> {
        let embeddings = self.embed_batch(&[text.to_string()]).await?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| SemanticError::Embedding("Provider returned no embedding".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vector>> {
        debug!("Generating {} embeddings with OpenAI", texts.len());

        let request = OpenAIRequest {
            input: texts,
            model: &self.config.model,
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(SemanticError::Provider(format!(
                "OpenAI API error: {}",
                error_text
            )));
        }

        let response: OpenAIResponse = response.json().await?;

        let embeddings = response
            .data
            .into_iter()
            .map(|e| e.embedding)
            .collect::<Vec<_>>();

        if embeddings.len() != texts.len() {
            return Err(SemanticError::Provider(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                embeddings.len()
            )));
        }

        Ok(embeddings)
    }

    fn model(&self) -> &EmbeddingModel {
        &self.model
    }
}

// ============================================================================
// Mock
// ============================================================================

/// Deterministic bag-of-words embedder.
///
/// Every lower-cased word is hashed into one of `dimension` buckets, so texts
/// sharing vocabulary end up close in cosine space. Good enough for offline
/// runs and tests; it carries no real semantics.
pub struct MockProvider {
    model: EmbeddingModel,
    dimension: usize,
}

impl MockProvider {
    pub fn new(dimension: usize) -> Self {
        let dimension = dimension.max(1);
        Self {
            model: EmbeddingModel::new("mock", "bag-of-words", dimension),
            dimension,
        }
    }

    fn generate_embedding(&self, text: &str) -> Vector {
        let mut embedding = vec![0.0; self.dimension];

        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let word = word.to_lowercase();
            // FNV-1a keeps bucket assignment stable across runs and platforms
            let hash = word.bytes().fold(0xcbf2_9ce4_8422_2325u64, |acc, b| {
                (acc ^ b as u64).wrapping_mul(0x0100_0000_01b3)
            });
            embedding[(hash % self.dimension as u64) as usize] += 1.0;
        }

        let norm = (embedding.iter().map(|x| x * x).sum::<f32>()).sqrt();
        if norm > 0.0 {
            embedding.iter_mut().for_each(|x| *x /= norm);
        }

        embedding
    }
}

#[async_trait]
impl EmbeddingProvider for MockProvider {
    async fn embed(&self, text: &str) -> Result<Vector> {
        Ok(self.generate_embedding(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vector>> {
        Ok(texts.iter().map(|t| self.generate_embedding(t)).collect())
    }

    fn model(&self) -> &EmbeddingModel {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::cosine_similarity;

    #[tokio::test]
    async fn test_mock_provider() {
        let provider = MockProvider::new(128);
        assert_eq!(provider.dimension(), 128);

        let embedding = provider.embed("test").await.unwrap();
        assert_eq!(embedding.len(), 128);

        // Same text should produce same embedding
        let embedding2 = provider.embed("test").await.unwrap();
        assert_eq!(embedding, embedding2);

        // Different text should produce different embedding
        let embedding3 = provider.embed("something different entirely").await.unwrap();
        assert_ne!(embedding, embedding3);
    }

    #[tokio::test]
    async fn test_mock_provider_shared_words_are_closer() {
        let provider = MockProvider::new(256);
        let query = provider.embed("write a python function").await.unwrap();
        let code = provider.embed("write quicksort in python").await.unwrap();
        let history = provider.embed("causes of world war one").await.unwrap();

        assert!(cosine_similarity(&query, &code) > cosine_similarity(&query, &history));
    }

    #[tokio::test]
    async fn test_mock_provider_case_insensitive() {
        let provider = MockProvider::new(64);
        let lower = provider.embed("hello world").await.unwrap();
        let upper = provider.embed("Hello, WORLD!").await.unwrap();
        assert_eq!(lower, upper);
    }

    #[tokio::test]
    async fn test_mock_provider_batch() {
        let provider = MockProvider::new(128);
        let texts = vec!["hello".to_string(), "brave new world".to_string()];

        let embeddings = provider.embed_batch(&texts).await.unwrap();
        assert_eq!(embeddings.len(), 2);
        assert_eq!(embeddings[0].len(), 128);
        assert_ne!(embeddings[0], embeddings[1]);
    }

    #[test]
    fn test_openai_provider_requires_key() {
        let config = OpenAIConfig {
            api_key: None,
            ..Default::default()
        };
        assert!(matches!(
            OpenAIProvider::new(config),
            Err(SemanticError::Config(_))
        ));
    }
}
