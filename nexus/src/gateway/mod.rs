//! Completion gateway.
//!
//! Every LLM call made by the orchestrator goes through [`CompletionGateway`],
//! a single async method taking a model id and chat messages. Model ids carry
//! their provider as a prefix (`groq/...`, `openai/...`); the gateway decides
//! where the request goes and attributes its cost.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod openai_compatible;

pub use openai_compatible::OpenAiCompatibleGateway;

/// Result type for gateway calls
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Gateway errors
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider returned {status}: {message}")]
    Provider { status: u16, message: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("No provider configured for model '{0}'")]
    UnknownProvider(String),

    #[error("API key not set: {0}")]
    MissingApiKey(String),
}

// ============================================================================
// Request / response types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// One chat completion call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Provider-prefixed model id
    pub model: String,
    pub messages: Vec<ChatMessage>,
    /// Ask the provider for a JSON object response
    #[serde(default)]
    pub json_response: bool,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            json_response: false,
        }
    }

    /// Single user message request
    pub fn prompt(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self::new(model, vec![ChatMessage::user(prompt)])
    }

    pub fn json(mut self) -> Self {
        self.json_response = true;
        self
    }

    /// Concatenated message contents, handy for logging and matching
    pub fn transcript(&self) -> String {
        self.messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Generated text with its accounting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    /// Model that actually served the call
    pub model: String,
    pub text: String,
    pub usage: TokenUsage,
    pub cost_usd: f64,
}

/// Chat-completion backend used by every stage.
#[async_trait]
pub trait CompletionGateway: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion>;
}
