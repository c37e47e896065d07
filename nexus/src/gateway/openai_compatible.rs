//! Gateway for OpenAI-compatible `/chat/completions` endpoints.
//!
//! Groq, Cerebras, OpenAI, Gemini (OpenAI shim) and OpenRouter all speak the
//! same wire format, so one client covers every provider prefix.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use nexus_core::catalog::{lookup_pricing, ModelPricing};
use nexus_core::config::{NexusConfig, ProviderConfig};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{ChatMessage, Completion, CompletionGateway, CompletionRequest, GatewayError, Result, TokenUsage};

pub struct OpenAiCompatibleGateway {
    client: Client,
    providers: Vec<ProviderConfig>,
    pricing: BTreeMap<String, ModelPricing>,
    /// Keys set explicitly, by provider prefix; take precedence over the environment
    api_keys: HashMap<String, String>,
}

#[derive(Serialize)]
struct ChatRequestBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponseBody {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<UsageBody>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct UsageBody {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

impl OpenAiCompatibleGateway {
    /// Build a gateway for the providers and pricing of `config`.
    ///
    /// The HTTP client timeout is a backstop; stages enforce their own.
    pub fn new(config: &NexusConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.orchestration.worker_timeout_secs * 2))
            .build()?;

        Ok(Self {
            client,
            providers: config.providers.clone(),
            pricing: config.pricing.clone(),
            api_keys: HashMap::new(),
        })
    }

    /// Use `key` for `prefix` instead of reading the provider's env var
    pub fn with_api_key(mut self, prefix: impl Into<String>, key: impl Into<String>) -> Self {
        self.api_keys.insert(prefix.into(), key.into());
        self
    }

    /// Provider serving `model` and the model id it expects.
    fn resolve<'a>(&'a self, model: &'a str) -> Result<(&'a ProviderConfig, &'a str)> {
        self.providers
            .iter()
            .find_map(|provider| {
                model
                    .strip_prefix(provider.prefix.as_str())
                    .and_then(|rest| rest.strip_prefix('/'))
                    .map(|upstream| (provider, upstream))
            })
            .ok_or_else(|| GatewayError::UnknownProvider(model.to_string()))
    }

    fn api_key(&self, provider: &ProviderConfig) -> Result<String> {
        if let Some(key) = self.api_keys.get(&provider.prefix) {
            return Ok(key.clone());
        }
        std::env::var(&provider.api_key_env)
            .ok()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| GatewayError::MissingApiKey(provider.api_key_env.clone()))
    }

    fn cost(&self, model: &str, usage: TokenUsage) -> f64 {
        match lookup_pricing(&self.pricing, model) {
            Some(pricing) => pricing.cost(usage.prompt_tokens, usage.completion_tokens),
            None => {
                debug!("No pricing for {}, attributing zero cost", model);
                0.0
            }
        }
    }

    fn parse_response(&self, requested: &str, body: ChatResponseBody) -> Result<Completion> {
        let text = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| GatewayError::MalformedResponse("response has no message content".to_string()))?;

        let usage = body
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        // Price against the requested id; providers often echo a bare model name
        let cost_usd = self.cost(requested, usage);

        Ok(Completion {
            model: body.model.unwrap_or_else(|| requested.to_string()),
            text,
            usage,
            cost_usd,
        })
    }
}

#[async_trait]
impl CompletionGateway for OpenAiCompatibleGateway {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion> {
        let (provider, upstream_model) = self.resolve(&request.model)?;
        let api_key = self.api_key(provider)?;
        let url = format!("{}/chat/completions", provider.base_url.trim_end_matches('/'));

        debug!("POST {} model={} json={}", url, upstream_model, request.json_response);

        let body = ChatRequestBody {
            model: upstream_model,
            messages: &request.messages,
            response_format: request
                .json_response
                .then_some(ResponseFormat { kind: "json_object" }),
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!("{} returned {}", request.model, status);
            return Err(GatewayError::Provider {
                status: status.as_u16(),
                message,
            });
        }

        let body: ChatResponseBody = response
            .json()
            .await
            .map_err(|e| GatewayError::MalformedResponse(e.to_string()))?;

        self.parse_response(&request.model, body)
    }
}
