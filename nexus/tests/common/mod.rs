//! Common test utilities for orchestrator integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nexus::gateway::{Completion, CompletionGateway, CompletionRequest, GatewayError, TokenUsage};
use nexus::orchestration::Orchestrator;
use nexus_core::catalog::CatalogEntry;
use nexus_core::checkpoint::{CheckpointStore, InMemoryCheckpointStore};
use nexus_core::NexusConfig;
use nexus_semantic::{KnnRouter, MockProvider, PrototypeIndex};
use parking_lot::Mutex;

pub const CLASSIFIER: &str = "test/classifier";
pub const AGGREGATOR: &str = "test/aggregator";
pub const JUDGE: &str = "test/judge";
pub const ESCALATION: &str = "test/opus";
pub const CODER: &str = "groq/coder";
pub const HISTORIAN: &str = "cerebras/historian";
pub const GENERALIST: &str = "groq/generalist";

/// Scripted reply of the fake gateway
#[derive(Debug, Clone)]
pub enum Reply {
    Text { text: String, cost: f64 },
    Fail(String),
    Delayed { delay: Duration, text: String },
    Panic,
}

impl Reply {
    pub fn text(text: &str, cost: f64) -> Self {
        Self::Text {
            text: text.to_string(),
            cost,
        }
    }

    pub fn fail(message: &str) -> Self {
        Self::Fail(message.to_string())
    }

    pub fn delayed(delay: Duration, text: &str) -> Self {
        Self::Delayed {
            delay,
            text: text.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct Rule {
    model: String,
    contains: Option<String>,
    reply: Reply,
}

/// Completion gateway answering from a script and recording every call.
///
/// Rules with a `contains` filter are tried before plain per-model rules.
#[derive(Default)]
pub struct ScriptedGateway {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply to every call to `model`
    pub fn on(self, model: &str, reply: Reply) -> Self {
        self.rules.lock().push(Rule {
            model: model.to_string(),
            contains: None,
            reply,
        });
        self
    }

    /// Reply to calls to `model` whose messages contain `needle`
    pub fn on_contains(self, model: &str, needle: &str, reply: Reply) -> Self {
        self.rules.lock().push(Rule {
            model: model.to_string(),
            contains: Some(needle.to_string()),
            reply,
        });
        self
    }

    pub fn calls(&self) -> Vec<CompletionRequest> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, model: &str) -> Vec<CompletionRequest> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.model == model)
            .cloned()
            .collect()
    }

    fn find(&self, request: &CompletionRequest) -> Option<Reply> {
        let rules = self.rules.lock();
        let transcript = request.transcript();
        rules
            .iter()
            .filter(|r| r.model == request.model)
            .find(|r| r.contains.as_ref().is_some_and(|n| transcript.contains(n.as_str())))
            .or_else(|| {
                rules
                    .iter()
                    .find(|r| r.model == request.model && r.contains.is_none())
            })
            .map(|r| r.reply.clone())
    }
}

#[async_trait]
impl CompletionGateway for ScriptedGateway {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, GatewayError> {
        self.calls.lock().push(request.clone());
        let reply = self.find(&request);

        let (text, cost) = match reply {
            Some(Reply::Text { text, cost }) => (text, cost),
            Some(Reply::Fail(message)) => {
                return Err(GatewayError::Provider {
                    status: 500,
                    message,
                });
            }
            Some(Reply::Delayed { delay, text }) => {
                tokio::time::sleep(delay).await;
                (text, 0.0)
            }
            Some(Reply::Panic) => panic!("scripted panic for {}", request.model),
            None => {
                return Err(GatewayError::Provider {
                    status: 404,
                    message: format!("no scripted reply for {}", request.model),
                });
            }
        };

        Ok(Completion {
            model: request.model,
            text,
            usage: TokenUsage::default(),
            cost_usd: cost,
        })
    }
}

/// Configuration with dedicated test models and a small catalog
pub fn test_config() -> NexusConfig {
    let mut config = NexusConfig::default();
    config.models.classifier = CLASSIFIER.to_string();
    config.models.aggregator = AGGREGATOR.to_string();
    config.models.judge = JUDGE.to_string();
    config.models.escalation_fallback = ESCALATION.to_string();
    config.models.default_worker = GENERALIST.to_string();
    config.orchestration.default_class = "simple_qa".to_string();
    config.catalog = vec![
        CatalogEntry::new(
            "code",
            CODER,
            &[
                "write quicksort in python",
                "write a python function",
                "fix this rust bug",
                "python code review",
            ],
        ),
        CatalogEntry::new(
            "history",
            HISTORIAN,
            &[
                "causes of world war one",
                "economic impact of the war",
                "history of the roman empire",
                "causes of the french revolution",
            ],
        ),
        CatalogEntry::new(
            "simple_qa",
            GENERALIST,
            &[
                "what is the capital of france",
                "capital city of spain",
                "how many days in a year",
            ],
        ),
    ];
    config
}

/// Classifier JSON for a plain, single-path query
pub fn classification(critical: bool, subtasks: &[&str]) -> String {
    serde_json::json!({
        "can_self_answer": false,
        "self_answer": null,
        "is_ambiguous": false,
        "clarifying_question": null,
        "is_critical": critical,
        "subtasks": subtasks,
    })
    .to_string()
}

pub fn verdict(score: f64, instruction: &str) -> String {
    serde_json::json!({
        "score": score,
        "dimensions": {"accuracy": score, "completeness": score, "reasoning_depth": score},
        "failure_reason": if score < 7.0 { "not good enough" } else { "" },
        "retry_instruction": instruction,
        "escalate_to": ESCALATION,
    })
    .to_string()
}

pub async fn router(config: &NexusConfig) -> KnnRouter {
    let embedder = Arc::new(MockProvider::new(256));
    let index = PrototypeIndex::build(embedder.as_ref(), &config.catalog())
        .await
        .expect("test catalog builds");
    KnnRouter::new(embedder, Arc::new(index), config.orchestration.knn_k)
}

pub async fn orchestrator_with(
    config: NexusConfig,
    gateway: Arc<ScriptedGateway>,
    store: Arc<dyn CheckpointStore>,
) -> Orchestrator {
    let router = router(&config).await;
    Orchestrator::new(config, gateway, router, store)
}

pub async fn orchestrator(gateway: Arc<ScriptedGateway>) -> Orchestrator {
    orchestrator_with(test_config(), gateway, Arc::new(InMemoryCheckpointStore::new())).await
}
