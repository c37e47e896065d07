//! Routing accuracy evaluation.
//!
//! Runs labelled queries through a [`KnnRouter`] and reports how often the
//! routed model matches the expected specialist, per expected model and
//! overall. No completion is requested, so an evaluation only costs
//! embeddings.

use std::collections::BTreeMap;

use nexus_core::catalog::{
    MODEL_GEMINI_FLASH, MODEL_GPT4O, MODEL_GPT_OSS, MODEL_KIMI_K2, MODEL_LLAMA_GROQ, MODEL_OPUS,
    MODEL_QWEN_235B,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, SemanticError};
use crate::router::KnnRouter;

/// A query with the model it should be routed to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelledQuery {
    pub query: String,
    pub expected_model: String,
}

impl LabelledQuery {
    pub fn new(query: impl Into<String>, expected_model: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            expected_model: expected_model.into(),
        }
    }
}

/// Outcome of routing one labelled query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingCase {
    pub query: String,
    pub expected_model: String,
    /// `None` when the query could not be embedded
    pub routed_model: Option<String>,
    pub routed_class: Option<String>,
    pub correct: bool,
    /// Best similarity among the consulted neighbours
    pub top_score: f32,
    pub error: Option<String>,
}

/// Hits per expected model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelAccuracy {
    pub expected: usize,
    pub correct: usize,
}

/// Routing accuracy across a set of labelled queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingReport {
    pub total: usize,
    pub correct: usize,
    /// Queries that failed to embed
    pub errors: usize,
    pub accuracy_pct: f64,
    pub mean_top_score: f64,
    pub per_model: BTreeMap<String, ModelAccuracy>,
    pub cases: Vec<RoutingCase>,
}

impl RoutingReport {
    pub fn from_cases(cases: Vec<RoutingCase>) -> Self {
        let total = cases.len();
        let correct = cases.iter().filter(|c| c.correct).count();
        let errors = cases.iter().filter(|c| c.error.is_some()).count();

        let mut per_model: BTreeMap<String, ModelAccuracy> = BTreeMap::new();
        for case in &cases {
            let entry = per_model.entry(case.expected_model.clone()).or_default();
            entry.expected += 1;
            if case.correct {
                entry.correct += 1;
            }
        }

        let (accuracy_pct, mean_top_score) = if total == 0 {
            (0.0, 0.0)
        } else {
            let score_sum: f64 = cases.iter().map(|c| c.top_score as f64).sum();
            (
                correct as f64 / total as f64 * 100.0,
                score_sum / total as f64,
            )
        };

        Self {
            total,
            correct,
            errors,
            accuracy_pct,
            mean_top_score,
            per_model,
            cases,
        }
    }
}

/// Route every query and compare against its label.
///
/// A missing index fails the whole evaluation; an embedding failure only
/// marks its own case.
pub async fn evaluate_routing(router: &KnnRouter, queries: &[LabelledQuery]) -> Result<RoutingReport> {
    if !router.is_ready() {
        return Err(SemanticError::IndexNotBuilt);
    }

    let mut cases = Vec::with_capacity(queries.len());
    for labelled in queries {
        let case = match router.route(&labelled.query).await {
            Ok(decision) => {
                let top_score = decision
                    .neighbors
                    .iter()
                    .map(|n| n.similarity)
                    .fold(0.0f32, f32::max);
                debug!(
                    "'{}' -> {} (expected {})",
                    labelled.query, decision.model, labelled.expected_model
                );
                RoutingCase {
                    query: labelled.query.clone(),
                    expected_model: labelled.expected_model.clone(),
                    correct: decision.model == labelled.expected_model,
                    routed_model: Some(decision.model),
                    routed_class: Some(decision.class),
                    top_score,
                    error: None,
                }
            }
            Err(e) if e.is_index_unavailable() => return Err(e),
            Err(e) => {
                warn!("Failed to route '{}': {}", labelled.query, e);
                RoutingCase {
                    query: labelled.query.clone(),
                    expected_model: labelled.expected_model.clone(),
                    routed_model: None,
                    routed_class: None,
                    correct: false,
                    top_score: 0.0,
                    error: Some(e.to_string()),
                }
            }
        };
        cases.push(case);
    }

    let report = RoutingReport::from_cases(cases);
    info!(
        "Routing accuracy {:.2}% ({}/{})",
        report.accuracy_pct, report.correct, report.total
    );
    Ok(report)
}

/// Labelled queries covering every built-in capability class.
pub fn default_benchmark() -> Vec<LabelledQuery> {
    let groups: [(&str, &[&str]); 7] = [
        (
            MODEL_LLAMA_GROQ,
            &[
                "Hello, how are you?",
                "What is the capital of Japan?",
                "Who invented the telephone?",
                "What does DNA stand for?",
                "How many days are in a leap year?",
                "What is the largest ocean on Earth?",
                "Who painted the Mona Lisa?",
                "What is the speed of light?",
                "Define entropy in one sentence.",
            ],
        ),
        (
            MODEL_KIMI_K2,
            &[
                "Write a Python function to merge two sorted arrays.",
                "Implement a stack using linked lists in Java.",
                "Debug this TypeScript function that returns undefined.",
                "Write unit tests for a REST API endpoint using pytest.",
                "Create a React hook for debounced search.",
                "Implement the observer pattern in Python.",
                "Write a SQL query to find the second highest salary.",
                "Convert this Python 2 code to Python 3.",
                "Write a basic web scraper in Python using BeautifulSoup.",
            ],
        ),
        (
            MODEL_GPT_OSS,
            &[
                "Compare the pros and cons of electric vs hydrogen cars.",
                "Explain how blockchain consensus mechanisms work.",
                "What are the key differences between agile and waterfall?",
                "Explain the model-view-controller architecture pattern.",
                "Describe how DNS resolution works step by step.",
                "Compare Docker and virtual machines.",
                "What are the trade-offs of eventual consistency?",
                "How does HTTPS encryption work?",
                "Explain the difference between threads and processes.",
            ],
        ),
        (
            MODEL_QWEN_235B,
            &[
                "Analyze the economic impact of AI on the labor market in 2025.",
                "Write a comprehensive overview of mRNA vaccine technology.",
                "Explain the geopolitical implications of semiconductor supply chains.",
                "Provide a deep analysis of central bank digital currencies.",
                "Summarize the evolution of machine learning from 1950 to present.",
                "Analyze the sociological effects of social media on Gen Z.",
                "Write a literature review on attention mechanisms in NLP.",
                "Compare the education systems of Finland, Japan, and the US.",
            ],
        ),
        (
            MODEL_GPT4O,
            &[
                "Is it safe to combine metformin and alcohol?",
                "What are my rights if wrongfully terminated in Texas?",
                "Explain the tax implications of selling inherited property.",
                "What are the warning signs of a stroke?",
                "Review this non-compete clause for enforceability issues.",
                "What are the fiduciary duties of a board of directors?",
                "Explain HIPAA compliance requirements for a web app.",
                "What are the side effects of long-term statin use?",
            ],
        ),
        (
            MODEL_GEMINI_FLASH,
            &[
                "Solve for x: 5x^2 - 3x + 2 = 0.",
                "What is the derivative of ln(x^2 + 1)?",
                "Calculate compound interest: $5000 at 4% for 10 years.",
                "Convert 250 kilometers per hour to miles per hour.",
                "Find the eigenvalues of matrix [[2,1],[1,2]].",
                "Integrate x*e^x dx.",
                "Compute the probability of rolling sum 7 with two dice.",
            ],
        ),
        (
            MODEL_OPUS,
            &[
                "Write production JWT auth middleware with refresh tokens for Express.",
                "Design a scalable event-driven payment processing system.",
                "Perform a security audit on this REST API implementation.",
                "Implement distributed locking with Redis and proper failover.",
                "Write a complete CI/CD pipeline for Kubernetes deployment.",
                "Design the database schema for encrypted real-time messaging.",
            ],
        ),
    ];

    groups
        .iter()
        .flat_map(|(model, queries)| queries.iter().map(move |q| LabelledQuery::new(*q, *model)))
        .collect()
}
