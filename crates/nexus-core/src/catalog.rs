//! Model catalog: capability classes, their specialist models and prototype
//! queries, plus the default pricing table.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// Classifier (ultra-low latency)
pub const MODEL_CLASSIFIER: &str = "cerebras/llama3.1-8b";

// Worker models selected by the router
pub const MODEL_LLAMA_GROQ: &str = "groq/llama-3.1-8b-instant";
pub const MODEL_KIMI_K2: &str = "groq/moonshotai/kimi-k2-instruct-0905";
pub const MODEL_GPT_OSS: &str = "cerebras/gpt-oss-120b";
pub const MODEL_QWEN_235B: &str = "cerebras/qwen-3-235b-a22b-instruct-2507";
pub const MODEL_GPT4O: &str = "openai/gpt-4o";
pub const MODEL_GEMINI_FLASH: &str = "gemini/gemini-2.5-flash";
pub const MODEL_OPUS: &str = "openrouter/anthropic/claude-opus-4.6";

// Special-purpose models
pub const MODEL_EMBED: &str = "text-embedding-3-small";

/// One capability class with its designated specialist and prototypes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Capability class label
    pub class: String,

    /// Specialist model serving this class
    pub model: String,

    /// Labelled example queries seeding the similarity index
    pub examples: Vec<String>,
}

impl CatalogEntry {
    pub fn new(class: &str, model: &str, examples: &[&str]) -> Self {
        Self {
            class: class.to_string(),
            model: model.to_string(),
            examples: examples.iter().map(|e| e.to_string()).collect(),
        }
    }
}

/// Price per one million tokens, in USD.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input: f64,
    pub output: f64,
}

impl ModelPricing {
    pub const fn new(input: f64, output: f64) -> Self {
        Self { input, output }
    }

    /// Cost of one call given its token usage
    pub fn cost(&self, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        (prompt_tokens as f64 / 1_000_000.0) * self.input
            + (completion_tokens as f64 / 1_000_000.0) * self.output
    }
}

/// Built-in capability catalog.
pub fn default_catalog() -> Vec<CatalogEntry> {
    vec![
        CatalogEntry::new(
            "simple_qa",
            MODEL_LLAMA_GROQ,
            &[
                "what is the capital of france",
                "how many days are in a leap year",
                "who wrote romeo and juliet",
                "what time zone is tokyo in",
                "define the word ephemeral",
                "how do you say thank you in spanish",
            ],
        ),
        CatalogEntry::new(
            "code",
            MODEL_KIMI_K2,
            &[
                "write quicksort in python",
                "write a function that reverses a linked list",
                "fix this javascript code that throws undefined is not a function",
                "how do i read a file line by line in rust",
                "convert this python loop into a list comprehension",
                "write a sql query to find duplicate rows",
            ],
        ),
        CatalogEntry::new(
            "general",
            MODEL_GPT_OSS,
            &[
                "give me tips for a productive morning routine",
                "write a short email asking my manager for a day off",
                "summarize the plot of a typical heist movie",
                "suggest a name for my coffee shop",
                "what are some good hobbies to pick up this winter",
                "help me plan a weekend trip to the mountains",
            ],
        ),
        CatalogEntry::new(
            "research",
            MODEL_QWEN_235B,
            &[
                "explain the causes of world war one and its economic impact",
                "compare keynesian and austrian economic theories",
                "analyze the long term effects of the industrial revolution on society",
                "what are the competing theories about dark matter",
                "discuss the history and consequences of the printing press",
                "evaluate the arguments for and against universal basic income",
            ],
        ),
        CatalogEntry::new(
            "critical_factual",
            MODEL_GPT4O,
            &[
                "what is the maximum safe dose of ibuprofen for an adult",
                "what are the legal requirements for forming an llc",
                "how are capital gains taxed on stock sales",
                "what are the symptoms of a stroke",
                "can my landlord legally withhold my security deposit",
                "what drug interactions does warfarin have",
            ],
        ),
        CatalogEntry::new(
            "math",
            MODEL_GEMINI_FLASH,
            &[
                "solve the equation 3x plus 7 equals 22",
                "what is the derivative of x squared times sine x",
                "compute the integral of e to the x from zero to one",
                "prove that the square root of two is irrational",
                "what is the probability of rolling two sixes with two dice",
                "find the eigenvalues of a two by two matrix",
            ],
        ),
        CatalogEntry::new(
            "critical_code",
            MODEL_OPUS,
            &[
                "review this authentication code for security vulnerabilities",
                "implement password hashing with salt for a production login system",
                "audit this smart contract for reentrancy bugs",
                "write a payment processing handler that is safe against double charges",
                "fix the race condition in this banking transfer code",
                "design encryption at rest for patient medical records",
            ],
        ),
    ]
}

/// Built-in pricing table.
pub fn default_pricing() -> BTreeMap<String, ModelPricing> {
    [
        (MODEL_CLASSIFIER, ModelPricing::new(0.10, 0.10)),
        (MODEL_LLAMA_GROQ, ModelPricing::new(0.05, 0.08)),
        (MODEL_KIMI_K2, ModelPricing::new(0.20, 0.20)),
        (MODEL_GPT_OSS, ModelPricing::new(0.50, 0.50)),
        (MODEL_QWEN_235B, ModelPricing::new(0.40, 0.40)),
        (MODEL_GPT4O, ModelPricing::new(2.50, 10.00)),
        (MODEL_GEMINI_FLASH, ModelPricing::new(0.075, 0.30)),
        (MODEL_OPUS, ModelPricing::new(15.00, 75.00)),
    ]
    .into_iter()
    .map(|(model, pricing)| (model.to_string(), pricing))
    .collect()
}

/// Look up pricing for a model id.
///
/// Exact match first, then a suffix match in either direction so that
/// provider-prefixed and bare ids resolve to the same entry.
pub fn lookup_pricing<'a>(
    table: &'a BTreeMap<String, ModelPricing>,
    model: &str,
) -> Option<&'a ModelPricing> {
    if let Some(pricing) = table.get(model) {
        return Some(pricing);
    }
    table
        .iter()
        .find(|(known, _)| model.ends_with(known.as_str()) || known.ends_with(model))
        .map(|(_, pricing)| pricing)
}
