//! Configuration system for Nexus.
//!
//! Configuration is read from a TOML file, then environment variable
//! overrides are merged in, then the result is validated.
//!
//! # Configuration Location
//!
//! By default, configuration is stored at `~/.nexus/config.toml`.
//! This can be overridden with the `NEXUS_CONFIG_PATH` environment variable.
//! A missing file is not an error: built-in defaults are used instead.
//!
//! # Example
//!
//! ```toml
//! [general]
//! log_level = "debug"
//!
//! [orchestration]
//! judge_threshold = 7.5
//! max_escalations = 2
//!
//! [[providers]]
//! prefix = "groq"
//! base_url = "https://api.groq.com/openai/v1"
//! api_key_env = "GROQ_API_KEY"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::catalog::{self, CatalogEntry, ModelPricing};
use crate::error::{CoreError, Result};

// Environment variable names
pub const ENV_CONFIG_PATH: &str = "NEXUS_CONFIG_PATH";
pub const ENV_LOG_LEVEL: &str = "NEXUS_LOG_LEVEL";
pub const ENV_JUDGE_THRESHOLD: &str = "NEXUS_JUDGE_THRESHOLD";
pub const ENV_MAX_ESCALATIONS: &str = "NEXUS_MAX_ESCALATIONS";
pub const ENV_BASELINE_COST: &str = "NEXUS_BASELINE_COST";
pub const ENV_CHECKPOINT_DIR: &str = "NEXUS_CHECKPOINT_DIR";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NexusConfig {
    pub general: GeneralConfig,
    pub models: ModelsConfig,
    pub orchestration: OrchestrationConfig,
    pub checkpoint: CheckpointConfig,
    pub providers: Vec<ProviderConfig>,
    pub pricing: BTreeMap<String, ModelPricing>,

    /// Overrides the built-in capability catalog when non-empty
    pub catalog: Vec<CatalogEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub log_level: String,
}

/// Special-purpose model assignments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub classifier: String,
    pub aggregator: String,
    pub judge: String,
    pub embedding: String,
    /// Highest-capability model, used when the judge cannot name one
    pub escalation_fallback: String,
    /// Worker model used when routing produced no assignment
    pub default_worker: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    /// Judge pass mark on the 0-10 scale
    pub judge_threshold: f64,
    /// Escalation ceiling per session
    pub max_escalations: u32,
    /// Neighbours consulted by the router vote
    pub knn_k: usize,
    /// Per-call timeout for specialist calls
    pub worker_timeout_secs: u64,
    /// Cost of answering with a single frontier model, for savings reporting
    pub baseline_cost: f64,
    /// Estimated cost of embedding one routed text
    pub embedding_cost_per_query: f64,
    /// Class used when a (sub)query cannot be embedded
    pub default_class: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointBackend {
    Memory,
    File,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    pub backend: CheckpointBackend,
    /// Directory of the file backend; `~/.nexus/sessions` when unset
    pub directory: Option<PathBuf>,
}

/// OpenAI-compatible endpoint serving every model id with `prefix/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub prefix: String,
    pub base_url: String,
    pub api_key_env: String,
}

impl ProviderConfig {
    fn new(prefix: &str, base_url: &str, api_key_env: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            base_url: base_url.to_string(),
            api_key_env: api_key_env.to_string(),
        }
    }
}

impl Default for NexusConfig {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            models: ModelsConfig::default(),
            orchestration: OrchestrationConfig::default(),
            checkpoint: CheckpointConfig::default(),
            providers: default_providers(),
            pricing: catalog::default_pricing(),
            catalog: Vec::new(),
        }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            classifier: catalog::MODEL_CLASSIFIER.to_string(),
            aggregator: catalog::MODEL_GEMINI_FLASH.to_string(),
            judge: catalog::MODEL_GEMINI_FLASH.to_string(),
            embedding: catalog::MODEL_EMBED.to_string(),
            escalation_fallback: catalog::MODEL_OPUS.to_string(),
            default_worker: catalog::MODEL_LLAMA_GROQ.to_string(),
        }
    }
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            judge_threshold: 7.0,
            max_escalations: 1,
            knn_k: 5,
            worker_timeout_secs: 30,
            baseline_cost: 0.012,
            embedding_cost_per_query: 0.00001,
            default_class: "simple_qa".to_string(),
        }
    }
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            backend: CheckpointBackend::Memory,
            directory: None,
        }
    }
}

fn default_providers() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig::new("groq", "https://api.groq.com/openai/v1", "GROQ_API_KEY"),
        ProviderConfig::new("cerebras", "https://api.cerebras.ai/v1", "CEREBRAS_API_KEY"),
        ProviderConfig::new("openai", "https://api.openai.com/v1", "OPENAI_API_KEY"),
        ProviderConfig::new(
            "gemini",
            "https://generativelanguage.googleapis.com/v1beta/openai",
            "GEMINI_API_KEY",
        ),
        ProviderConfig::new("openrouter", "https://openrouter.ai/api/v1", "OPENROUTER_API_KEY"),
    ]
}

impl NexusConfig {
    /// Load configuration from the default location, falling back to
    /// defaults when no file exists.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read or parsed, or if
    /// the merged configuration is invalid
    pub async fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if tokio::fs::try_exists(&path).await? {
            Self::load_from_path(&path).await
        } else {
            debug!("No configuration at {}, using defaults", path.display());
            let mut config = Self::default();
            config.merge_env_vars()?;
            config.validate()?;
            Ok(config)
        }
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed
    pub async fn load_from_path(path: &Path) -> Result<Self> {
        debug!("Loading configuration from: {}", path.display());

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| CoreError::config(format!("Failed to read config file: {}", e)))?;

        let mut config = Self::from_toml_str(&content)?;
        config.merge_env_vars()?;
        config.validate()?;

        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Parse configuration from TOML without environment overrides
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| CoreError::config(format!("Failed to parse config file: {}", e)))
    }

    /// Serialize to TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| CoreError::config(format!("Failed to serialize config: {}", e)))
    }

    /// Path of the configuration file
    pub fn config_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var(ENV_CONFIG_PATH) {
            return Ok(PathBuf::from(path));
        }
        Ok(Self::base_dir()?.join("config.toml"))
    }

    /// Base directory (`~/.nexus`)
    pub fn base_dir() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|home| home.join(".nexus"))
            .ok_or_else(|| CoreError::config("Cannot determine home directory"))
    }

    /// Directory of the file checkpoint backend
    pub fn checkpoint_dir(&self) -> Result<PathBuf> {
        match &self.checkpoint.directory {
            Some(dir) => Ok(dir.clone()),
            None => Ok(Self::base_dir()?.join("sessions")),
        }
    }

    /// Merge environment variable overrides from the process environment
    pub fn merge_env_vars(&mut self) -> Result<()> {
        self.merge_env_with(|key| std::env::var(key).ok())
    }

    /// Merge environment variable overrides from an arbitrary lookup
    ///
    /// # Errors
    ///
    /// Returns an error if an override holds an unparsable value
    pub fn merge_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        debug!("Merging environment variable overrides");

        if let Some(log_level) = lookup(ENV_LOG_LEVEL) {
            debug!("Overriding log_level from environment: {}", log_level);
            self.general.log_level = log_level;
        }

        if let Some(threshold) = lookup(ENV_JUDGE_THRESHOLD) {
            self.orchestration.judge_threshold = threshold.parse().map_err(|e| {
                CoreError::config(format!("Invalid judge threshold in environment: {}", e))
            })?;
        }

        if let Some(max) = lookup(ENV_MAX_ESCALATIONS) {
            self.orchestration.max_escalations = max.parse().map_err(|e| {
                CoreError::config(format!("Invalid escalation ceiling in environment: {}", e))
            })?;
        }

        if let Some(cost) = lookup(ENV_BASELINE_COST) {
            self.orchestration.baseline_cost = cost.parse().map_err(|e| {
                CoreError::config(format!("Invalid baseline cost in environment: {}", e))
            })?;
        }

        if let Some(dir) = lookup(ENV_CHECKPOINT_DIR) {
            debug!("Overriding checkpoint directory from environment: {}", dir);
            self.checkpoint.backend = CheckpointBackend::File;
            self.checkpoint.directory = Some(PathBuf::from(dir));
        }

        Ok(())
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid
    pub fn validate(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.general.log_level.as_str()) {
            return Err(CoreError::config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.general.log_level,
                valid_log_levels.join(", ")
            )));
        }

        let threshold = self.orchestration.judge_threshold;
        if !(0.0..=10.0).contains(&threshold) {
            return Err(CoreError::config(format!(
                "Judge threshold must be within 0..=10, got {}",
                threshold
            )));
        }

        if self.orchestration.knn_k == 0 {
            return Err(CoreError::config("knn_k must be at least 1"));
        }

        if self.orchestration.worker_timeout_secs == 0 {
            return Err(CoreError::config("worker_timeout_secs must be at least 1"));
        }

        if self.orchestration.baseline_cost < 0.0 || self.orchestration.embedding_cost_per_query < 0.0 {
            return Err(CoreError::config("Costs must be non-negative"));
        }

        for entry in &self.catalog {
            if entry.examples.is_empty() {
                return Err(CoreError::config(format!(
                    "Catalog class '{}' has no examples",
                    entry.class
                )));
            }
        }

        let catalog = self.catalog();
        if !catalog.iter().any(|e| e.class == self.orchestration.default_class) {
            return Err(CoreError::config(format!(
                "Default class '{}' is not in the catalog",
                self.orchestration.default_class
            )));
        }

        Ok(())
    }

    /// Effective capability catalog
    pub fn catalog(&self) -> Vec<CatalogEntry> {
        if self.catalog.is_empty() {
            catalog::default_catalog()
        } else {
            self.catalog.clone()
        }
    }

    /// Specialist model of a capability class
    pub fn model_for_class(&self, class: &str) -> Option<String> {
        self.catalog()
            .into_iter()
            .find(|entry| entry.class == class)
            .map(|entry| entry.model)
    }

    /// Pricing of a model, if known
    pub fn price_for(&self, model: &str) -> Option<ModelPricing> {
        catalog::lookup_pricing(&self.pricing, model).copied()
    }

    /// Provider serving a model id, matched on its `prefix/`
    pub fn provider_for(&self, model: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| {
            model
                .strip_prefix(p.prefix.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
        })
    }
}
