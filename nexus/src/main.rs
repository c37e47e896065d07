//! Nexus CLI - ask, clarify and inspect routed LLM sessions.
//!
//! # Usage
//!
//! ```bash
//! # Ask a question (a session id is generated when omitted)
//! nexus ask "write quicksort in python"
//! nexus ask "fix my code" --session my-session
//!
//! # Answer a clarification request
//! nexus resume my-session "it's python, the sort drops duplicates"
//!
//! # Inspect
//! nexus trace my-session
//! nexus models
//! nexus health --offline
//!
//! # Reopen a session whose resume died mid-run
//! nexus release my-session
//!
//! # Benchmark routing accuracy and cost
//! nexus bench --routing-only --offline
//! nexus bench --limit 10 --output report.json
//! ```

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use nexus::gateway::OpenAiCompatibleGateway;
use nexus::orchestration::{Orchestrator, RunEvent, RunStream};
use nexus_core::checkpoint::FileCheckpointStore;
use nexus_core::NexusConfig;
use nexus_semantic::{
    default_benchmark, EmbeddingProvider, MockProvider, OpenAIConfig, OpenAIProvider,
};
use tracing::warn;

/// Dimension of the offline bag-of-words embedder
const OFFLINE_DIMENSION: usize = 256;

#[derive(Parser)]
#[command(name = "nexus")]
#[command(about = "Nexus - Adaptive LLM routing orchestrator", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use the local hashing embedder instead of the embeddings API
    #[arg(long, global = true)]
    offline: bool,

    /// Configuration file (default: ~/.nexus/config.toml)
    #[arg(short, long, global = true, env = "NEXUS_CONFIG_PATH")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a question
    Ask {
        /// The query
        query: String,

        /// Session id (generated when omitted)
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Answer the clarification a session is waiting for
    Resume {
        /// Session id
        session: String,

        /// Clarification (blank lets the run proceed on a best guess)
        answer: Option<String>,
    },

    /// Show the trace of a session
    Trace {
        /// Session id
        session: String,
    },

    /// List capability classes and their models
    Models,

    /// Report routing readiness
    Health,

    /// Reopen a session whose resume was claimed but never finished
    Release {
        /// Session id
        session: String,
    },

    /// Run the labelled benchmark queries
    Bench {
        /// Only the first N queries
        #[arg(short, long)]
        limit: Option<usize>,

        /// Route the queries without calling any model
        #[arg(long)]
        routing_only: bool,

        /// Hard limit per query, clarification included
        #[arg(long, default_value_t = 90)]
        query_timeout_secs: u64,

        /// Write the full report as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => NexusConfig::load_from_path(path).await,
        None => NexusConfig::load().await,
    }
    .context("Failed to load configuration")?;

    init_logging(cli.verbose, &config.general.log_level);

    let orchestrator = build_orchestrator(config, cli.offline).await?;

    match cli.command {
        Commands::Ask { query, session } => {
            let session = session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            println!("Session: {}", session);
            print_events(orchestrator.start(session, query)).await;
        }
        Commands::Resume { session, answer } => {
            let events = orchestrator
                .resume(&session, answer.as_deref())
                .await
                .with_context(|| format!("Cannot resume session {}", session))?;
            print_events(events).await;
        }
        Commands::Trace { session } => {
            let trace = orchestrator.trace(&session).await?;
            for entry in trace {
                println!(
                    "{} [{}] {}: {}",
                    entry.timestamp.format("%H:%M:%S%.3f"),
                    entry.stage,
                    entry.outcome,
                    entry.detail
                );
            }
        }
        Commands::Models => {
            for info in orchestrator.models() {
                let pricing = info
                    .pricing
                    .map(|p| format!("${:.3}/${:.3} per 1M tokens", p.input, p.output))
                    .unwrap_or_else(|| "unpriced".to_string());
                println!("{:<18} {:<45} {}", info.class, info.model, pricing);
            }
        }
        Commands::Health => {
            let health = orchestrator.health();
            println!("{}", serde_json::to_string_pretty(&health)?);
            if !health.index_loaded {
                anyhow::bail!("Prototype index is not loaded");
            }
        }
        Commands::Release { session } => {
            orchestrator
                .release(&session)
                .await
                .with_context(|| format!("Cannot release session {}", session))?;
            println!("Session {} is awaiting clarification", session);
        }
        Commands::Bench {
            limit,
            routing_only,
            query_timeout_secs,
            output,
        } => {
            let mut queries = default_benchmark();
            if let Some(limit) = limit {
                queries.truncate(limit);
            }

            let report = if routing_only {
                let report = orchestrator.evaluate_routing(&queries).await?;
                for (model, accuracy) in &report.per_model {
                    println!("{:<45} {}/{}", model, accuracy.correct, accuracy.expected);
                }
                println!(
                    "\nRouting accuracy: {:.2}% ({}/{}), mean top score {:.4}",
                    report.accuracy_pct, report.correct, report.total, report.mean_top_score
                );
                serde_json::to_string_pretty(&report)?
            } else {
                let report = orchestrator
                    .benchmark(&queries, Duration::from_secs(query_timeout_secs))
                    .await;
                print_summary(&serde_json::to_value(&report.summary)?);
                serde_json::to_string_pretty(&report)?
            };

            if let Some(path) = output {
                tokio::fs::write(&path, report)
                    .await
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                println!("Report: {}", path.display());
            }
        }
    }

    Ok(())
}

async fn build_orchestrator(config: NexusConfig, offline: bool) -> Result<Orchestrator> {
    let gateway = Arc::new(OpenAiCompatibleGateway::new(&config)?);

    let embedder: Arc<dyn EmbeddingProvider> = if offline {
        Arc::new(MockProvider::new(OFFLINE_DIMENSION))
    } else {
        let openai = OpenAIConfig {
            model: config.models.embedding.clone(),
            ..Default::default()
        };
        match OpenAIProvider::new(openai) {
            Ok(provider) => Arc::new(provider),
            Err(e) => {
                warn!("Embeddings API unavailable ({}), falling back to offline embedder", e);
                Arc::new(MockProvider::new(OFFLINE_DIMENSION))
            }
        }
    };

    // Sessions outlive a single invocation, so the CLI always persists them
    let store = Arc::new(FileCheckpointStore::open(config.checkpoint_dir()?).await?);

    Ok(Orchestrator::bootstrap(config, gateway, embedder, store).await)
}

async fn print_events(mut events: RunStream) {
    while let Some(event) = events.next().await {
        match event {
            RunEvent::StageCompleted {
                stage,
                outcome,
                detail,
            } => println!("  [{}] {}: {}", stage, outcome, detail),
            RunEvent::ClarificationRequested {
                session_id,
                question,
            } => {
                println!("\n{}", question);
                println!("\nAnswer with: nexus resume {} \"<answer>\"", session_id);
            }
            RunEvent::Completed(answer) => {
                println!("\n{}\n", answer.text);
                println!("Routed models: {}", answer.routed_models.join(", "));
                println!("Used models:   {}", answer.used_models.join(", "));
                println!(
                    "Cost: ${:.6} (baseline ${:.6}, saved ${:.6})",
                    answer.total_cost, answer.baseline_cost, answer.cost_saved
                );
                println!("Latency: {:.2}s, escalations: {}", answer.total_latency, answer.escalation_count);
            }
            RunEvent::Failed { message } => eprintln!("\nRun failed: {}", message),
        }
    }
}

fn print_summary(summary: &serde_json::Value) {
    println!("\nBenchmark summary");
    if let Some(fields) = summary.as_object() {
        for (key, value) in fields {
            println!("  {}: {}", key, value);
        }
    }
}

fn init_logging(verbose: bool, level: &str) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("nexus=debug,nexus_core=debug,nexus_semantic=debug,warn")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "nexus={level},nexus_core={level},nexus_semantic={level},warn"
            ))
        })
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}
