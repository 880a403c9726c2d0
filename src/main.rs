use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use reddit_report_generator::{
    config::{Config, LogFormat},
    dataset::{load_categories, DatasetContext},
    llm::OpenAiClient,
    pipeline::{RoleCore, RoleOrchestrator},
    retry::RetryPolicy,
    storage::{ArtifactKind, SqliteStorage, Storage},
    tools::{activity, CapabilityRegistry},
};

#[derive(Parser)]
#[command(name = "reddit-report")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Multi-perspective LLM analysis of Reddit users and communities", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a single user or community
    Analyze {
        /// User or community identifier
        #[arg(long)]
        user: String,
    },

    /// Analyze every user and community listed in a batch file
    Start {
        /// JSON file with `users` and `communities` lists
        #[arg(long, default_value = "config.json")]
        config: PathBuf,
    },

    /// List the most active authors in the dataset
    ListAuthors {
        /// Number of authors to list
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Print the stored report of a target
    ShowReport {
        /// User or community identifier
        #[arg(long)]
        target: String,
    },
}

/// Batch file contents.
#[derive(Debug, Default, Deserialize)]
struct BatchFile {
    #[serde(default)]
    users: Vec<String>,
    #[serde(default)]
    communities: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    init_logging(&config);

    info!(version = env!("CARGO_PKG_VERSION"), "Reddit report generator starting...");

    match cli.command {
        Commands::Analyze { user } => {
            let cancel = cancel_on_ctrl_c();
            let orchestrator = build_orchestrator(&config).await?;
            let output = orchestrator.run(&user, &cancel).await?;
            match orchestrator.report_path(&user) {
                Some(path) => println!("Analysis complete. Report saved to {}", path.display()),
                None => println!("{}", output.rendered_report),
            }
        }
        Commands::Start { config: batch_path } => {
            let targets = read_batch_file(&batch_path).await?;
            let cancel = cancel_on_ctrl_c();
            let orchestrator = build_orchestrator(&config).await?;
            let summary = orchestrator.run_batch(targets, &cancel).await;

            for target in &summary.skipped {
                println!("User/community {} already analyzed.", target);
            }
            for (target, e) in &summary.failed {
                eprintln!("Analysis of {} failed: {}", target, e);
            }
            println!(
                "{} completed, {} skipped, {} failed",
                summary.completed.len(),
                summary.skipped.len(),
                summary.failed.len()
            );
            if !summary.failed.is_empty() {
                anyhow::bail!("{} analyses failed", summary.failed.len());
            }
        }
        Commands::ListAuthors { limit } => {
            let context = DatasetContext::load(&config.data).await?;
            println!("Top {} authors in the dataset:", limit);
            for (i, author) in activity::top_authors(&context, limit).iter().enumerate() {
                println!("{}. {}: {} activities", i + 1, author.author, author.activity_count);
            }
        }
        Commands::ShowReport { target } => {
            let storage = SqliteStorage::new(&config.database).await?;
            match storage
                .get_artifact(&target, ArtifactKind::RenderedReport)
                .await?
            {
                Some(artifact) => println!("{}", artifact.content),
                None => match storage.latest_run(&target).await? {
                    Some(run) => println!(
                        "No report for {}; latest run {} is {}{}",
                        target,
                        run.id,
                        run.status,
                        run.error.map(|e| format!(" ({})", e)).unwrap_or_default()
                    ),
                    None => println!("No runs recorded for {}", target),
                },
            }
        }
    }

    Ok(())
}

/// Wire the model, storage, datasets and capabilities into an orchestrator.
async fn build_orchestrator(config: &Config) -> anyhow::Result<RoleOrchestrator> {
    // Initialize storage
    let storage = match SqliteStorage::new(&config.database).await {
        Ok(s) => {
            info!(path = %config.database.path.display(), "Database initialized");
            s
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize database");
            return Err(e.into());
        }
    };

    // Initialize model client
    let model = match OpenAiClient::new(&config.llm, &config.request) {
        Ok(c) => {
            info!(base_url = %config.llm.base_url, model = %config.llm.model, "Model client initialized");
            c
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize model client");
            return Err(e.into());
        }
    };

    let context = DatasetContext::load(&config.data)
        .await
        .context("Failed to load datasets")?;
    let categories = load_categories(&config.data.categories_path).await?;
    let registry = CapabilityRegistry::with_builtin_capabilities();
    info!(capabilities = registry.len(), "Capabilities registered");

    let core = RoleCore::new(Arc::new(model), RetryPolicy::from_config(&config.request));
    Ok(RoleOrchestrator::new(
        core,
        Arc::new(registry),
        context,
        Arc::new(storage),
        config.pipeline.clone(),
    )
    .with_categories(&categories)
    .with_output_dir(config.data.output_dir.clone()))
}

async fn read_batch_file(path: &Path) -> anyhow::Result<Vec<String>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read batch file {}", path.display()))?;
    let batch: BatchFile = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid batch file {}", path.display()))?;

    let mut targets = batch.users;
    targets.extend(batch.communities);
    if targets.is_empty() {
        warn!(path = %path.display(), "Batch file lists no users or communities");
    }
    Ok(targets)
}

/// Cancellation token tripped by Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling");
            token.cancel();
        }
    });
    cancel
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
