//! # Reddit Report Generator
//!
//! A multi-role LLM pipeline that analyzes a Reddit user or community from
//! several perspectives, cross-checks the resulting reports and scores a
//! final report.
//!
//! ## Pipeline
//!
//! - **Planning**: a planner devises the analysis perspectives
//! - **Breakdown**: one expert per perspective turns it into questions
//! - **Investigation**: a solver answers each question, calling activity
//!   capabilities over the shared datasets
//! - **Check**: a checker weighs the credibility of each perspective report
//! - **Score**: a scorer writes the final report, rendered as Markdown
//!
//! ## Architecture
//!
//! ```text
//! CLI → RoleOrchestrator → roles → ChatModel (OpenAI-compatible HTTP)
//!              ↓              ↓
//!       SQLite (runs,    ToolDispatcher → capabilities → DatasetContext
//!       artifacts, events)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use reddit_report_generator::{
//!     config::Config, dataset::DatasetContext, llm::OpenAiClient,
//!     pipeline::{RoleCore, RoleOrchestrator}, retry::RetryPolicy,
//!     storage::SqliteStorage, tools::CapabilityRegistry,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let model = Arc::new(OpenAiClient::new(&config.llm, &config.request)?);
//!     let core = RoleCore::new(model, RetryPolicy::from_config(&config.request));
//!     let orchestrator = RoleOrchestrator::new(
//!         core,
//!         Arc::new(CapabilityRegistry::with_builtin_capabilities()),
//!         DatasetContext::load(&config.data).await?,
//!         Arc::new(SqliteStorage::new(&config.database).await?),
//!         config.pipeline.clone(),
//!     );
//!     let output = orchestrator.run("alice", &CancellationToken::new()).await?;
//!     println!("{}", output.rendered_report);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// Configuration loaded from the environment.
pub mod config;
/// Token budgeting and rollback of investigation transcripts.
pub mod conversation;
/// Activity datasets and the shared read-only context.
pub mod dataset;
/// Error types and result aliases for the application.
pub mod error;
/// Extraction of typed records from free-form model output.
pub mod extract;
/// Model-invocation interface and the OpenAI-compatible client.
pub mod llm;
/// Pipeline roles and the orchestrator that drives them.
pub mod pipeline;
/// Prompts for every pipeline role.
pub mod prompts;
/// Failure classification and bounded retry.
pub mod retry;
/// SQLite persistence for runs, artifacts and events.
pub mod storage;
/// Capability registry, dispatcher and built-in activity capabilities.
pub mod tools;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use pipeline::{AnalysisOutput, RoleOrchestrator};
