//! Multi-role analysis pipeline.
//!
//! A run moves one target through a fixed sequence of roles:
//!
//! - [`Planner`] devises the perspectives
//! - one [`DomainExpert`] per perspective breaks it into questions
//! - a [`QuestionSolver`] investigates each question with capability calls
//! - each expert synthesizes a perspective report
//! - the [`Checker`] weighs the reports, the [`Scorer`] writes the final report
//!
//! [`RoleOrchestrator`] drives the sequence and persists what each stage
//! produces.

mod checker;
mod core;
mod expert;
mod orchestrator;
mod planner;
mod scorer;
mod solver;
mod types;

pub use checker::Checker;
pub use core::RoleCore;
pub use expert::{DomainExpert, BREAKDOWN_TEMPERATURE};
pub use orchestrator::{BatchSummary, PipelineStage, RoleOrchestrator};
pub use planner::{Planner, PLANNER_TEMPERATURE};
pub use scorer::{render_report, Scorer};
pub use solver::QuestionSolver;
pub use types::*;
