//! End-to-end pipeline driver.
//!
//! [`RoleOrchestrator::run`] moves one target through
//! `Planning -> Breakdown -> Investigation -> Check -> Score -> Done`,
//! persisting every artifact and an event per stage transition.
//! [`RoleOrchestrator::run_batch`] runs several targets on a bounded pool.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use super::checker::Checker;
use super::core::RoleCore;
use super::expert::DomainExpert;
use super::planner::Planner;
use super::scorer::{render_report, Scorer};
use super::solver::QuestionSolver;
use super::types::{AnalysisOutput, PerspectiveReport, PerspectiveTask};
use crate::config::PipelineConfig;
use crate::conversation::ConversationBudget;
use crate::dataset::DatasetContext;
use crate::error::{AppError, AppResult, StorageError};
use crate::storage::{Artifact, ArtifactKind, EventKind, RunEvent, RunRecord, Storage};
use crate::tools::{CapabilityRegistry, ResultSummarizer, ToolDispatcher};

/// Stages of one pipeline run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    /// Devising the perspectives.
    Planning,
    /// Turning each perspective into questions.
    Breakdown,
    /// Answering the questions and writing perspective reports.
    Investigation,
    /// Weighing report credibility.
    Check,
    /// Producing and rendering the final report.
    Score,
    /// Terminal.
    Done,
}

impl PipelineStage {
    /// Stage name as recorded in the event log.
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Planning => "planning",
            PipelineStage::Breakdown => "breakdown",
            PipelineStage::Investigation => "investigation",
            PipelineStage::Check => "check",
            PipelineStage::Score => "score",
            PipelineStage::Done => "done",
        }
    }

    /// The stage that follows, `None` after `Done`.
    pub fn next(self) -> Option<Self> {
        match self {
            PipelineStage::Planning => Some(PipelineStage::Breakdown),
            PipelineStage::Breakdown => Some(PipelineStage::Investigation),
            PipelineStage::Investigation => Some(PipelineStage::Check),
            PipelineStage::Check => Some(PipelineStage::Score),
            PipelineStage::Score => Some(PipelineStage::Done),
            PipelineStage::Done => None,
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a batch of runs.
#[derive(Debug, Default)]
pub struct BatchSummary {
    /// Targets that produced a report.
    pub completed: Vec<String>,
    /// Targets skipped because a report already existed.
    pub skipped: Vec<String>,
    /// Targets that failed, with the error.
    pub failed: Vec<(String, AppError)>,
}

enum BatchOutcome {
    Completed,
    Skipped,
    Failed(AppError),
}

/// Drives the roles through the pipeline for one or more targets.
#[derive(Clone)]
pub struct RoleOrchestrator {
    core: RoleCore,
    registry: Arc<CapabilityRegistry>,
    context: DatasetContext,
    storage: Arc<dyn Storage>,
    settings: PipelineConfig,
    categories: String,
    output_dir: Option<PathBuf>,
}

impl RoleOrchestrator {
    /// Create an orchestrator over the shared datasets and capability set.
    pub fn new(
        core: RoleCore,
        registry: Arc<CapabilityRegistry>,
        context: DatasetContext,
        storage: Arc<dyn Storage>,
        settings: PipelineConfig,
    ) -> Self {
        Self {
            core,
            registry,
            context,
            storage,
            settings,
            categories: "{}".to_string(),
            output_dir: None,
        }
    }

    /// Analysis categories passed to synthesis and checking.
    pub fn with_categories(mut self, categories: &serde_json::Value) -> Self {
        self.categories = categories.to_string();
        self
    }

    /// Also export rendered reports as `{dir}/{target}.output.md`.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// The storage backend.
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Where the rendered report of `target` is exported, if exporting.
    pub fn report_path(&self, target: &str) -> Option<PathBuf> {
        let file_name = format!("{}.output.md", target.replace(['/', '\\'], "_"));
        self.output_dir.as_ref().map(|dir| dir.join(file_name))
    }

    /// Whether `target` already has a rendered report.
    pub async fn has_report(&self, target: &str) -> AppResult<bool> {
        if let Some(path) = self.report_path(target) {
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return Ok(true);
            }
        }
        Ok(self
            .storage
            .get_artifact(target, ArtifactKind::RenderedReport)
            .await?
            .is_some())
    }

    /// Run the whole pipeline for `target`.
    pub async fn run(&self, target: &str, cancel: &CancellationToken) -> AppResult<AnalysisOutput> {
        let run = RunRecord::new(target);
        self.storage.create_run(&run).await?;

        let span = info_span!("analysis", target = %target, run_id = %run.id);
        let result = self.execute(&run, cancel).instrument(span).await;

        match &result {
            Ok(_) => {
                self.storage.update_run(&run.clone().complete()).await?;
                self.record(RunEvent::new(&run, PipelineStage::Done.as_str(), EventKind::RunCompleted))
                    .await?;
                info!(run_id = %run.id, target = %target, "Analysis complete");
            }
            Err(err) => {
                let finished = match err {
                    AppError::Cancelled { .. } => run.clone().cancel(),
                    _ => run.clone().fail(err.to_string()),
                };
                // keep the original error if bookkeeping fails too
                if let Err(e) = self.storage.update_run(&finished).await {
                    warn!(error = %e, "Failed to record run failure");
                }
                let event = RunEvent::new(&run, "failed", EventKind::RunFailed)
                    .with_detail(json!({ "error": err.to_string() }));
                if let Err(e) = self.record(event).await {
                    warn!(error = %e, "Failed to record run failure event");
                }
                error!(run_id = %run.id, target = %target, error = %err, "Analysis failed");
            }
        }

        result
    }

    async fn execute(&self, run: &RunRecord, cancel: &CancellationToken) -> AppResult<AnalysisOutput> {
        let target = run.target.as_str();

        // planning
        self.stage_started(run, PipelineStage::Planning).await?;
        let plan = Planner::new(self.core.clone())
            .build_plan(target, &self.registry, cancel)
            .await?;
        self.save(run, ArtifactKind::Plan, &plan).await?;
        self.stage_completed(run, PipelineStage::Planning, json!({ "perspectives": plan.perspectives.len() }))
            .await?;

        // breakdown
        self.stage_started(run, PipelineStage::Breakdown).await?;
        let budget = ConversationBudget::new(self.settings.token_limit);
        let experts: Vec<DomainExpert> = plan
            .perspectives
            .iter()
            .map(|p| DomainExpert::new(self.core.clone(), p.clone(), budget))
            .collect();
        let tasks: Vec<PerspectiveTask> = stream::iter(experts.iter())
            .map(|expert| expert.breakdown(target, cancel))
            .buffered(self.parallelism())
            .try_collect()
            .await?;
        let items: usize = tasks.iter().map(|t| t.items.len()).sum();
        self.stage_completed(run, PipelineStage::Breakdown, json!({ "items": items }))
            .await?;

        // investigation
        self.stage_started(run, PipelineStage::Investigation).await?;
        let facts = self.context.collect_facts(target);
        let facts_json = serde_json::to_string(&facts).map_err(StorageError::from)?;
        let dispatcher = ToolDispatcher::new(self.registry.clone(), self.context.clone())
            .with_summarizer(ResultSummarizer::new(
                self.settings.tool_result_max_chars,
                self.settings.tool_result_max_list_items,
            ));
        let perspective_reports: Vec<PerspectiveReport> = stream::iter(experts.iter().zip(&tasks))
            .map(|(expert, task)| {
                let solver = QuestionSolver::new(
                    self.core.clone(),
                    dispatcher.clone(),
                    expert.perspective().name.clone(),
                    facts_json.clone(),
                    &self.settings,
                );
                let span = info_span!("perspective", perspective = %expert.perspective().name);
                self.investigate_perspective(run, expert, task, solver, cancel)
                    .instrument(span)
            })
            .buffered(self.parallelism())
            .try_collect()
            .await?;
        self.stage_completed(
            run,
            PipelineStage::Investigation,
            json!({ "reports": perspective_reports.len() }),
        )
        .await?;

        // check
        self.stage_started(run, PipelineStage::Check).await?;
        let check_report = Checker::new(self.core.clone())
            .check(&perspective_reports, &self.categories, cancel)
            .await?;
        self.save(run, ArtifactKind::CheckReport, &check_report).await?;
        self.stage_completed(
            run,
            PipelineStage::Check,
            json!({ "assessments": check_report.perspective_weights.len() }),
        )
        .await?;

        // score
        self.stage_started(run, PipelineStage::Score).await?;
        let final_report = Scorer::new(self.core.clone())
            .score(&perspective_reports, &check_report, cancel)
            .await?;
        let rendered_report = render_report(&final_report, &perspective_reports);
        self.save(run, ArtifactKind::FinalReport, &final_report).await?;
        self.storage
            .save_artifact(&Artifact::new(
                target,
                ArtifactKind::RenderedReport,
                &run.id,
                &rendered_report,
            ))
            .await?;
        self.export(target, &rendered_report).await?;
        self.stage_completed(
            run,
            PipelineStage::Score,
            json!({ "confidence_score": final_report.confidence_score }),
        )
        .await?;

        Ok(AnalysisOutput {
            target: target.to_string(),
            run_id: run.id.clone(),
            plan,
            tasks,
            perspective_reports,
            check_report,
            final_report,
            rendered_report,
        })
    }

    async fn investigate_perspective(
        &self,
        run: &RunRecord,
        expert: &DomainExpert,
        task: &PerspectiveTask,
        solver: QuestionSolver,
        cancel: &CancellationToken,
    ) -> AppResult<PerspectiveReport> {
        let perspective = expert.perspective().name.clone();
        let mut exchanges = Vec::with_capacity(task.items.len() * 2);

        for item in &task.items {
            let outcome = solver.investigate(&exchanges, item, cancel).await?;
            let kind = if outcome.is_completed() {
                EventKind::QuestionCompleted
            } else {
                EventKind::QuestionExhausted
            };
            self.record(
                RunEvent::new(run, PipelineStage::Investigation.as_str(), kind).with_detail(json!({
                    "perspective": perspective,
                    "question": item.question,
                    "iterations": outcome.iterations(),
                })),
            )
            .await?;
            exchanges.extend(outcome.exchange(&item.question));
        }

        let report = expert
            .synthesize(task, &exchanges, &self.categories, cancel)
            .await?;
        Ok(PerspectiveReport {
            perspective,
            report,
        })
    }

    /// Run every target not yet reported on, at most `run_parallelism` at once.
    pub async fn run_batch(&self, targets: Vec<String>, cancel: &CancellationToken) -> BatchSummary {
        let outcomes: Vec<(String, BatchOutcome)> = stream::iter(targets)
            .map(|target| async move {
                if cancel.is_cancelled() {
                    let err = AppError::Cancelled {
                        operation: format!("analysis of {}", target),
                    };
                    return (target, BatchOutcome::Failed(err));
                }
                match self.has_report(&target).await {
                    Ok(true) => {
                        info!(entity = %target, "Already analyzed, skipping");
                        return (target, BatchOutcome::Skipped);
                    }
                    Ok(false) => {}
                    Err(e) => return (target, BatchOutcome::Failed(e)),
                }
                let outcome = match self.run(&target, cancel).await {
                    Ok(_) => BatchOutcome::Completed,
                    Err(e) => BatchOutcome::Failed(e),
                };
                (target, outcome)
            })
            .buffer_unordered(self.settings.run_parallelism.max(1))
            .collect()
            .await;

        let mut summary = BatchSummary::default();
        for (target, outcome) in outcomes {
            match outcome {
                BatchOutcome::Completed => summary.completed.push(target),
                BatchOutcome::Skipped => summary.skipped.push(target),
                BatchOutcome::Failed(e) => summary.failed.push((target, e)),
            }
        }

        info!(
            completed = summary.completed.len(),
            skipped = summary.skipped.len(),
            failed = summary.failed.len(),
            "Batch finished"
        );
        summary
    }

    fn parallelism(&self) -> usize {
        self.settings.perspective_parallelism.max(1)
    }

    async fn record(&self, event: RunEvent) -> AppResult<()> {
        self.storage.append_event(&event).await?;
        Ok(())
    }

    async fn stage_started(&self, run: &RunRecord, stage: PipelineStage) -> AppResult<()> {
        info!(stage = %stage, "Stage started");
        self.record(RunEvent::new(run, stage.as_str(), EventKind::StageStarted))
            .await
    }

    async fn stage_completed(
        &self,
        run: &RunRecord,
        stage: PipelineStage,
        detail: serde_json::Value,
    ) -> AppResult<()> {
        info!(stage = %stage, detail = %detail, "Stage completed");
        self.record(RunEvent::new(run, stage.as_str(), EventKind::StageCompleted).with_detail(detail))
            .await
    }

    async fn save<T: Serialize>(&self, run: &RunRecord, kind: ArtifactKind, value: &T) -> AppResult<()> {
        let content = serde_json::to_string_pretty(value).map_err(StorageError::from)?;
        self.storage
            .save_artifact(&Artifact::new(&run.target, kind, &run.id, content))
            .await?;
        Ok(())
    }

    async fn export(&self, target: &str, rendered: &str) -> AppResult<()> {
        let Some(path) = self.report_path(target) else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::Internal {
                    message: format!("Failed to create {}: {}", parent.display(), e),
                })?;
        }
        tokio::fs::write(&path, rendered)
            .await
            .map_err(|e| AppError::Internal {
                message: format!("Failed to write {}: {}", path.display(), e),
            })?;
        info!(path = %path.display(), "Report exported");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_sequence() {
        let mut stage = PipelineStage::Planning;
        let mut seen = vec![stage.as_str()];
        while let Some(next) = stage.next() {
            seen.push(next.as_str());
            stage = next;
        }
        assert_eq!(
            seen,
            ["planning", "breakdown", "investigation", "check", "score", "done"]
        );
    }
}
