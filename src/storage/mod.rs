//! Persistence for pipeline runs.
//!
//! Each target entity gets its serialized artifacts (plan, check report,
//! final report, rendered document) and an append-only event log. Runs are
//! recorded with their status so an interrupted batch can be inspected.

mod sqlite;

pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StorageResult;

/// One execution of the pipeline for one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Unique run identifier.
    pub id: String,
    /// User or community being analyzed.
    pub target: String,
    /// Current status.
    pub status: RunStatus,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run reached a terminal status.
    pub finished_at: Option<DateTime<Utc>>,
    /// Failure description for failed or cancelled runs.
    pub error: Option<String>,
}

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Still executing.
    #[default]
    Running,
    /// Produced a final report.
    Completed,
    /// Stopped on an error.
    Failed,
    /// Stopped by a cancellation request.
    Cancelled,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "cancelled" => Ok(RunStatus::Cancelled),
            _ => Err(format!("Unknown run status: {}", s)),
        }
    }
}

/// Kind of persisted artifact. One of each is kept per target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Serialized analysis plan.
    Plan,
    /// Serialized credibility assessments.
    CheckReport,
    /// Serialized final report.
    FinalReport,
    /// Markdown document combining the final report and perspective reports.
    RenderedReport,
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactKind::Plan => write!(f, "plan"),
            ArtifactKind::CheckReport => write!(f, "check_report"),
            ArtifactKind::FinalReport => write!(f, "final_report"),
            ArtifactKind::RenderedReport => write!(f, "rendered_report"),
        }
    }
}

impl std::str::FromStr for ArtifactKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "plan" => Ok(ArtifactKind::Plan),
            "check_report" => Ok(ArtifactKind::CheckReport),
            "final_report" => Ok(ArtifactKind::FinalReport),
            "rendered_report" => Ok(ArtifactKind::RenderedReport),
            _ => Err(format!("Unknown artifact kind: {}", s)),
        }
    }
}

/// A persisted artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Target the artifact belongs to.
    pub target: String,
    /// Artifact kind.
    pub kind: ArtifactKind,
    /// Run that produced it.
    pub run_id: String,
    /// Serialized JSON or rendered text.
    pub content: String,
    /// When it was written.
    pub created_at: DateTime<Utc>,
}

/// What an event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A pipeline stage began.
    StageStarted,
    /// A pipeline stage produced its artifact.
    StageCompleted,
    /// An investigation question ended with the completion sentinel.
    QuestionCompleted,
    /// An investigation question hit the iteration ceiling.
    QuestionExhausted,
    /// The run finished successfully.
    RunCompleted,
    /// The run stopped on an error or cancellation.
    RunFailed,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::StageStarted => write!(f, "stage_started"),
            EventKind::StageCompleted => write!(f, "stage_completed"),
            EventKind::QuestionCompleted => write!(f, "question_completed"),
            EventKind::QuestionExhausted => write!(f, "question_exhausted"),
            EventKind::RunCompleted => write!(f, "run_completed"),
            EventKind::RunFailed => write!(f, "run_failed"),
        }
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "stage_started" => Ok(EventKind::StageStarted),
            "stage_completed" => Ok(EventKind::StageCompleted),
            "question_completed" => Ok(EventKind::QuestionCompleted),
            "question_exhausted" => Ok(EventKind::QuestionExhausted),
            "run_completed" => Ok(EventKind::RunCompleted),
            "run_failed" => Ok(EventKind::RunFailed),
            _ => Err(format!("Unknown event kind: {}", s)),
        }
    }
}

/// One entry of a target's append-only event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    /// Unique event identifier.
    pub id: String,
    /// Run the event belongs to.
    pub run_id: String,
    /// Target the run analyzes.
    pub target: String,
    /// Pipeline stage, e.g. `planning`.
    pub stage: String,
    /// What happened.
    pub kind: EventKind,
    /// Structured details.
    pub detail: Option<serde_json::Value>,
    /// When it happened.
    pub created_at: DateTime<Utc>,
}

impl RunRecord {
    /// Start a new run for `target`.
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            target: target.into(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            error: None,
        }
    }

    /// Mark as completed.
    pub fn complete(mut self) -> Self {
        self.status = RunStatus::Completed;
        self.finished_at = Some(Utc::now());
        self
    }

    /// Mark as failed.
    pub fn fail(mut self, error: impl Into<String>) -> Self {
        self.status = RunStatus::Failed;
        self.error = Some(error.into());
        self.finished_at = Some(Utc::now());
        self
    }

    /// Mark as cancelled.
    pub fn cancel(mut self) -> Self {
        self.status = RunStatus::Cancelled;
        self.error = Some("cancelled".to_string());
        self.finished_at = Some(Utc::now());
        self
    }
}

impl Artifact {
    /// Create an artifact produced by `run_id`.
    pub fn new(
        target: impl Into<String>,
        kind: ArtifactKind,
        run_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            target: target.into(),
            kind,
            run_id: run_id.into(),
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

impl RunEvent {
    /// Create an event for `run`.
    pub fn new(run: &RunRecord, stage: impl Into<String>, kind: EventKind) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            run_id: run.id.clone(),
            target: run.target.clone(),
            stage: stage.into(),
            kind,
            detail: None,
            created_at: Utc::now(),
        }
    }

    /// Attach structured details.
    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// Storage backend for runs, artifacts and events.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Record a new run.
    async fn create_run(&self, run: &RunRecord) -> StorageResult<()>;
    /// Update a run's status.
    async fn update_run(&self, run: &RunRecord) -> StorageResult<()>;
    /// Get a run by ID.
    async fn get_run(&self, id: &str) -> StorageResult<Option<RunRecord>>;
    /// Most recent run for a target.
    async fn latest_run(&self, target: &str) -> StorageResult<Option<RunRecord>>;

    /// Insert or replace the artifact of its kind for its target.
    async fn save_artifact(&self, artifact: &Artifact) -> StorageResult<()>;
    /// Get the artifact of `kind` for `target`.
    async fn get_artifact(&self, target: &str, kind: ArtifactKind)
        -> StorageResult<Option<Artifact>>;

    /// Append to a target's event log.
    async fn append_event(&self, event: &RunEvent) -> StorageResult<()>;
    /// A target's event log in insertion order.
    async fn get_events(&self, target: &str) -> StorageResult<Vec<RunEvent>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_lifecycle() {
        let run = RunRecord::new("alice");
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.finished_at.is_none());

        let failed = run.clone().fail("boom");
        assert_eq!(failed.status, RunStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("boom"));
        assert!(failed.finished_at.is_some());

        let done = run.complete();
        assert_eq!(done.status, RunStatus::Completed);
    }

    #[test]
    fn test_enum_string_round_trips() {
        for kind in [
            ArtifactKind::Plan,
            ArtifactKind::CheckReport,
            ArtifactKind::FinalReport,
            ArtifactKind::RenderedReport,
        ] {
            assert_eq!(kind.to_string().parse::<ArtifactKind>().unwrap(), kind);
        }
        for status in [
            RunStatus::Running,
            RunStatus::Completed,
            RunStatus::Failed,
            RunStatus::Cancelled,
        ] {
            assert_eq!(status.to_string().parse::<RunStatus>().unwrap(), status);
        }
        assert_eq!(
            "question_exhausted".parse::<EventKind>().unwrap(),
            EventKind::QuestionExhausted
        );
        assert!("bogus".parse::<EventKind>().is_err());
    }

    #[test]
    fn test_event_builder() {
        let run = RunRecord::new("r/OpenAI");
        let event = RunEvent::new(&run, "planning", EventKind::StageStarted)
            .with_detail(serde_json::json!({"perspectives": 3}));
        assert_eq!(event.run_id, run.id);
        assert_eq!(event.target, "r/OpenAI");
        assert_eq!(event.detail.unwrap()["perspectives"], 3);
    }
}
