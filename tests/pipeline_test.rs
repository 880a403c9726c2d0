//! End-to-end pipeline tests
//!
//! Drives the orchestrator against a mocked model that answers each role
//! the way a well-behaved provider would, with in-memory storage and small
//! in-process datasets.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mockall::mock;
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use reddit_report_generator::config::PipelineConfig;
use reddit_report_generator::dataset::{Comment, DatasetContext, Post};
use reddit_report_generator::error::{AppError, LlmError, LlmResult};
use reddit_report_generator::llm::{
    ChatModel, Completion, CompletionRequest, MessageRole, ToolCall,
};
use reddit_report_generator::pipeline::{RoleCore, RoleOrchestrator};
use reddit_report_generator::prompts;
use reddit_report_generator::retry::RetryPolicy;
use reddit_report_generator::storage::{ArtifactKind, EventKind, RunStatus, SqliteStorage, Storage};
use reddit_report_generator::tools::CapabilityRegistry;

mock! {
    pub Model {}

    #[async_trait]
    impl ChatModel for Model {
        async fn complete(&self, request: &CompletionRequest) -> LlmResult<Completion>;
    }
}

fn plan_json() -> String {
    json!({
        "perspectives": [{
            "name": "activity",
            "description": "How and how much the user participates",
            "prompt": "Quantify posting and commenting",
            "tool_suggestions": ["get_user_total_karma"],
            "tips": ["Use numbers"]
        }]
    })
    .to_string()
}

fn task_json() -> String {
    json!({
        "target": "alice's activity",
        "items": [
            {"question": "How much karma does alice have?", "prompt": "Use the karma tool"},
            {"question": "Is the karma mostly from posts?", "prompt": "Compare post and comment karma"}
        ]
    })
    .to_string()
}

fn check_json() -> String {
    json!({
        "perspective_weights": [{
            "perspective": "activity",
            "credibility": 0.8,
            "credibility_reasoning": "Grounded in tool output",
            "problems": []
        }]
    })
    .to_string()
}

fn final_json() -> String {
    let body = json!({
        "check_evaluations": [{"coherence": 0.9, "strength": 0.7}],
        "final_analysis": "Alice posts rarely but well.",
        "key_insights": ["All karma comes from one post"],
        "strengths": ["Well-received content"],
        "weaknesses": ["Low volume"],
        "recommendations": ["Engage in comments"],
        "confidence_score": 0.85,
        "summary": "Small, positive footprint."
    });
    format!("Here is the report:\n```json\n{}\n```", body)
}

/// Answers every role. Solver turns request karma once per question, then
/// finish with the sentinel.
fn route(request: &CompletionRequest) -> LlmResult<Completion> {
    let last = request.messages.last();
    let last_content = last.map(|m| m.content.as_str()).unwrap_or("");

    if request.system.contains("meta controller") {
        return Ok(Completion::text(plan_json()));
    }
    if request.system == prompts::CHECKER_SYSTEM_PROMPT {
        return Ok(Completion::text(check_json()));
    }
    if request.system == prompts::SCORER_SYSTEM_PROMPT {
        return Ok(Completion::text(final_json()));
    }
    if request.system.contains("good at solving questions") {
        if last.map(|m| m.role) == Some(MessageRole::Tool) {
            return Ok(Completion::text(format!("Karma data: {} END", last_content)));
        }
        return Ok(Completion::with_tool_calls(vec![ToolCall::new(
            "call_karma",
            "get_user_total_karma",
            r#"{"user_id":"alice"}"#,
        )]));
    }
    if last_content.contains("TODO items") {
        return Ok(Completion::text(task_json()));
    }
    Ok(Completion::text("Alice is a low-volume, well-received poster."))
}

fn create_test_context() -> DatasetContext {
    DatasetContext::new(
        vec![Post {
            author: "alice".to_string(),
            title: "Hello world".to_string(),
            selftext: "Great to be here".to_string(),
            subreddit: "OpenAI".to_string(),
            score: 5,
            id: "p1".to_string(),
            ..Default::default()
        }],
        vec![Comment {
            author: "bob".to_string(),
            body: "Welcome!".to_string(),
            subreddit: "OpenAI".to_string(),
            score: 2,
            id: "c1".to_string(),
            parent_id: "t3_p1".to_string(),
            ..Default::default()
        }],
    )
}

async fn create_test_orchestrator(
    model: MockModel,
    dir: &TempDir,
    settings: PipelineConfig,
) -> (RoleOrchestrator, Arc<SqliteStorage>) {
    let storage = Arc::new(
        SqliteStorage::new_in_memory()
            .await
            .expect("Failed to create in-memory storage"),
    );
    let core = RoleCore::new(
        Arc::new(model),
        RetryPolicy::new(3, Duration::from_millis(1), Duration::from_secs(5)),
    );
    let orchestrator = RoleOrchestrator::new(
        core,
        Arc::new(CapabilityRegistry::with_builtin_capabilities()),
        create_test_context(),
        storage.clone(),
        settings,
    )
    .with_categories(&json!({"categories": ["activity", "content"]}))
    .with_output_dir(dir.path().join("score_reports"));

    (orchestrator, storage)
}

#[cfg(test)]
mod end_to_end_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_full_run_produces_and_persists_report() {
        let dir = TempDir::new().unwrap();
        let mut model = MockModel::new();
        model.expect_complete().returning(route);
        let (orchestrator, storage) =
            create_test_orchestrator(model, &dir, PipelineConfig::default()).await;

        let output = orchestrator
            .run("alice", &CancellationToken::new())
            .await
            .expect("run should succeed");

        assert_eq!(output.plan.perspectives.len(), 1);
        assert_eq!(output.tasks[0].items.len(), 2);
        assert_eq!(output.perspective_reports.len(), 1);
        assert_eq!(output.perspective_reports[0].perspective, "activity");
        assert_eq!(output.check_report.perspective_weights[0].credibility, 0.8);
        assert_eq!(output.final_report.confidence_score, 0.85);
        assert!(output.rendered_report.contains("### activity"));

        // exported document matches the stored one
        let path = orchestrator.report_path("alice").unwrap();
        let exported = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(exported, output.rendered_report);

        for kind in [
            ArtifactKind::Plan,
            ArtifactKind::CheckReport,
            ArtifactKind::FinalReport,
            ArtifactKind::RenderedReport,
        ] {
            let artifact = storage.get_artifact("alice", kind).await.unwrap();
            assert_eq!(
                artifact.map(|a| a.run_id),
                Some(output.run_id.clone()),
                "missing {kind}"
            );
        }

        let run = storage.get_run(&output.run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_event_log_follows_stage_order() {
        let dir = TempDir::new().unwrap();
        let mut model = MockModel::new();
        model.expect_complete().returning(route);
        let (orchestrator, storage) =
            create_test_orchestrator(model, &dir, PipelineConfig::default()).await;

        orchestrator
            .run("alice", &CancellationToken::new())
            .await
            .unwrap();

        let events = storage.get_events("alice").await.unwrap();
        let trail: Vec<String> = events
            .iter()
            .map(|e| format!("{}:{}", e.stage, e.kind))
            .collect();
        assert_eq!(
            trail,
            [
                "planning:stage_started",
                "planning:stage_completed",
                "breakdown:stage_started",
                "breakdown:stage_completed",
                "investigation:stage_started",
                "investigation:question_completed",
                "investigation:question_completed",
                "investigation:stage_completed",
                "check:stage_started",
                "check:stage_completed",
                "score:stage_started",
                "score:stage_completed",
                "done:run_completed",
            ]
        );

        let detail = events[5].detail.as_ref().unwrap();
        assert_eq!(detail["perspective"], "activity");
        assert_eq!(detail["iterations"], 2);
    }

    #[tokio::test]
    async fn test_solver_sees_tool_results_and_known_facts() {
        let dir = TempDir::new().unwrap();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let recorder = seen.clone();

        let mut model = MockModel::new();
        model.expect_complete().returning(move |request| {
            if request.system.contains("good at solving questions") {
                recorder.lock().unwrap().push(request.clone());
            }
            route(request)
        });
        let (orchestrator, _storage) =
            create_test_orchestrator(model, &dir, PipelineConfig::default()).await;

        orchestrator
            .run("alice", &CancellationToken::new())
            .await
            .unwrap();

        let requests = seen.lock().unwrap();
        // two turns per question, two questions
        assert_eq!(requests.len(), 4);
        assert!(requests.iter().all(|r| r.tools.len() == 12));

        let first = &requests[0].messages;
        assert!(first[0].content.contains("\"total_post_karma\":5"));
        assert!(first[0].content.contains("How much karma does alice have?"));

        let tool_reply = requests[1].messages.last().unwrap();
        assert_eq!(tool_reply.tool_call_id.as_deref(), Some("call_karma"));
        assert_eq!(
            tool_reply.content,
            r#"{"post_karma":5,"comment_karma":0,"total_karma":5}"#
        );

        // the second question starts after the condensed first exchange
        let second = &requests[2].messages;
        assert_eq!(second.len(), 3);
        assert_eq!(second[0].content, "How much karma does alice have?");
        assert_eq!(second[1].role, MessageRole::Assistant);
        assert!(!second[1].content.contains("END"));
    }
}

#[cfg(test)]
mod bounded_loop_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_missing_sentinel_stops_at_iteration_ceiling() {
        let dir = TempDir::new().unwrap();
        let solver_calls = Arc::new(AtomicUsize::new(0));
        let counter = solver_calls.clone();

        let mut model = MockModel::new();
        model.expect_complete().returning(move |request| {
            if request.system.contains("good at solving questions") {
                counter.fetch_add(1, Ordering::SeqCst);
                return Ok(Completion::text("Still looking into it"));
            }
            route(request)
        });
        let (orchestrator, storage) =
            create_test_orchestrator(model, &dir, PipelineConfig::default()).await;

        let output = orchestrator
            .run("alice", &CancellationToken::new())
            .await
            .expect("exhausted questions still produce a report");

        // ten turns per question, two questions
        assert_eq!(solver_calls.load(Ordering::SeqCst), 20);
        assert_eq!(output.final_report.confidence_score, 0.85);

        let exhausted: Vec<_> = storage
            .get_events("alice")
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.kind == EventKind::QuestionExhausted)
            .collect();
        assert_eq!(exhausted.len(), 2);
        assert_eq!(exhausted[0].detail.as_ref().unwrap()["iterations"], 10);
    }

    #[tokio::test]
    async fn test_overflow_during_investigation_recovers() {
        let dir = TempDir::new().unwrap();
        let overflowed = Arc::new(AtomicUsize::new(0));
        let flag = overflowed.clone();

        let mut model = MockModel::new();
        model.expect_complete().returning(move |request| {
            let after_tool = request.messages.last().map(|m| m.role) == Some(MessageRole::Tool);
            if request.system.contains("good at solving questions")
                && after_tool
                && flag.fetch_add(1, Ordering::SeqCst) == 0
            {
                return Err(LlmError::ContextOverflow {
                    message: "maximum context length exceeded".to_string(),
                });
            }
            route(request)
        });
        let (orchestrator, _storage) =
            create_test_orchestrator(model, &dir, PipelineConfig::default()).await;

        let output = orchestrator
            .run("alice", &CancellationToken::new())
            .await
            .unwrap();
        assert!(overflowed.load(Ordering::SeqCst) >= 2);
        assert_eq!(output.perspective_reports.len(), 1);
    }
}

#[cfg(test)]
mod failure_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_fatal_provider_error_fails_run() {
        let dir = TempDir::new().unwrap();
        let mut model = MockModel::new();
        model.expect_complete().times(1).returning(|_| {
            Err(LlmError::Api {
                status: 401,
                message: "Invalid API key".to_string(),
            })
        });
        let (orchestrator, storage) =
            create_test_orchestrator(model, &dir, PipelineConfig::default()).await;

        let err = orchestrator
            .run("alice", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Llm(LlmError::Api { status: 401, .. })));

        let run = storage.latest_run("alice").await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.error.unwrap().contains("Invalid API key"));

        let events = storage.get_events("alice").await.unwrap();
        assert_eq!(events.last().unwrap().kind, EventKind::RunFailed);
        assert!(storage
            .get_artifact("alice", ArtifactKind::RenderedReport)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_malformed_plan_exhausts_retries() {
        let dir = TempDir::new().unwrap();
        let mut model = MockModel::new();
        model
            .expect_complete()
            .times(3)
            .returning(|_| Ok(Completion::text("I would rather chat about the weather.")));
        let (orchestrator, _storage) =
            create_test_orchestrator(model, &dir, PipelineConfig::default()).await;

        let err = orchestrator
            .run("alice", &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            AppError::RetryExhausted {
                operation, attempts, ..
            } => {
                assert_eq!(operation, "planning");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_cancelled_run_is_recorded() {
        let dir = TempDir::new().unwrap();
        let mut model = MockModel::new();
        model.expect_complete().returning(route);
        let (orchestrator, storage) =
            create_test_orchestrator(model, &dir, PipelineConfig::default()).await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = orchestrator.run("alice", &cancel).await.unwrap_err();
        assert!(matches!(err, AppError::Cancelled { .. }));

        let run = storage.latest_run("alice").await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Cancelled);
    }
}

#[cfg(test)]
mod batch_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_batch_skips_already_reported_targets() {
        let dir = TempDir::new().unwrap();
        let mut model = MockModel::new();
        model.expect_complete().returning(route);
        let settings = PipelineConfig {
            run_parallelism: 2,
            ..Default::default()
        };
        let (orchestrator, storage) = create_test_orchestrator(model, &dir, settings).await;

        orchestrator
            .run("alice", &CancellationToken::new())
            .await
            .unwrap();

        let summary = orchestrator
            .run_batch(
                vec!["alice".to_string(), "r/OpenAI".to_string()],
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(summary.skipped, ["alice"]);
        assert_eq!(summary.completed, ["r/OpenAI"]);
        assert!(summary.failed.is_empty());

        let path = orchestrator.report_path("r/OpenAI").unwrap();
        assert!(path.ends_with("score_reports/r_OpenAI.output.md"));
        assert!(path.exists());
        assert!(storage
            .get_artifact("r/OpenAI", ArtifactKind::RenderedReport)
            .await
            .unwrap()
            .is_some());
    }
}
