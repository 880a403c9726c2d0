//! The per-question investigation loop.
//!
//! A solver alternates between the model and the capability dispatcher until
//! the model signals completion with the sentinel or the iteration ceiling is
//! reached. Provider failures inside the loop go through the retry policy:
//! overflows roll the transcript back to its last capability request,
//! transient errors back off, everything else propagates.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::core::RoleCore;
use super::types::{InvestigationOutcome, TodoItem};
use crate::config::PipelineConfig;
use crate::conversation::ConversationBudget;
use crate::error::AppResult;
use crate::llm::{ChatMessage, CompletionRequest, MessageRole};
use crate::prompts;
use crate::retry::RetryDecision;
use crate::tools::ToolDispatcher;

/// Answers the TODO items of one perspective, one at a time.
#[derive(Clone)]
pub struct QuestionSolver {
    core: RoleCore,
    dispatcher: ToolDispatcher,
    budget: ConversationBudget,
    perspective: String,
    known_facts: String,
    sentinel: String,
    max_iterations: usize,
}

impl QuestionSolver {
    /// Create a solver for `perspective`. `known_facts` is the serialized
    /// fact sheet included in every question.
    pub fn new(
        core: RoleCore,
        dispatcher: ToolDispatcher,
        perspective: impl Into<String>,
        known_facts: impl Into<String>,
        settings: &PipelineConfig,
    ) -> Self {
        Self {
            core,
            dispatcher,
            budget: ConversationBudget::new(settings.token_limit),
            perspective: perspective.into(),
            known_facts: known_facts.into(),
            sentinel: settings.completion_sentinel.clone(),
            max_iterations: settings.max_iterations.max(1),
        }
    }

    /// Strip every occurrence of the sentinel, or `None` if absent.
    fn completed_answer(&self, content: &str) -> Option<String> {
        if self.sentinel.is_empty() || !content.contains(&self.sentinel) {
            return None;
        }
        Some(content.replace(&self.sentinel, "").trim().to_string())
    }

    /// Investigate `item`, continuing the perspective's `transcript` of
    /// earlier exchanges.
    pub async fn investigate(
        &self,
        transcript: &[ChatMessage],
        item: &TodoItem,
        cancel: &CancellationToken,
    ) -> AppResult<InvestigationOutcome> {
        let system = prompts::solver_system(&self.perspective, &self.sentinel);
        let tools = self.dispatcher.registry().definitions();
        let opening = ChatMessage::user(prompts::question_prompt(
            &self.known_facts,
            &item.question,
            &item.prompt,
        ));
        let operation = format!("investigation:{}", self.perspective);

        let mut history = transcript.to_vec();
        history.push(opening.clone());

        let mut iterations = 0;
        let mut failures = 0;
        let mut last_answer: Option<String> = None;

        while iterations < self.max_iterations {
            let request = CompletionRequest::new(system.clone(), self.budget.trim(&history))
                .with_tools(tools.clone());

            let completion = match self.core.complete_once(&operation, &request, cancel).await {
                Ok(completion) => {
                    failures = 0;
                    completion
                }
                Err(err) => {
                    failures += 1;
                    let retry = self.core.retry();
                    match retry.decide(failures, &err) {
                        RetryDecision::GiveUp => {
                            return Err(retry.exhausted(&operation, failures, err));
                        }
                        RetryDecision::Rollback => {
                            warn!(
                                perspective = %self.perspective,
                                question = %item.question,
                                attempt = failures,
                                error = %err,
                                "Context overflow, rolling back transcript"
                            );
                            history = ConversationBudget::rollback(history, &err);
                            if history.is_empty() {
                                history.push(opening.clone());
                            }
                        }
                        RetryDecision::Backoff(delay) => {
                            warn!(
                                perspective = %self.perspective,
                                attempt = failures,
                                delay_ms = delay.as_millis(),
                                error = %err,
                                "Transient provider error, backing off"
                            );
                            retry.pause(&operation, cancel, delay).await?;
                        }
                        RetryDecision::Resample => {
                            debug!(attempt = failures, error = %err, "Re-sampling");
                        }
                    }
                    continue;
                }
            };

            iterations += 1;

            if !completion.tool_calls.is_empty() {
                let calls = completion.tool_calls.clone();
                debug!(
                    perspective = %self.perspective,
                    iteration = iterations,
                    calls = calls.len(),
                    "Model requested capabilities"
                );
                history.push(completion.into_message());
                let results = self.dispatcher.dispatch(&calls).await?;
                history.extend(results);
                continue;
            }

            if let Some(answer) = self.completed_answer(&completion.content) {
                info!(
                    perspective = %self.perspective,
                    question = %item.question,
                    iterations,
                    "Question answered"
                );
                return Ok(InvestigationOutcome::Completed { answer, iterations });
            }

            last_answer = Some(completion.content.clone());
            history.push(ChatMessage::assistant(completion.content));
            history.push(ChatMessage::user(prompts::continue_prompt(&self.sentinel)));
        }

        let answer = last_answer
            .or_else(|| {
                history
                    .iter()
                    .rev()
                    .find(|m| m.role == MessageRole::Assistant && !m.content.trim().is_empty())
                    .map(|m| m.content.clone())
            })
            .unwrap_or_default();

        warn!(
            perspective = %self.perspective,
            question = %item.question,
            iterations,
            "Iteration ceiling reached without completion sentinel"
        );
        Ok(InvestigationOutcome::Exhausted { answer, iterations })
    }
}
