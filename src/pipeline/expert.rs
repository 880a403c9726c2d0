use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::core::RoleCore;
use super::types::{Perspective, PerspectiveTask};
use crate::conversation::ConversationBudget;
use crate::error::AppResult;
use crate::llm::{ChatMessage, CompletionRequest};
use crate::prompts;

/// Sampling temperature for breaking a perspective into questions.
pub const BREAKDOWN_TEMPERATURE: f64 = 0.7;

/// Owns one perspective: breaks it into questions and writes its report
/// once the questions are investigated.
#[derive(Clone)]
pub struct DomainExpert {
    core: RoleCore,
    perspective: Perspective,
    budget: ConversationBudget,
}

impl DomainExpert {
    /// Create an expert for `perspective`.
    pub fn new(core: RoleCore, perspective: Perspective, budget: ConversationBudget) -> Self {
        Self {
            core,
            perspective,
            budget,
        }
    }

    /// The perspective this expert covers.
    pub fn perspective(&self) -> &Perspective {
        &self.perspective
    }

    fn system_prompt(&self) -> String {
        prompts::expert_system(&self.perspective.name)
    }

    /// Break the perspective down into TODO items for `target`.
    pub async fn breakdown(
        &self,
        target: &str,
        cancel: &CancellationToken,
    ) -> AppResult<PerspectiveTask> {
        let tips = prompts::perspective_tips(
            &self.perspective.prompt,
            &self.perspective.tips,
            &self.perspective.tool_suggestions,
        );
        let request = CompletionRequest::new(
            self.system_prompt(),
            vec![ChatMessage::user(prompts::breakdown_request(target, &tips))],
        )
        .with_temperature(BREAKDOWN_TEMPERATURE);

        let task: PerspectiveTask = self.core.request_record("breakdown", &request, cancel).await?;

        info!(
            perspective = %self.perspective.name,
            items = task.items.len(),
            "Perspective broken down"
        );
        Ok(task)
    }

    /// Write the perspective report from the merged investigation exchanges.
    pub async fn synthesize(
        &self,
        task: &PerspectiveTask,
        exchanges: &[ChatMessage],
        categories: &str,
        cancel: &CancellationToken,
    ) -> AppResult<String> {
        let questions: Vec<&str> = task.items.iter().map(|i| i.question.as_str()).collect();

        let mut messages = Vec::with_capacity(exchanges.len() + 3);
        messages.push(ChatMessage::user(prompts::synthesis_opening(&task.target)));
        messages.push(ChatMessage::assistant(prompts::plan_summary(
            &task.target,
            &questions,
        )));
        messages.extend_from_slice(exchanges);
        messages.push(ChatMessage::user(prompts::synthesis_request(
            &task.target,
            &self.perspective.name,
            categories,
        )));

        let trimmed = self.budget.trim(&messages);
        if trimmed.len() < messages.len() {
            debug!(
                perspective = %self.perspective.name,
                dropped = messages.len() - trimmed.len(),
                "Synthesis transcript trimmed"
            );
        }

        let request = CompletionRequest::new(self.system_prompt(), trimmed);
        let report = self.core.request_text("synthesis", &request, cancel).await?;

        info!(
            perspective = %self.perspective.name,
            report_chars = report.len(),
            "Perspective report written"
        );
        Ok(report)
    }
}
