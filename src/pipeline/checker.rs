use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::core::RoleCore;
use super::types::{CheckReport, PerspectiveReport};
use crate::error::AppResult;
use crate::extract::StructuredOutput;
use crate::llm::{ChatMessage, CompletionRequest};
use crate::prompts;

/// Cross-checks perspective reports and weighs their credibility.
#[derive(Clone)]
pub struct Checker {
    core: RoleCore,
}

impl Checker {
    /// Create a new checker.
    pub fn new(core: RoleCore) -> Self {
        Self { core }
    }

    /// Assess every perspective report.
    pub async fn check(
        &self,
        reports: &[PerspectiveReport],
        categories: &str,
        cancel: &CancellationToken,
    ) -> AppResult<CheckReport> {
        let formatted = prompts::format_reports(
            reports
                .iter()
                .map(|r| (r.perspective.as_str(), r.report.as_str())),
        );
        let request = CompletionRequest::new(
            prompts::CHECKER_SYSTEM_PROMPT,
            vec![ChatMessage::user(prompts::check_request(
                &formatted,
                categories,
                &CheckReport::schema_json(),
            ))],
        );

        let check: CheckReport = self.core.request_record("check", &request, cancel).await?;

        let unassessed = check.unassessed(reports);
        let unknown = check.unknown(reports);
        if !unassessed.is_empty() || !unknown.is_empty() {
            warn!(
                ?unassessed,
                ?unknown,
                "Credibility assessments do not match the perspective reports"
            );
        }

        info!(
            assessments = check.perspective_weights.len(),
            "Credibility check complete"
        );
        Ok(check)
    }
}
