use std::fmt::Write as _;

use tokio_util::sync::CancellationToken;
use tracing::info;

use super::core::RoleCore;
use super::types::{CheckReport, FinalReport, PerspectiveReport};
use crate::error::{AppResult, StorageError};
use crate::extract::StructuredOutput;
use crate::llm::{ChatMessage, CompletionRequest};
use crate::prompts;

/// Produces the final report from the perspective reports and the check.
#[derive(Clone)]
pub struct Scorer {
    core: RoleCore,
}

impl Scorer {
    /// Create a new scorer.
    pub fn new(core: RoleCore) -> Self {
        Self { core }
    }

    /// Synthesize and score the final report.
    pub async fn score(
        &self,
        reports: &[PerspectiveReport],
        check: &CheckReport,
        cancel: &CancellationToken,
    ) -> AppResult<FinalReport> {
        let formatted = prompts::format_reports(
            reports
                .iter()
                .map(|r| (r.perspective.as_str(), r.report.as_str())),
        );
        let check_json = serde_json::to_string_pretty(check).map_err(StorageError::from)?;
        let request = CompletionRequest::new(
            prompts::SCORER_SYSTEM_PROMPT,
            vec![ChatMessage::user(prompts::score_request(
                &formatted,
                &check_json,
                &FinalReport::schema_json(),
            ))],
        );

        let report: FinalReport = self.core.request_record("score", &request, cancel).await?;

        info!(
            confidence = report.confidence_score,
            insights = report.key_insights.len(),
            "Final report scored"
        );
        Ok(report)
    }
}

fn bullet_list(out: &mut String, items: &[String]) {
    for item in items {
        let _ = writeln!(out, "- {}", item);
    }
}

/// Render the final report and the raw perspective reports as Markdown.
pub fn render_report(report: &FinalReport, perspectives: &[PerspectiveReport]) -> String {
    let mut out = String::from("# Reddit User/Community Analysis Report\n\n");

    let _ = write!(out, "## Final Analysis\n\n{}\n\n", report.final_analysis);

    out.push_str("## Key Insights\n\n");
    bullet_list(&mut out, &report.key_insights);

    out.push_str("\n## Strengths\n\n");
    bullet_list(&mut out, &report.strengths);

    out.push_str("\n## Areas for Improvement\n\n");
    bullet_list(&mut out, &report.weaknesses);

    out.push_str("\n## Recommendations\n\n");
    bullet_list(&mut out, &report.recommendations);

    let _ = write!(
        out,
        "\n## Overall Confidence Score\n\n{:.2}\n\n## Summary\n\n{}\n\n## Perspective Reports\n\n",
        report.confidence_score, report.summary
    );

    for perspective in perspectives {
        let _ = write!(
            out,
            "### {}\n\n{}\n\n",
            perspective.perspective, perspective.report
        );
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::types::CheckEval;

    fn create_test_report() -> FinalReport {
        FinalReport {
            check_evaluations: vec![CheckEval {
                coherence: 0.9,
                strength: 0.7,
            }],
            final_analysis: "Alice is an occasional poster.".to_string(),
            key_insights: vec!["Posts rarely".to_string(), "Well received".to_string()],
            strengths: vec!["Positive tone".to_string()],
            weaknesses: vec!["Low volume".to_string()],
            recommendations: vec!["Post more".to_string()],
            confidence_score: 0.756,
            summary: "Small but positive footprint.".to_string(),
        }
    }

    #[test]
    fn test_render_report_sections_in_order() {
        let rendered = render_report(
            &create_test_report(),
            &[
                PerspectiveReport {
                    perspective: "content".to_string(),
                    report: "Content report".to_string(),
                },
                PerspectiveReport {
                    perspective: "behavior".to_string(),
                    report: "Behavior report".to_string(),
                },
            ],
        );

        let headings = [
            "# Reddit User/Community Analysis Report",
            "## Final Analysis",
            "## Key Insights",
            "## Strengths",
            "## Areas for Improvement",
            "## Recommendations",
            "## Overall Confidence Score",
            "## Summary",
            "## Perspective Reports",
            "### content",
            "### behavior",
        ];
        let mut cursor = 0;
        for heading in headings {
            let found = rendered[cursor..]
                .find(heading)
                .unwrap_or_else(|| panic!("missing or out of order: {heading}"));
            cursor += found + heading.len();
        }

        assert!(rendered.contains("- Posts rarely\n- Well received\n"));
        assert!(rendered.contains("\n0.76\n"));
        assert!(rendered.ends_with("Behavior report\n\n"));
    }

    #[test]
    fn test_render_report_without_perspectives() {
        let rendered = render_report(&create_test_report(), &[]);
        assert!(rendered.ends_with("## Perspective Reports\n\n"));
    }
}
