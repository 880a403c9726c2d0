use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::extract::{check_unit_interval, StructuredOutput};
use crate::llm::ChatMessage;

/// A named analytical lens assigned to one expert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Perspective {
    /// The name of the analysis perspective
    pub name: String,
    /// The description of the perspective, explaining the focus of the analysis
    pub description: String,
    /// The prompt for the perspective, helping analysts to analyze effectively from this perspective
    pub prompt: String,
    /// The list of tools used in the perspective, providing suggestions for analysts
    #[serde(default)]
    pub tool_suggestions: Vec<String>,
    /// The tips for the perspective, guiding analysts to analyze more effectively
    #[serde(default)]
    pub tips: Vec<String>,
}

/// The planner's output: which perspectives to analyze.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AnalysisPlan {
    /// The list of perspectives for the analysis
    pub perspectives: Vec<Perspective>,
}

impl StructuredOutput for AnalysisPlan {
    const NAME: &'static str = "AnalysisPlan";

    fn validate(&self) -> Result<(), String> {
        if self.perspectives.is_empty() {
            return Err("plan has no perspectives".to_string());
        }
        if self.perspectives.iter().any(|p| p.name.trim().is_empty()) {
            return Err("perspective name cannot be empty".to_string());
        }
        Ok(())
    }
}

/// One concrete sub-question of a perspective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TodoItem {
    /// The TODO item in the plan, in form of a question
    pub question: String,
    /// The detailed prompt for better handling the question
    pub prompt: String,
}

/// An expert's breakdown of its perspective into questions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PerspectiveTask {
    /// The target of the plan
    pub target: String,
    /// The TODO items in the plan
    pub items: Vec<TodoItem>,
}

impl StructuredOutput for PerspectiveTask {
    const NAME: &'static str = "PerspectiveTask";

    fn validate(&self) -> Result<(), String> {
        if self.items.is_empty() {
            return Err("task has no TODO items".to_string());
        }
        if self.items.iter().any(|i| i.question.trim().is_empty()) {
            return Err("TODO question cannot be empty".to_string());
        }
        Ok(())
    }
}

/// Credibility of one perspective report, as judged by the checker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CredibilityAssessment {
    /// The perspective name
    pub perspective: String,
    /// Credibility weight between 0.0 and 1.0
    pub credibility: f64,
    /// Reasoning for the assigned credibility weight
    pub credibility_reasoning: String,
    /// List of contradictions or missing logical links in the analysis
    #[serde(default)]
    pub problems: Vec<String>,
}

/// The checker's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CheckReport {
    /// List of analyses with their assigned credibility weights
    pub perspective_weights: Vec<CredibilityAssessment>,
}

impl CheckReport {
    /// Reported perspectives that received no assessment.
    pub fn unassessed<'a>(&self, reports: &'a [PerspectiveReport]) -> Vec<&'a str> {
        reports
            .iter()
            .map(|r| r.perspective.as_str())
            .filter(|name| {
                !self
                    .perspective_weights
                    .iter()
                    .any(|w| w.perspective.trim().eq_ignore_ascii_case(name.trim()))
            })
            .collect()
    }

    /// Assessed perspectives that match no report.
    pub fn unknown<'a>(&'a self, reports: &[PerspectiveReport]) -> Vec<&'a str> {
        self.perspective_weights
            .iter()
            .map(|w| w.perspective.as_str())
            .filter(|name| {
                !reports
                    .iter()
                    .any(|r| r.perspective.trim().eq_ignore_ascii_case(name.trim()))
            })
            .collect()
    }
}

impl StructuredOutput for CheckReport {
    const NAME: &'static str = "CheckReport";

    fn validate(&self) -> Result<(), String> {
        for weight in &self.perspective_weights {
            check_unit_interval("credibility", weight.credibility)?;
        }
        Ok(())
    }
}

/// Scorer's evaluation of one perspective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CheckEval {
    /// Coherence with known knowledge and evaluation criteria, between 0.0 and 1.0
    pub coherence: f64,
    /// Supporting evidence strength, between 0.0 and 1.0
    pub strength: f64,
}

/// The terminal artifact of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FinalReport {
    /// The evaluation of the analysis check reports in each domain
    pub check_evaluations: Vec<CheckEval>,
    /// The most comprehensive analysis of the user/community
    pub final_analysis: String,
    /// List of key insights from the analysis
    pub key_insights: Vec<String>,
    /// Strengths of the user/community
    pub strengths: Vec<String>,
    /// Weaknesses or areas for improvement
    pub weaknesses: Vec<String>,
    /// Recommendations for engagement or improvement
    pub recommendations: Vec<String>,
    /// Overall confidence score between 0.0 and 1.0
    pub confidence_score: f64,
    /// Summary of the analysis and justification
    pub summary: String,
}

impl StructuredOutput for FinalReport {
    const NAME: &'static str = "FinalReport";

    fn validate(&self) -> Result<(), String> {
        for eval in &self.check_evaluations {
            check_unit_interval("coherence", eval.coherence)?;
            check_unit_interval("strength", eval.strength)?;
        }
        check_unit_interval("confidence_score", self.confidence_score)
    }
}

/// Synthesized report text of one perspective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerspectiveReport {
    /// Perspective name from the plan.
    pub perspective: String,
    /// Synthesized markdown report.
    pub report: String,
}

/// How an investigation question ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvestigationOutcome {
    /// The model emitted the completion sentinel; it has been stripped.
    Completed {
        /// Final answer.
        answer: String,
        /// Model turns spent.
        iterations: usize,
    },
    /// The iteration ceiling was reached; the answer is best-effort.
    Exhausted {
        /// Last answer the model gave.
        answer: String,
        /// Model turns spent, equal to the ceiling.
        iterations: usize,
    },
}

impl InvestigationOutcome {
    /// The final (or best-effort) answer.
    pub fn answer(&self) -> &str {
        match self {
            Self::Completed { answer, .. } | Self::Exhausted { answer, .. } => answer,
        }
    }

    /// Model turns spent.
    pub fn iterations(&self) -> usize {
        match self {
            Self::Completed { iterations, .. } | Self::Exhausted { iterations, .. } => *iterations,
        }
    }

    /// Whether the sentinel was observed.
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// Condensed two-message exchange merged into the perspective transcript.
    pub fn exchange(&self, question: &str) -> [ChatMessage; 2] {
        [
            ChatMessage::user(question),
            ChatMessage::assistant(self.answer()),
        ]
    }
}

/// Everything a completed run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisOutput {
    /// Analyzed user or community.
    pub target: String,
    /// Id of the stored run.
    pub run_id: String,
    /// Planner output.
    pub plan: AnalysisPlan,
    /// Question lists, one per perspective, in plan order.
    pub tasks: Vec<PerspectiveTask>,
    /// Synthesized reports, in plan order.
    pub perspective_reports: Vec<PerspectiveReport>,
    /// Checker output.
    pub check_report: CheckReport,
    /// Scorer output.
    pub final_report: FinalReport,
    /// Markdown document written to the output directory.
    pub rendered_report: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::extract;
    use serde_json::json;

    fn final_report_json(confidence: f64) -> serde_json::Value {
        json!({
            "check_evaluations": [{"coherence": 0.8, "strength": 0.6}],
            "final_analysis": "a",
            "key_insights": ["i"],
            "strengths": ["s"],
            "weaknesses": ["w"],
            "recommendations": ["r"],
            "confidence_score": confidence,
            "summary": "sum"
        })
    }

    #[test]
    fn test_final_report_range_validation() {
        let ok: FinalReport = extract(&final_report_json(0.75).to_string()).unwrap();
        assert_eq!(ok.confidence_score, 0.75);
        assert!(extract::<FinalReport>(&final_report_json(1.2).to_string()).is_err());
    }

    #[test]
    fn test_check_report_rejects_out_of_range_credibility() {
        let raw = json!({
            "perspective_weights": [{
                "perspective": "content",
                "credibility": -0.1,
                "credibility_reasoning": "x",
                "problems": []
            }]
        });
        assert!(extract::<CheckReport>(&raw.to_string()).is_err());
    }

    #[test]
    fn test_check_report_coverage() {
        let reports = vec![
            PerspectiveReport {
                perspective: "activity".to_string(),
                report: "r".to_string(),
            },
            PerspectiveReport {
                perspective: "content".to_string(),
                report: "r".to_string(),
            },
        ];
        let assessment = |name: &str| CredibilityAssessment {
            perspective: name.to_string(),
            credibility: 0.5,
            credibility_reasoning: "x".to_string(),
            problems: vec![],
        };

        let check = CheckReport {
            perspective_weights: vec![assessment("Activity"), assessment("tone")],
        };
        assert_eq!(check.unassessed(&reports), vec!["content"]);
        assert_eq!(check.unknown(&reports), vec!["tone"]);

        let complete = CheckReport {
            perspective_weights: vec![assessment("activity"), assessment("content")],
        };
        assert!(complete.unassessed(&reports).is_empty());
        assert!(complete.unknown(&reports).is_empty());
    }

    #[test]
    fn test_plan_requires_perspectives() {
        assert!(extract::<AnalysisPlan>(r#"{"perspectives": []}"#).is_err());

        let plan: AnalysisPlan = extract(
            r#"{"perspectives": [{"name": "content", "description": "d", "prompt": "p"}]}"#,
        )
        .unwrap();
        assert!(plan.perspectives[0].tips.is_empty());
    }

    #[test]
    fn test_task_requires_items() {
        assert!(extract::<PerspectiveTask>(r#"{"target": "t", "items": []}"#).is_err());
    }

    #[test]
    fn test_schema_mentions_fields() {
        let schema = FinalReport::schema_json();
        assert!(schema.contains("confidence_score"));
        assert!(schema.contains("Overall confidence score"));
    }

    #[test]
    fn test_outcome_exchange() {
        let outcome = InvestigationOutcome::Exhausted {
            answer: "partial".to_string(),
            iterations: 10,
        };
        let [question, answer] = outcome.exchange("q?");
        assert_eq!(question.content, "q?");
        assert_eq!(answer.content, "partial");
        assert!(!outcome.is_completed());
        assert_eq!(outcome.iterations(), 10);
    }
}
