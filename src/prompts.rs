//! Centralized prompt definitions for the pipeline roles
//!
//! Every system prompt and request template used by the planner, expert,
//! solver, checker and scorer lives here. Templates are plain functions so
//! the values they interpolate are explicit at the call site.

/// System prompt for the planner.
const PLANNER_PROMPT: &str = r#"ROLE: You are the meta controller for bootstrapping the Reddit user/community analysis. You are responsible for building the analysis pipeline and coordinating the analysis perspectives.

ACTION: To analyze the Reddit user/community {target}, we have assembled a team with many domain expert analysts.
Based on your expertise, please devise a structured plan for each analyst to follow. The plan should include multiple perspectives, each of which will be assigned to a specific analyst.
Each perspective should include a detailed prompt to guide the analysts effectively.

Suggested considerations:
- Content Analysis: topics discussed, sentiment, language patterns, content quality, recurring themes, key interests and communication styles.
- User Behavior: posting frequency, comment frequency, engagement levels and interaction patterns with other users.
- Community Engagement: role and impact within the community, influence, reputation and contribution to discussions.
- Network Analysis: interaction network, key connections, influence patterns and community structure.
- Other Perspectives: add any other perspective you consider valuable.

Known tools:
{capabilities}"#;

/// Planner system prompt for `target`, listing the capabilities analysts can call.
pub fn planner_system(target: &str, capability_catalog: &str) -> String {
    PLANNER_PROMPT
        .replace("{target}", target)
        .replace("{capabilities}", capability_catalog)
}

/// Planner request asking for an analysis plan matching `schema`.
pub fn planner_request(target: &str, schema: &str) -> String {
    format!(
        r#"To analyze the Reddit user/community {target}, please devise a structured plan for each analyst to follow.

REQUIREMENTS for ALL analysts:
- ALL ANALYSTS SHOULD use the provided tools to gather and analyze data.
- When analyzing text content, focus on both quantitative metrics (word count, frequency) and qualitative aspects (sentiment, tone, topic relevance).
- When analyzing user behavior, consider both individual activity and comparative metrics within the community.
- For network analysis, focus on identifying key connections and influence patterns.
- Always ground your analysis in evidence from the data.

The response MUST be an instance of the following JSON schema:

{schema}

Make sure your response is ONE valid JSON object that follows this schema exactly. Do not output the schema definition itself."#
    )
}

/// System prompt for a perspective expert.
pub fn expert_system(perspective: &str) -> String {
    format!(
        "ROLE: You are a professional Reddit user/community analyst on the {perspective} domain. \
Keep in mind that you are Ken Jennings-level with trivia, and Mensa-level with puzzles, so there should be a deep well to draw from.\n\
ACTION: Analyze the Reddit user/community from the {perspective} perspective to uncover insights and patterns."
    )
}

/// Guidance handed to the breakdown request, assembled from a perspective.
pub fn perspective_tips(prompt: &str, tips: &[String], tool_suggestions: &[String]) -> String {
    format!(
        "{}\nTIPs:\n- {}\nTOOL SUGGESTIONS:\n- {}",
        prompt,
        tips.join("\n- "),
        tool_suggestions.join("\n- ")
    )
}

/// Breakdown request asking an expert for a perspective task.
pub fn breakdown_request(target: &str, tips: &str) -> String {
    format!(
        r#"To analyze the Reddit user/community {target}, we have assembled a team with multiple analysts.

Based on known and unknown facts, please devise a short bullet-point plan for each analyst to follow. The plan should include the target of the analysis and the TODO items with detailed prompts for better handling each item.

Here are some TIPs to help you with the plan and prompts:
{tips}

Please create a plan with the following structure:
- target: A string describing what you will analyze
- items: An array of TODO items, each with:
  - question: A specific question to analyze
  - prompt: Detailed instructions for answering the question

Example format:
{{
  "target": "content themes",
  "items": [
    {{
      "question": "What are the main topics?",
      "prompt": "Analyze the keywords and themes in the posts"
    }}
  ]
}}

Please output ONLY valid JSON with this structure. Do not output the schema definition itself."#
    )
}

/// Opening turn of an expert's synthesis transcript.
pub fn synthesis_opening(task_target: &str) -> String {
    format!("Please analyze the {}.", task_target)
}

/// The expert's restatement of its plan, preceding the investigation exchanges.
pub fn plan_summary(task_target: &str, questions: &[&str]) -> String {
    let items: Vec<String> = questions.iter().map(|q| format!("- {}", q)).collect();
    format!(
        "Here is the plan to analyze the {}:\n{}",
        task_target,
        items.join("\n")
    )
}

/// Final synthesis request over the merged investigation transcript.
pub fn synthesis_request(task_target: &str, perspective: &str, categories: &str) -> String {
    format!(
        r#"Please analyze the {task_target} from the perspective of {perspective}.

Focus on identifying key patterns, insights, and actionable information. Your analysis should include:
- Quantifiable metrics and trends
- Qualitative observations about behavior and content
- Comparisons to community norms or averages
- Potential strengths, weaknesses, or areas for improvement

The analysis should cover categories such as:
{categories}"#
    )
}

/// System prompt for the question solver.
pub fn solver_system(perspective: &str, sentinel: &str) -> String {
    format!(
        "ROLE: You are a professional Reddit user/community analyst on the {perspective} domain, good at solving questions. \
Keep in mind that you are Ken Jennings-level with trivia, and Mensa-level with puzzles, so there should be a deep well to draw from.\n\
ACTION: Collect as much information as possible about the Reddit user/community from the {perspective} perspective for the main analyst, until the request is fully satisfied. \
Provide complete information and conclusions in your analysis. DO NOT ask questions or request further instructions - simply provide your best complete analysis based on available information. \
NEVER use any placeholder when requesting. When you have fully addressed the request, please say {sentinel}."
    )
}

/// Opening user turn of one investigation question.
pub fn question_prompt(known_facts: &str, question: &str, prompt: &str) -> String {
    format!(
        "Known Facts: {}\n\nQuestion to analyze: {}\n\n{}",
        known_facts, question, prompt
    )
}

/// Nudge sent when an answer arrives without the completion sentinel.
pub fn continue_prompt(sentinel: &str) -> String {
    format!(
        "Continue analyzing this question. When you have completed the analysis, include '{}' at the end of your response.",
        sentinel
    )
}

/// System prompt for the checker.
pub const CHECKER_SYSTEM_PROMPT: &str = r#"ROLE: Reddit Analysis Report Evaluator

You are an expert evaluator to check the logical consistency and reasoning chain of the analysis result. You need to evaluate the provided analysis step by step and identify any contradictions or missing logical links. You should infer the overall quality of each analysis report and assign credibility weights based on evidence quality and reasoning soundness."#;

/// Check request over all perspective reports.
pub fn check_request(reports: &str, categories: &str, schema: &str) -> String {
    format!(
        r#"Here are different perspective analysis reports for analyzing the same Reddit user/community:
{reports}
Analyze this content, determine credibility weights for each perspective, and identify the overall quality of the analysis.
Provide justification for your credibility assessments based on:
- Evidence quality and relevance
- Reasoning soundness and logical consistency
- Completeness of analysis
- Presence of speculation vs. factual reasoning
- Consistency across perspectives
- Quality of data sources

{categories}

The response MUST be an instance of the following JSON schema:

{schema}

Make sure your response is ONE valid JSON object that follows this schema exactly."#
    )
}

/// System prompt for the scorer.
pub const SCORER_SYSTEM_PROMPT: &str =
    "ROLE: You are the final evaluator determining the comprehensive analysis of the Reddit user/community.";

/// Scoring request over all perspective reports and the check report.
pub fn score_request(reports: &str, check_report: &str, schema: &str) -> String {
    format!(
        r#"Here are different perspective analysis reports for analyzing the same Reddit user/community:
{reports}
And a weighted assessment of intents and credibilities from each perspective is provided:
{check_report}

Evaluate step by step as below:
1. Evaluate the logical consistency of the reasoning chain in the analysis result.
2. Identify any contradictions or missing logical links.
3. Explain the reasoning behind any detected inconsistencies.
4. Synthesize all perspectives into a comprehensive final analysis.
5. Identify key insights from the analysis.
6. Highlight strengths and weaknesses/areas for improvement.
7. Provide actionable recommendations.
8. Calculate an overall confidence score.

Wrap the output in `json` tags with the structure of the FinalReport.

{schema}"#
    )
}

/// Concatenate perspective reports for the checker and scorer.
pub fn format_reports<'a>(reports: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    reports
        .into_iter()
        .map(|(perspective, report)| format!("Report on {} perspective:\n{}\n\n", perspective, report))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_planner_system_interpolates() {
        let prompt = planner_system("alice", "- get_user_total_karma: karma");
        assert!(prompt.contains("user/community alice"));
        assert!(prompt.contains("- get_user_total_karma: karma"));
        assert!(!prompt.contains("{target}"));
    }

    #[test]
    fn test_question_prompt_layout() {
        let prompt = question_prompt(r#"{"total_posts":1}"#, "How active?", "Count posts.");
        assert_eq!(
            prompt,
            "Known Facts: {\"total_posts\":1}\n\nQuestion to analyze: How active?\n\nCount posts."
        );
    }

    #[test]
    fn test_sentinel_is_configurable() {
        assert!(continue_prompt("DONE").contains("include 'DONE'"));
        assert!(solver_system("content", "DONE").ends_with("please say DONE."));
    }

    #[test]
    fn test_breakdown_request_keeps_literal_braces() {
        let prompt = breakdown_request("alice", "tip");
        assert!(prompt.contains("\"target\": \"content themes\""));
        assert!(prompt.contains("{\n  \"target\""));
    }

    #[test]
    fn test_plan_summary_and_reports() {
        assert_eq!(
            plan_summary("activity", &["q1", "q2"]),
            "Here is the plan to analyze the activity:\n- q1\n- q2"
        );
        assert_eq!(
            format_reports([("content", "text")]),
            "Report on content perspective:\ntext\n\n"
        );
    }

    #[test]
    fn test_perspective_tips() {
        let tips = perspective_tips(
            "Look at topics",
            &["be concise".to_string()],
            &["get_user_activity_keywords".to_string()],
        );
        assert_eq!(
            tips,
            "Look at topics\nTIPs:\n- be concise\nTOOL SUGGESTIONS:\n- get_user_activity_keywords"
        );
    }
}
