use tokio_util::sync::CancellationToken;
use tracing::info;

use super::core::RoleCore;
use super::types::AnalysisPlan;
use crate::error::AppResult;
use crate::extract::StructuredOutput;
use crate::llm::{ChatMessage, CompletionRequest};
use crate::prompts;
use crate::tools::CapabilityRegistry;

/// Sampling temperature for plan generation.
pub const PLANNER_TEMPERATURE: f64 = 1.0;

/// Devises the set of perspectives a target is analyzed from.
#[derive(Clone)]
pub struct Planner {
    core: RoleCore,
}

impl Planner {
    /// Create a new planner.
    pub fn new(core: RoleCore) -> Self {
        Self { core }
    }

    /// Build the analysis plan for `target`, telling the model which
    /// capabilities its analysts will have.
    pub async fn build_plan(
        &self,
        target: &str,
        registry: &CapabilityRegistry,
        cancel: &CancellationToken,
    ) -> AppResult<AnalysisPlan> {
        let request = CompletionRequest::new(
            prompts::planner_system(target, &registry.catalog()),
            vec![ChatMessage::user(prompts::planner_request(
                target,
                &AnalysisPlan::schema_json(),
            ))],
        )
        .with_temperature(PLANNER_TEMPERATURE);

        let plan: AnalysisPlan = self.core.request_record("planning", &request, cancel).await?;

        info!(
            perspectives = plan.perspectives.len(),
            target = %target,
            "Analysis plan ready"
        );
        Ok(plan)
    }
}
