//! Core infrastructure shared by all pipeline roles.
//!
//! [`RoleCore`] bundles the model and the retry policy so every role issues
//! its provider calls the same way: under a timeout, cancellable, retried
//! according to the failure class, and (for structured stages) validated
//! through the extractor.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::extract::{extract, StructuredOutput};
use crate::llm::{ChatModel, Completion, CompletionRequest};
use crate::retry::RetryPolicy;

/// Model and retry policy shared by every role of a run.
#[derive(Clone)]
pub struct RoleCore {
    model: Arc<dyn ChatModel>,
    retry: RetryPolicy,
}

impl RoleCore {
    /// Create a new role core.
    pub fn new(model: Arc<dyn ChatModel>, retry: RetryPolicy) -> Self {
        Self { model, retry }
    }

    /// The model every role talks to.
    #[inline]
    pub fn model(&self) -> &dyn ChatModel {
        self.model.as_ref()
    }

    /// The retry policy applied to every call.
    #[inline]
    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// One guarded provider call, without retries.
    pub async fn complete_once(
        &self,
        operation: &str,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> AppResult<Completion> {
        let start = Instant::now();
        let completion = self
            .retry
            .guard(operation, cancel, async {
                self.model.complete(request).await.map_err(AppError::from)
            })
            .await?;

        debug!(
            operation = %operation,
            latency_ms = start.elapsed().as_millis(),
            content_chars = completion.content.len(),
            tool_calls = completion.tool_calls.len(),
            "Model responded"
        );
        Ok(completion)
    }

    /// Ask for a record of type `T`, re-sampling until a valid one is
    /// extracted or retries run out.
    pub async fn request_record<T: StructuredOutput>(
        &self,
        operation: &str,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> AppResult<T> {
        self.retry
            .run(operation, cancel, move || async move {
                let completion = self.model.complete(request).await?;
                debug!(operation = %operation, response = %completion.content, "Structured response");
                Ok::<T, AppError>(extract::<T>(&completion.content)?)
            })
            .await
    }

    /// Ask for free text.
    pub async fn request_text(
        &self,
        operation: &str,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> AppResult<String> {
        self.retry
            .run(operation, cancel, move || async move {
                let completion = self.model.complete(request).await?;
                Ok::<String, AppError>(completion.content)
            })
            .await
    }
}
