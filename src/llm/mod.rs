//! Model-invocation interface.
//!
//! [`ChatModel`] is the seam every role talks to; [`OpenAiClient`] implements
//! it against any OpenAI-compatible chat completions endpoint.

mod client;
mod types;

pub use client::OpenAiClient;
pub use types::*;

use async_trait::async_trait;

use crate::error::LlmResult;

/// A language model that answers a conversation, optionally requesting
/// capability calls.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Issue one provider call. Implementations do not retry.
    async fn complete(&self, request: &CompletionRequest) -> LlmResult<Completion>;
}
