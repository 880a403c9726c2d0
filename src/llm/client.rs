use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::types::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, Completion, CompletionRequest,
};
use super::ChatModel;
use crate::config::{LlmConfig, RequestConfig};
use crate::error::{LlmError, LlmResult};

/// Client for OpenAI-compatible chat completion endpoints
#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout_ms: u64,
}

impl OpenAiClient {
    /// Create a new client
    pub fn new(config: &LlmConfig, request_config: &RequestConfig) -> LlmResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(LlmError::Http)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            timeout_ms: request_config.timeout_ms,
        })
    }

    /// Get the base URL (for testing)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Model identifier sent with every request
    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_body(&self, request: &CompletionRequest) -> ChatCompletionRequest {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        messages.push(ChatMessage::system(request.system.clone()));
        messages.extend(request.messages.iter().cloned());

        let tool_choice = (!request.tools.is_empty()).then(|| "auto".to_string());

        ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            tools: request.tools.clone(),
            tool_choice,
            temperature: request.temperature,
        }
    }

    /// Map a non-success status and body to a typed provider error
    fn classify_status(status: StatusCode, body: String) -> LlmError {
        if status == StatusCode::TOO_MANY_REQUESTS {
            return LlmError::RateLimited { message: body };
        }
        if status == StatusCode::PAYLOAD_TOO_LARGE
            || (status == StatusCode::BAD_REQUEST && LlmError::mentions_context_overflow(&body))
        {
            return LlmError::ContextOverflow { message: body };
        }
        if LlmError::is_throttling_status(status.as_u16()) && LlmError::mentions_rate_limit(&body) {
            return LlmError::RateLimited { message: body };
        }
        LlmError::Api {
            status: status.as_u16(),
            message: body,
        }
    }
}

#[async_trait]
impl ChatModel for OpenAiClient {
    async fn complete(&self, request: &CompletionRequest) -> LlmResult<Completion> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(request);

        debug!(
            model = %self.model,
            messages = body.messages.len(),
            tools = body.tools.len(),
            "Calling chat completions"
        );

        let start = Instant::now();

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout {
                        timeout_ms: self.timeout_ms,
                    }
                } else {
                    LlmError::Http(e)
                }
            })?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, error_body));
        }

        let parsed: ChatCompletionResponse =
            response
                .json()
                .await
                .map_err(|e| LlmError::InvalidResponse {
                    message: format!("Failed to parse response: {}", e),
                })?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse {
                message: "Response contained no choices".to_string(),
            })?;

        info!(
            model = %self.model,
            latency_ms = start.elapsed().as_millis(),
            tool_calls = choice.message.tool_calls.len(),
            total_tokens = parsed.usage.as_ref().and_then(|u| u.total_tokens),
            "Chat completion succeeded"
        );

        Ok(Completion {
            content: choice.message.content,
            tool_calls: choice.message.tool_calls,
            finish_reason: choice.finish_reason,
        })
    }
}
