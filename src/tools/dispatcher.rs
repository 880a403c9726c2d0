use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::{CapabilityDescriptor, CapabilityRegistry};
use crate::config::PipelineConfig;
use crate::dataset::DatasetContext;
use crate::error::{AppError, AppResult};
use crate::llm::{ChatMessage, ToolCall};

/// Appended to every shortened capability result.
pub const TRUNCATION_MARKER: &str = "... (truncated)";

const PREVIEW_ITEMS: usize = 3;
const MAX_MAP_ENTRIES: usize = 5;

/// Shrinks capability results before they are embedded in the transcript.
#[derive(Debug, Clone, Copy)]
pub struct ResultSummarizer {
    max_chars: usize,
    max_list_items: usize,
}

impl ResultSummarizer {
    /// Create a summarizer with a character budget and list-length threshold.
    pub fn new(max_chars: usize, max_list_items: usize) -> Self {
        Self {
            max_chars,
            max_list_items,
        }
    }

    /// Render `value` as JSON text, shortened when it is too large.
    ///
    /// - lists over the threshold (or over the character budget) keep their
    ///   first 3 elements
    /// - mappings with more than 5 entries (or over the budget) keep their
    ///   first 5 entries, with nested lists and mappings replaced by a
    ///   placeholder
    /// - anything else over the budget is cut at the budget
    pub fn summarize(&self, value: &Value) -> String {
        let rendered = value.to_string();
        let oversized = rendered.chars().count() > self.max_chars;

        let summary = match value {
            Value::Array(items) if oversized || items.len() > self.max_list_items => {
                let head: Vec<Value> = items.iter().take(PREVIEW_ITEMS).cloned().collect();
                format!("{}{}", Value::Array(head), TRUNCATION_MARKER)
            }
            Value::Object(map) if oversized || map.len() > MAX_MAP_ENTRIES => {
                let head: Map<String, Value> = map
                    .iter()
                    .take(MAX_MAP_ENTRIES)
                    .map(|(k, v)| (k.clone(), placeholder(v)))
                    .collect();
                format!("{}{}", Value::Object(head), TRUNCATION_MARKER)
            }
            _ if oversized => return self.hard_truncate(&rendered),
            _ => return rendered,
        };

        debug!(
            original_chars = rendered.len(),
            summary_chars = summary.len(),
            "Summarized capability result"
        );

        if summary.chars().count() > self.max_chars + TRUNCATION_MARKER.len() {
            self.hard_truncate(&summary)
        } else {
            summary
        }
    }

    fn hard_truncate(&self, text: &str) -> String {
        let mut cut: String = text.chars().take(self.max_chars).collect();
        cut.push_str(TRUNCATION_MARKER);
        cut
    }
}

impl Default for ResultSummarizer {
    fn default() -> Self {
        let defaults = PipelineConfig::default();
        Self::new(
            defaults.tool_result_max_chars,
            defaults.tool_result_max_list_items,
        )
    }
}

fn placeholder(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::String(format!("<list with {} items>", items.len())),
        Value::Object(map) => Value::String(format!("<object with {} keys>", map.len())),
        other => other.clone(),
    }
}

/// Resolves model-requested capability calls against a registry and turns
/// their results into tool messages.
#[derive(Clone)]
pub struct ToolDispatcher {
    registry: Arc<CapabilityRegistry>,
    context: DatasetContext,
    summarizer: ResultSummarizer,
}

impl ToolDispatcher {
    /// Create a dispatcher over `registry` and the shared datasets.
    pub fn new(registry: Arc<CapabilityRegistry>, context: DatasetContext) -> Self {
        Self {
            registry,
            context,
            summarizer: ResultSummarizer::default(),
        }
    }

    /// Use a specific result summarizer.
    pub fn with_summarizer(mut self, summarizer: ResultSummarizer) -> Self {
        self.summarizer = summarizer;
        self
    }

    /// The registry calls are resolved against.
    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// Execute one model turn's capability calls.
    ///
    /// Calls run concurrently; the returned messages are in request order,
    /// each tagged with its originating call id. Malformed arguments and
    /// capability failures become error-content tool messages.
    ///
    /// # Errors
    /// Returns [`AppError::UnknownCapability`] before running anything if a
    /// call names a capability that is not registered.
    pub async fn dispatch(&self, calls: &[ToolCall]) -> AppResult<Vec<ChatMessage>> {
        let resolved = calls
            .iter()
            .map(|call| {
                self.registry
                    .get(&call.function.name)
                    .cloned()
                    .map(|capability| (call.clone(), capability))
                    .ok_or_else(|| AppError::UnknownCapability {
                        name: call.function.name.clone(),
                    })
            })
            .collect::<AppResult<Vec<_>>>()?;

        let jobs = resolved
            .into_iter()
            .map(|(call, capability)| self.run_call(call, capability));

        Ok(join_all(jobs).await)
    }

    async fn run_call(&self, call: ToolCall, capability: CapabilityDescriptor) -> ChatMessage {
        let name = call.function.name.clone();

        let args = match parse_arguments(&call.function.arguments) {
            Ok(args) => args,
            Err(e) => {
                warn!(
                    capability = %name,
                    raw_arguments = %call.function.arguments,
                    error = %e,
                    "Failed to parse capability arguments"
                );
                return ChatMessage::tool(
                    call.id,
                    format!(
                        "Error in tool {}: arguments are not valid JSON ({}): {}",
                        name, e, call.function.arguments
                    ),
                );
            }
        };

        info!(capability = %name, args = %args, "Calling capability");

        let start = Instant::now();
        let context = self.context.clone();
        let args_text = args.to_string();
        let outcome =
            tokio::task::spawn_blocking(move || capability.invoke(&context, args)).await;

        let content = match outcome {
            Ok(Ok(value)) => {
                debug!(
                    capability = %name,
                    latency_ms = start.elapsed().as_millis(),
                    "Capability succeeded"
                );
                self.summarizer.summarize(&value)
            }
            Ok(Err(e)) => {
                let message = format!("Error in tool {} with args {}: {}", name, args_text, e);
                warn!(capability = %name, error = %e, "Capability failed");
                message
            }
            Err(e) => {
                warn!(capability = %name, error = %e, "Capability panicked");
                format!("Error in tool {} with args {}: {}", name, args_text, e)
            }
        };

        ChatMessage::tool(call.id, content)
    }
}

/// Empty or `null` payloads mean "no arguments".
fn parse_arguments(raw: &str) -> Result<Value, serde_json::Error> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    match serde_json::from_str(raw)? {
        Value::Null => Ok(Value::Object(Map::new())),
        value => Ok(value),
    }
}
