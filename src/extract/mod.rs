//! Structured record extraction from free-form model output.
//!
//! Models wrap JSON in code fences, echo the schema they were shown, or
//! answer with an array instead of an object. [`extract`] tries a fixed
//! sequence of strategies and returns the first record that deserializes
//! *and* passes [`StructuredOutput::validate`]:
//!
//! 1. the whole response with surrounding fences stripped
//! 2. each fenced segment that is not a schema echo
//! 3. the first element of a top-level JSON array
//!
//! Objects embedded in unfenced prose are rejected.
//!
//! Failure is a value ([`ExtractionError`]); the caller decides whether to
//! re-issue the model call.

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::ExtractionError;

/// Opening and closing code fence.
pub const FENCE: &str = "```";

/// Markers that only appear when a model echoes a JSON schema back instead
/// of producing an instance of it.
pub const SCHEMA_MARKERS: [&str; 3] = ["\"$defs\"", "\"$schema\"", "\"definitions\""];

const PREVIEW_CHARS: usize = 100;

/// A record type that can be requested from a model as JSON.
pub trait StructuredOutput: DeserializeOwned + JsonSchema {
    /// Human-readable record name used in errors and logs.
    const NAME: &'static str;

    /// Semantic checks serde cannot express, such as score ranges.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }

    /// JSON schema of the record, pretty-printed for inclusion in prompts.
    fn schema_json() -> String {
        let schema = schemars::schema_for!(Self);
        serde_json::to_string_pretty(&schema).unwrap_or_default()
    }
}

/// Check that a score lies in `[0, 1]`.
pub fn check_unit_interval(field: &str, value: f64) -> Result<(), String> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(format!("{} must be between 0.0 and 1.0, got {}", field, value))
    }
}

/// Extract a validated record of type `T` from a raw model response.
pub fn extract<T: StructuredOutput>(raw: &str) -> Result<T, ExtractionError> {
    let cleaned = strip_fences(raw);

    if let Some(record) = try_validate::<T>(cleaned) {
        return Ok(record);
    }

    if let Some(record) = raw
        .split(FENCE)
        .filter(|segment| !is_schema_echo(segment))
        .map(clean_segment)
        .filter(|segment| !segment.is_empty())
        .find_map(try_validate::<T>)
    {
        return Ok(record);
    }

    if let Some(record) = first_array_element::<T>(cleaned) {
        return Ok(record);
    }

    debug!(record = T::NAME, "No strategy produced a valid record");

    Err(ExtractionError {
        type_name: T::NAME,
        preview: raw.trim().chars().take(PREVIEW_CHARS).collect(),
    })
}

/// Strip a leading ```` ```json ```` / ```` ``` ```` and a trailing ```` ``` ````.
pub fn strip_fences(raw: &str) -> &str {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```json") {
        text = rest;
    } else if let Some(rest) = text.strip_prefix(FENCE) {
        text = rest;
    }
    if let Some(rest) = text.strip_suffix(FENCE) {
        text = rest;
    }
    text.trim()
}

fn is_schema_echo(segment: &str) -> bool {
    SCHEMA_MARKERS.iter().any(|marker| segment.contains(marker))
}

/// Drop the fence language tag and surrounding whitespace of a split segment.
fn clean_segment(segment: &str) -> &str {
    let trimmed = segment.trim_start();
    let without_tag = trimmed
        .strip_prefix("json")
        .or_else(|| trimmed.strip_prefix("JSON"))
        .unwrap_or(trimmed);
    without_tag.trim_matches(|c: char| c.is_whitespace() || c == '`')
}

fn try_validate<T: StructuredOutput>(candidate: &str) -> Option<T> {
    let record: T = serde_json::from_str(candidate).ok()?;
    match record.validate() {
        Ok(()) => Some(record),
        Err(reason) => {
            debug!(record = T::NAME, reason = %reason, "Candidate failed validation");
            None
        }
    }
}

fn first_array_element<T: StructuredOutput>(candidate: &str) -> Option<T> {
    let values: Vec<serde_json::Value> = serde_json::from_str(candidate).ok()?;
    let first = values.into_iter().next()?;
    let record: T = serde_json::from_value(first).ok()?;
    record.validate().ok().map(|()| record)
}
