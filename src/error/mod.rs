use std::path::PathBuf;

use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),

    #[error("Capability error: {0}")]
    Capability(#[from] CapabilityError),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Unknown capability requested: {name}")]
    UnknownCapability { name: String },

    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    RetryExhausted {
        operation: String,
        attempts: u32,
        last_error: String,
    },

    #[error("{operation} was cancelled")]
    Cancelled { operation: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Model provider errors
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Context length exceeded: {message}")]
    ContextOverflow { message: String },

    #[error("Rate limited: {message}")]
    RateLimited { message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Activity dataset errors
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Dataset not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Capability registration and execution errors
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("Invalid arguments for {name}: {message}")]
    InvalidArguments { name: String, message: String },

    #[error("Capability {name} failed: {message}")]
    Execution { name: String, message: String },

    #[error("Invalid capability registration: {message}")]
    Registration { message: String },
}

/// No fallback strategy produced a valid record
#[derive(Debug, Error)]
#[error("No valid {type_name} found in response: {preview}")]
pub struct ExtractionError {
    /// Name of the record type that was expected.
    pub type_name: &'static str,
    /// Leading part of the rejected response.
    pub preview: String,
}

impl LlmError {
    /// Whether a provider message describes an exhausted context window.
    pub fn mentions_context_overflow(message: &str) -> bool {
        let lower = message.to_lowercase();
        lower.contains("maximum context")
            || lower.contains("context_length")
            || lower.contains("context length")
            || lower.contains("context window")
    }

    /// Whether a provider message describes throttling or quota exhaustion.
    pub fn mentions_rate_limit(message: &str) -> bool {
        let lower = message.to_lowercase();
        ["rate limit", "rate_limit", "ratelimit", "quota", "resource exhausted", "resource_exhausted"]
            .iter()
            .any(|phrase| lower.contains(phrase))
    }

    /// Statuses whose body may describe throttling rather than a request error.
    pub fn is_throttling_status(status: u16) -> bool {
        matches!(status, 403 | 429 | 503)
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for model provider operations
pub type LlmResult<T> = Result<T, LlmError>;

/// Result type alias for dataset operations
pub type DatasetResult<T> = Result<T, DatasetError>;

/// Result type alias for capability operations
pub type CapabilityResult<T> = Result<T, CapabilityError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_display() {
        let err = AppError::Config {
            message: "missing key".to_string(),
        };
        assert_eq!(err.to_string(), "Configuration error: missing key");

        let err = AppError::UnknownCapability {
            name: "get_weather".to_string(),
        };
        assert_eq!(err.to_string(), "Unknown capability requested: get_weather");

        let err = AppError::RetryExhausted {
            operation: "planning".to_string(),
            attempts: 3,
            last_error: "Rate limited: slow down".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "planning failed after 3 attempts: Rate limited: slow down"
        );
    }

    #[test]
    fn test_llm_error_display() {
        let err = LlmError::Api {
            status: 401,
            message: "unauthorized".to_string(),
        };
        assert_eq!(err.to_string(), "API error: 401 - unauthorized");

        let err = LlmError::Timeout { timeout_ms: 5000 };
        assert_eq!(err.to_string(), "Request timeout after 5000ms");

        let err = LlmError::ContextOverflow {
            message: "too many tokens".to_string(),
        };
        assert_eq!(err.to_string(), "Context length exceeded: too many tokens");
    }

    #[test]
    fn test_dataset_error_display() {
        let err = DatasetError::NotFound {
            path: PathBuf::from("posts.jsonl"),
        };
        assert_eq!(err.to_string(), "Dataset not found: posts.jsonl");
    }

    #[test]
    fn test_extraction_error_display() {
        let err = ExtractionError {
            type_name: "AnalysisPlan",
            preview: "I cannot help".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "No valid AnalysisPlan found in response: I cannot help"
        );
    }

    #[test]
    fn test_provider_message_heuristics() {
        assert!(LlmError::mentions_context_overflow(
            "This model's maximum context length is 128000 tokens"
        ));
        assert!(LlmError::mentions_rate_limit("Rate limit reached for requests"));
        assert!(LlmError::mentions_rate_limit("You exceeded your current quota"));
        assert!(LlmError::mentions_rate_limit("RESOURCE_EXHAUSTED"));
        assert!(!LlmError::mentions_rate_limit("invalid api key"));
        assert!(!LlmError::mentions_rate_limit("The requested resource was not found"));
        assert!(!LlmError::mentions_rate_limit("cannot generate an accurate separate value"));
        assert!(!LlmError::mentions_context_overflow("temperature exceeds the maximum of 2"));
    }

    #[test]
    fn test_error_conversions() {
        let app_err: AppError = LlmError::Timeout { timeout_ms: 1000 }.into();
        assert!(matches!(app_err, AppError::Llm(_)));

        let app_err: AppError = CapabilityError::Registration {
            message: "duplicate".to_string(),
        }
        .into();
        assert!(matches!(app_err, AppError::Capability(_)));

        let app_err: AppError = StorageError::Query {
            message: "syntax".to_string(),
        }
        .into();
        assert!(matches!(app_err, AppError::Storage(_)));
    }
}
