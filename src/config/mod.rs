use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub llm: LlmConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub request: RequestConfig,
    pub pipeline: PipelineConfig,
    pub data: DataConfig,
}

/// Model provider configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Provider call and retry configuration
#[derive(Debug, Clone)]
pub struct RequestConfig {
    /// Timeout applied to every single provider call.
    pub timeout_ms: u64,
    /// Retries after the first attempt before giving up.
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    /// Fraction of the backoff delay randomized in either direction.
    pub jitter: f64,
}

/// Orchestration limits
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Estimated-token budget for an investigation transcript.
    pub token_limit: usize,
    /// Model turns allowed per TODO item before giving up on the sentinel.
    pub max_iterations: usize,
    pub tool_result_max_chars: usize,
    pub tool_result_max_list_items: usize,
    /// Perspectives investigated at the same time within one run.
    pub perspective_parallelism: usize,
    /// Target entities analyzed at the same time by `start`.
    pub run_parallelism: usize,
    pub completion_sentinel: String,
}

/// Dataset and output locations
#[derive(Debug, Clone)]
pub struct DataConfig {
    pub posts_path: PathBuf,
    pub comments_path: PathBuf,
    pub categories_path: PathBuf,
    pub output_dir: PathBuf,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let api_key = env::var("LLM_API_KEY")
            .or_else(|_| env::var("OPENAI_API_KEY"))
            .map_err(|_| AppError::Config {
                message: "LLM_API_KEY (or OPENAI_API_KEY) is required".to_string(),
            })?;

        let llm = LlmConfig {
            api_key,
            base_url: env::var("LLM_BASE_URL")
                .or_else(|_| env::var("OPENAI_API_BASE"))
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            model: env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
        };

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/reports.db".to_string()),
            ),
            max_connections: env_or("DATABASE_MAX_CONNECTIONS", 5),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let defaults = RequestConfig::default();
        let request = RequestConfig {
            timeout_ms: env_or("REQUEST_TIMEOUT_MS", defaults.timeout_ms),
            max_retries: env_or("MAX_RETRIES", defaults.max_retries),
            retry_delay_ms: env_or("RETRY_DELAY_MS", defaults.retry_delay_ms),
            max_retry_delay_ms: env_or("RETRY_MAX_DELAY_MS", defaults.max_retry_delay_ms),
            jitter: env_or("RETRY_JITTER", defaults.jitter).clamp(0.0, 1.0),
        };

        let defaults = PipelineConfig::default();
        let pipeline = PipelineConfig {
            token_limit: env_or("TOKEN_LIMIT", defaults.token_limit),
            max_iterations: env_or("MAX_ITERATIONS", defaults.max_iterations).max(1),
            tool_result_max_chars: env_or("TOOL_RESULT_MAX_CHARS", defaults.tool_result_max_chars),
            tool_result_max_list_items: env_or(
                "TOOL_RESULT_MAX_LIST_ITEMS",
                defaults.tool_result_max_list_items,
            ),
            perspective_parallelism: env_or(
                "PERSPECTIVE_PARALLELISM",
                defaults.perspective_parallelism,
            )
            .max(1),
            run_parallelism: env_or("RUN_PARALLELISM", defaults.run_parallelism).max(1),
            completion_sentinel: env::var("COMPLETION_SENTINEL")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.completion_sentinel),
        };

        let defaults = DataConfig::default();
        let data = DataConfig {
            posts_path: env::var("POSTS_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.posts_path),
            comments_path: env::var("COMMENTS_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.comments_path),
            categories_path: env::var("CATEGORIES_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.categories_path),
            output_dir: env::var("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
        };

        Ok(Config {
            llm,
            database,
            logging,
            request,
            pipeline,
            data,
        })
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 120_000,
            max_retries: 5,
            retry_delay_ms: 10_000,
            max_retry_delay_ms: 60_000,
            jitter: 0.2,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            token_limit: 128_000,
            max_iterations: 10,
            tool_result_max_chars: 2000,
            tool_result_max_list_items: 20,
            perspective_parallelism: 1,
            run_parallelism: 1,
            completion_sentinel: "END".to_string(),
        }
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            posts_path: PathBuf::from("r_OpenAI_posts.jsonl"),
            comments_path: PathBuf::from("r_OpenAI_comments.jsonl"),
            categories_path: PathBuf::from("analysis_categories.json"),
            output_dir: PathBuf::from("score_reports"),
        }
    }
}
