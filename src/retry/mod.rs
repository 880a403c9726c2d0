//! Failure classification and bounded retry for provider calls.
//!
//! Every provider call goes through a [`RetryPolicy`]. Failures are sorted
//! into a [`FailureClass`]; the policy then decides whether to roll the
//! transcript back, back off, re-sample, or give up. Attempts are bounded,
//! each call runs under a timeout, and a [`CancellationToken`] aborts any
//! wait or in-flight call.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::config::RequestConfig;
use crate::error::{AppError, AppResult, LlmError};

/// How a failed provider call should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The conversation no longer fits the provider's context window.
    ContextOverflow,
    /// Rate limiting, quota, resource exhaustion, timeouts, 5xx, network.
    Transient,
    /// The model answered, but no valid structured record could be extracted.
    MalformedOutput,
    /// Anything else; propagated immediately.
    Fatal,
}

impl FailureClass {
    /// Classify an error raised while producing a model response.
    pub fn classify(err: &AppError) -> Self {
        match err {
            AppError::Llm(llm) => match llm {
                LlmError::ContextOverflow { .. } => FailureClass::ContextOverflow,
                LlmError::RateLimited { .. }
                | LlmError::Timeout { .. }
                | LlmError::Http(_)
                | LlmError::InvalidResponse { .. } => FailureClass::Transient,
                LlmError::Api { status, message } => {
                    if *status >= 500
                        || *status == 408
                        || (LlmError::is_throttling_status(*status)
                            && LlmError::mentions_rate_limit(message))
                    {
                        FailureClass::Transient
                    } else {
                        FailureClass::Fatal
                    }
                }
            },
            AppError::Extraction(_) => FailureClass::MalformedOutput,
            _ => FailureClass::Fatal,
        }
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryDecision {
    /// Roll the transcript back, then retry immediately.
    Rollback,
    /// Wait, then retry.
    Backoff(Duration),
    /// Retry immediately to get a fresh sample.
    Resample,
    /// Propagate the error.
    GiveUp,
}

/// Bounded retry with exponential backoff and jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: f64,
    call_timeout: Duration,
}

impl RetryPolicy {
    /// Create a policy allowing `max_attempts` calls in total.
    pub fn new(max_attempts: u32, base_delay: Duration, call_timeout: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: base_delay.saturating_mul(64),
            jitter: 0.0,
            call_timeout,
        }
    }

    /// Build a policy from request configuration.
    pub fn from_config(config: &RequestConfig) -> Self {
        Self {
            max_attempts: config.max_retries.saturating_add(1),
            base_delay: Duration::from_millis(config.retry_delay_ms),
            max_delay: Duration::from_millis(config.max_retry_delay_ms.max(config.retry_delay_ms)),
            jitter: config.jitter.clamp(0.0, 1.0),
            call_timeout: Duration::from_millis(config.timeout_ms),
        }
    }

    /// Cap on backoff delays.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Randomize delays by up to `jitter` (a fraction) in either direction.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Total attempts allowed, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decide what to do after `attempt` (1-based) failed with `err`.
    pub fn decide(&self, attempt: u32, err: &AppError) -> RetryDecision {
        let class = FailureClass::classify(err);
        if class == FailureClass::Fatal || attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        match class {
            FailureClass::ContextOverflow => RetryDecision::Rollback,
            FailureClass::Transient => RetryDecision::Backoff(self.backoff_delay(attempt)),
            FailureClass::MalformedOutput => RetryDecision::Resample,
            FailureClass::Fatal => RetryDecision::GiveUp,
        }
    }

    /// Delay before the retry that follows failed attempt `attempt`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self
            .base_delay
            .saturating_mul(2_u32.pow(exponent))
            .min(self.max_delay);

        if self.jitter > 0.0 {
            let factor = 1.0 + rand::thread_rng().gen_range(-self.jitter..=self.jitter);
            delay.mul_f64(factor.max(0.0))
        } else {
            delay
        }
    }

    /// Run one attempt under the per-call timeout, aborting on cancellation.
    pub async fn guard<T, Fut>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        fut: Fut,
    ) -> AppResult<T>
    where
        Fut: Future<Output = AppResult<T>>,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AppError::Cancelled {
                operation: operation.to_string(),
            }),
            result = tokio::time::timeout(self.call_timeout, fut) => match result {
                Ok(inner) => inner,
                Err(_) => Err(LlmError::Timeout {
                    timeout_ms: self.call_timeout.as_millis() as u64,
                }
                .into()),
            },
        }
    }

    /// Sleep for `delay` unless cancelled first.
    pub async fn pause(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        delay: Duration,
    ) -> AppResult<()> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AppError::Cancelled {
                operation: operation.to_string(),
            }),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    /// Turn the final failure into the error surfaced to the caller.
    pub fn exhausted(&self, operation: &str, attempt: u32, err: AppError) -> AppError {
        if FailureClass::classify(&err) == FailureClass::Fatal {
            return err;
        }
        error!(
            operation = %operation,
            attempts = attempt,
            error = %err,
            "Retries exhausted"
        );
        AppError::RetryExhausted {
            operation: operation.to_string(),
            attempts: attempt,
            last_error: err.to_string(),
        }
    }

    /// Run a stateless operation until it succeeds, a fatal error occurs, or
    /// attempts run out.
    ///
    /// Context overflows are retried after a backoff here since a stateless
    /// call has no transcript to roll back; stateful callers use
    /// [`RetryPolicy::decide`] directly.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match self.guard(operation, cancel, op()).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let delay = match self.decide(attempt, &err) {
                RetryDecision::GiveUp => return Err(self.exhausted(operation, attempt, err)),
                RetryDecision::Resample => None,
                RetryDecision::Backoff(delay) => Some(delay),
                RetryDecision::Rollback => Some(self.backoff_delay(attempt)),
            };

            warn!(
                operation = %operation,
                attempt,
                max_attempts = self.max_attempts,
                delay_ms = delay.map(|d| d.as_millis()).unwrap_or(0),
                error = %err,
                "Retrying model call"
            );

            if let Some(delay) = delay {
                self.pause(operation, cancel, delay).await?;
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RequestConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExtractionError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1), Duration::from_secs(5))
    }

    fn rate_limited() -> AppError {
        LlmError::RateLimited {
            message: "slow down".to_string(),
        }
        .into()
    }

    fn malformed() -> AppError {
        ExtractionError {
            type_name: "AnalysisPlan",
            preview: "prose".to_string(),
        }
        .into()
    }

    #[test]
    fn test_classification() {
        assert_eq!(FailureClass::classify(&rate_limited()), FailureClass::Transient);
        assert_eq!(FailureClass::classify(&malformed()), FailureClass::MalformedOutput);
        assert_eq!(
            FailureClass::classify(
                &LlmError::ContextOverflow {
                    message: "too long".to_string()
                }
                .into()
            ),
            FailureClass::ContextOverflow
        );
        assert_eq!(
            FailureClass::classify(
                &LlmError::Api {
                    status: 503,
                    message: "unavailable".to_string()
                }
                .into()
            ),
            FailureClass::Transient
        );
        assert_eq!(
            FailureClass::classify(
                &LlmError::Api {
                    status: 401,
                    message: "bad key".to_string()
                }
                .into()
            ),
            FailureClass::Fatal
        );
        assert_eq!(
            FailureClass::classify(&AppError::UnknownCapability {
                name: "x".to_string()
            }),
            FailureClass::Fatal
        );
    }

    #[test]
    fn test_request_errors_mentioning_similar_words_are_fatal() {
        for (status, message) in [
            (404, "The requested resource was not found"),
            (400, "Invalid parameter: cannot generate with temperature 3"),
            (400, "Provide an accurate separate value"),
        ] {
            let err: AppError = LlmError::Api {
                status,
                message: message.to_string(),
            }
            .into();
            assert_eq!(FailureClass::classify(&err), FailureClass::Fatal, "{message}");
        }

        let err: AppError = LlmError::Api {
            status: 403,
            message: "Resource exhausted: quota exceeded".to_string(),
        }
        .into();
        assert_eq!(FailureClass::classify(&err), FailureClass::Transient);
    }

    #[test]
    fn test_decide() {
        let policy = fast_policy(3);
        assert_eq!(policy.decide(1, &malformed()), RetryDecision::Resample);
        assert!(matches!(policy.decide(1, &rate_limited()), RetryDecision::Backoff(_)));
        assert_eq!(
            policy.decide(
                1,
                &LlmError::ContextOverflow {
                    message: "x".to_string()
                }
                .into()
            ),
            RetryDecision::Rollback
        );
        assert_eq!(policy.decide(3, &rate_limited()), RetryDecision::GiveUp);
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let policy = RetryPolicy::new(10, Duration::from_millis(100), Duration::from_secs(1))
            .with_max_delay(Duration::from_millis(350));
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(350));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let policy = RetryPolicy::new(10, Duration::from_millis(100), Duration::from_secs(1))
            .with_jitter(0.5);
        for _ in 0..50 {
            let delay = policy.backoff_delay(1);
            assert!(delay >= Duration::from_millis(50) && delay <= Duration::from_millis(150));
        }
    }

    #[tokio::test]
    async fn test_run_recovers_from_transient_errors() {
        let calls = AtomicU32::new(0);
        let result = fast_policy(5)
            .run("test", &CancellationToken::new(), || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(rate_limited())
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_is_bounded() {
        let calls = AtomicU32::new(0);
        let result: AppResult<()> = fast_policy(3)
            .run("planning", &CancellationToken::new(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(malformed())
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result.unwrap_err() {
            AppError::RetryExhausted {
                operation, attempts, ..
            } => {
                assert_eq!(operation, "planning");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_run_propagates_fatal_immediately() {
        let calls = AtomicU32::new(0);
        let result: AppResult<()> = fast_policy(5)
            .run("test", &CancellationToken::new(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AppError::Config {
                    message: "broken".to_string(),
                })
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(AppError::Config { .. })));
    }

    #[tokio::test]
    async fn test_call_timeout_is_transient() {
        let policy = RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(10));
        let result: AppResult<()> = policy
            .run("slow", &CancellationToken::new(), || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(AppError::RetryExhausted { attempts: 2, .. })));
    }

    #[tokio::test]
    async fn test_cancellation_aborts() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: AppResult<()> = fast_policy(5)
            .run("cancelled", &cancel, || async { Ok(()) })
            .await;

        assert!(matches!(result, Err(AppError::Cancelled { .. })));
    }
}
