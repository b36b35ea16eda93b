//! Retry with exponential backoff and jitter, guarded by the circuit breaker.
//!
//! Backoff doubles per attempt: base → 2×base → 4×base … capped at
//! `max_delay`. Jitter comes from the `backoff` crate's randomization
//! factor and the capped value is never exceeded.
//!
//! # Retry Decision
//! - Retry on: errors classified retryable (timeouts, rate limits, 5xx, network)
//! - Do NOT retry: fatal errors (invalid request, authentication)
//! - Never call while the circuit is open

use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::circuit_breaker::{CircuitBreaker, CircuitCheckResult};
use super::error_classifier::{classify_llm_error, AnalysisError, ClassifiedError};
use crate::domain::errors::LlmError;
use crate::domain::models::TierPolicy;

/// Default randomization applied to in-run retry delays.
pub const DEFAULT_JITTER: f64 = 0.3;

/// Delay before retry number `attempt` (0-indexed).
///
/// With `jitter == 0.0` the result is exactly `min(base * 2^attempt, max)`.
pub fn backoff_delay(base: Duration, max: Duration, jitter: f64, attempt: u32) -> Duration {
    let mut schedule = ExponentialBackoffBuilder::new()
        .with_initial_interval(base)
        .with_multiplier(2.0)
        .with_randomization_factor(jitter.clamp(0.0, 1.0))
        .with_max_interval(max)
        .with_max_elapsed_time(None)
        .build();

    let mut delay = base;
    for _ in 0..=attempt {
        delay = schedule.next_backoff().unwrap_or(max);
    }
    delay.min(max)
}

/// Retry policy for one LLM call
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            jitter: DEFAULT_JITTER,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: max_delay.max(base_delay),
            jitter: DEFAULT_JITTER,
        }
    }

    pub fn from_tier(policy: &TierPolicy) -> Self {
        Self::new(
            policy.max_retries,
            Duration::from_millis(policy.base_delay_ms),
            Duration::from_millis(policy.max_delay_ms),
        )
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        backoff_delay(self.base_delay, self.max_delay, self.jitter, attempt)
    }

    /// Run `operation` until it succeeds, fails fatally, the circuit opens
    /// or retries are exhausted.
    ///
    /// `on_retry(attempt, error)` is called before each retry sleep with
    /// the 1-based retry number.
    pub async fn execute<F, Fut, T, R>(
        &self,
        breaker: &CircuitBreaker,
        mut operation: F,
        mut on_retry: R,
    ) -> Result<T, AnalysisError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
        R: FnMut(u32, &ClassifiedError),
    {
        let mut attempt = 0;

        loop {
            if let CircuitCheckResult::Blocked { retry_after } = breaker.check().await {
                debug!(%retry_after, "circuit open, not calling LLM");
                return Err(AnalysisError::CircuitOpen { retry_after });
            }

            match operation().await {
                Ok(result) => {
                    breaker.record_success().await;
                    if attempt > 0 {
                        debug!("LLM call succeeded after {} retries", attempt);
                    }
                    return Ok(result);
                }
                Err(err) => {
                    let classified = classify_llm_error(&err);
                    if !classified.counts_toward_circuit() {
                        breaker.release_trial().await;
                        debug!(code = %classified.code, "fatal LLM error, not retrying");
                        return Err(err.into());
                    }

                    breaker.record_failure(&classified.message).await;

                    if attempt >= self.max_retries {
                        warn!(
                            attempts = attempt + 1,
                            code = %classified.code,
                            "LLM call failed after all retries"
                        );
                        return Err(err.into());
                    }

                    let delay = self.delay_for_attempt(attempt);
                    attempt += 1;
                    on_retry(attempt, &classified);
                    warn!(
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        code = %classified.code,
                        "transient LLM error, retrying"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::circuit_breaker::{CircuitBreakerConfig, CircuitState};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::from_millis(1), Duration::from_millis(4))
            .with_jitter(0.0)
    }

    #[test]
    fn test_backoff_without_jitter_doubles_and_caps() {
        let base = Duration::from_millis(1000);
        let max = Duration::from_millis(30_000);
        assert_eq!(backoff_delay(base, max, 0.0, 0), Duration::from_millis(1000));
        assert_eq!(backoff_delay(base, max, 0.0, 1), Duration::from_millis(2000));
        assert_eq!(backoff_delay(base, max, 0.0, 3), Duration::from_millis(8000));
        assert_eq!(backoff_delay(base, max, 0.0, 10), max);
    }

    #[test]
    fn test_jittered_backoff_never_exceeds_cap() {
        let base = Duration::from_secs(2);
        let max = Duration::from_secs(30);
        for attempt in 0..12 {
            let delay = backoff_delay(base, max, 0.5, attempt);
            assert!(delay <= max, "attempt {attempt} gave {delay:?}");
            assert!(delay >= base / 2);
        }
    }

    #[test]
    fn test_standard_tier_policy_capped_at_thirty_seconds() {
        let policy = RetryPolicy::from_tier(&TierPolicy::default_for(
            crate::domain::models::Tier::Standard,
        ));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
        assert!(policy.delay_for_attempt(20) <= Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let breaker = CircuitBreaker::with_defaults();
        let calls = Arc::new(AtomicU32::new(0));
        let mut retries = Vec::new();

        let result = fast_policy(3)
            .execute(
                &breaker,
                || {
                    let calls = Arc::clone(&calls);
                    async move {
                        if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                            Err(LlmError::Timeout)
                        } else {
                            Ok(42)
                        }
                    }
                },
                |attempt, err| retries.push((attempt, err.code.clone())),
            )
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(retries.len(), 2);
        assert_eq!(retries[0].0, 1);
        assert_eq!(retries[1].1, "LLM_TIMEOUT");
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried_or_counted() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        });
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<(), _> = fast_policy(3)
            .execute(
                &breaker,
                || {
                    let calls = Arc::clone(&calls);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err(LlmError::AuthenticationFailed("bad key".into()))
                    }
                },
                |_, _| {},
            )
            .await;

        assert!(matches!(result, Err(AnalysisError::Llm(LlmError::AuthenticationFailed(_)))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(breaker.get_state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_exhausted_retries_return_last_error() {
        let breaker = CircuitBreaker::with_defaults();
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<(), _> = fast_policy(2)
            .execute(
                &breaker,
                || {
                    let calls = Arc::clone(&calls);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err(LlmError::RateLimitExceeded)
                    }
                },
                |_, _| {},
            )
            .await;

        assert!(matches!(result, Err(AnalysisError::Llm(LlmError::RateLimitExceeded))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_stops_when_circuit_opens_mid_retry() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 2,
            ..Default::default()
        });
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<(), _> = fast_policy(5)
            .execute(
                &breaker,
                || {
                    let calls = Arc::clone(&calls);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err(LlmError::ServerError("503".into()))
                    }
                },
                |_, _| {},
            )
            .await;

        assert!(matches!(result, Err(AnalysisError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(breaker.get_state().await, CircuitState::Open);
    }
}
