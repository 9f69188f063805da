//! Retry policy for engine commands with configurable backoff.
//!
//! Only errors classified as transient are retried. Anything else is returned
//! to the caller on the first occurrence.

use crate::errors::{HarnessError, HarnessResult};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

use super::classify::default_retryable_patterns;

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base
    #[default]
    Constant,
    /// delay = base * (retry + 1)
    Linear,
    /// delay = base * 2^retry
    Exponential,
}

/// Retry policy attached to a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    /// Base delay between attempts in milliseconds.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// Upper bound on any single delay in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// How the delay grows between retries.
    #[serde(default)]
    pub strategy: BackoffStrategy,
    /// Add up to 20% random jitter to each delay.
    #[serde(default)]
    pub jitter: bool,
    /// Regular expressions matched against engine error text to detect transient failures.
    #[serde(default = "default_retryable_patterns")]
    pub retryable_errors: Vec<String>,
}

fn default_max_retries() -> usize {
    3
}

fn default_backoff_ms() -> u64 {
    5_000
}

fn default_max_backoff_ms() -> u64 {
    60_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            strategy: BackoffStrategy::Constant,
            jitter: false,
            retryable_errors: default_retryable_patterns(),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with the default transient-error catalogue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self::default().with_max_retries(0)
    }

    /// Sets the maximum number of retries.
    #[must_use]
    pub fn with_max_retries(mut self, retries: usize) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the base backoff.
    #[must_use]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Enables or disables jitter.
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Adds an extra retryable error pattern on top of the current ones.
    #[must_use]
    pub fn with_retryable_error(mut self, pattern: impl Into<String>) -> Self {
        self.retryable_errors.push(pattern.into());
        self
    }

    /// Returns the base backoff as a duration.
    #[must_use]
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    /// Total attempts allowed, including the first.
    #[must_use]
    pub fn max_attempts(&self) -> usize {
        self.max_retries.saturating_add(1)
    }

    /// Calculates the delay before retry number `retry` (0-indexed).
    #[must_use]
    pub fn delay_for(&self, retry: usize) -> Duration {
        let base = self.backoff_ms;
        let delay = match self.strategy {
            BackoffStrategy::Constant => base,
            BackoffStrategy::Linear => base.saturating_mul(retry as u64 + 1),
            BackoffStrategy::Exponential => {
                let exp = u32::try_from(retry).unwrap_or(u32::MAX);
                base.saturating_mul(2u64.saturating_pow(exp))
            }
        }
        .min(self.max_backoff_ms);

        let jittered = if self.jitter && delay > 0 {
            delay + rand::thread_rng().gen_range(0..=delay / 5)
        } else {
            delay
        };

        Duration::from_millis(jittered)
    }
}

/// Runs `operation` until it succeeds, fails with a non-transient error, or the
/// retry budget is spent.
///
/// `on_retry` is invoked before each backoff sleep with the number of the
/// attempt that just failed (1-indexed), the error and the delay.
///
/// # Errors
///
/// Returns the first non-transient error unchanged, or
/// [`HarnessError::RetriesExhausted`] once the budget is spent.
pub async fn with_retry<T, F, Fut, R>(
    policy: &RetryPolicy,
    module: &str,
    command: &str,
    mut operation: F,
    mut on_retry: R,
) -> HarnessResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = HarnessResult<T>>,
    R: FnMut(usize, &HarnessError, Duration),
{
    let mut attempt = 0usize;

    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_transient() => return Err(err),
            Err(err) => {
                if attempt >= policy.max_attempts() {
                    return Err(HarnessError::RetriesExhausted {
                        module: module.to_string(),
                        command: command.to_string(),
                        attempts: attempt,
                        message: err.message(),
                    });
                }

                let delay = policy.delay_for(attempt - 1);
                tracing::debug!(
                    module = %module,
                    command = %command,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "Retrying after transient error"
                );
                on_retry(attempt, &err, delay);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fast_policy(retries: usize) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_retries(retries)
            .with_backoff(Duration::from_millis(1))
    }

    #[test]
    fn test_retry_policy_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.backoff(), Duration::from_secs(5));
        assert_eq!(policy.strategy, BackoffStrategy::Constant);
        assert!(!policy.retryable_errors.is_empty());
    }

    #[test]
    fn test_delay_constant() {
        let policy = RetryPolicy::new().with_backoff(Duration::from_millis(100));
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(5), Duration::from_millis(100));
    }

    #[test]
    fn test_delay_linear_and_exponential() {
        let linear = RetryPolicy::new()
            .with_backoff(Duration::from_millis(100))
            .with_strategy(BackoffStrategy::Linear);
        assert_eq!(linear.delay_for(2), Duration::from_millis(300));

        let exponential = RetryPolicy::new()
            .with_backoff(Duration::from_millis(100))
            .with_strategy(BackoffStrategy::Exponential);
        assert_eq!(exponential.delay_for(0), Duration::from_millis(100));
        assert_eq!(exponential.delay_for(3), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_capped() {
        let mut policy = RetryPolicy::new()
            .with_backoff(Duration::from_millis(1000))
            .with_strategy(BackoffStrategy::Exponential);
        policy.max_backoff_ms = 5000;
        assert_eq!(policy.delay_for(10), Duration::from_millis(5000));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy::new()
            .with_backoff(Duration::from_millis(100))
            .with_jitter(true);
        for _ in 0..20 {
            let delay = policy.delay_for(0);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(120));
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let policy = fast_policy(3);
        let calls = Arc::new(AtomicUsize::new(0));
        let mut retries = Vec::new();

        let c = calls.clone();
        let result = with_retry(
            &policy,
            "vpc",
            "apply",
            || {
                let c = c.clone();
                async move {
                    let n = c.fetch_add(1, Ordering::SeqCst) + 1;
                    if n <= 2 {
                        Err(HarnessError::transient("vpc", "apply", "Throttling"))
                    } else {
                        Ok(n)
                    }
                }
            },
            |attempt, _, _| retries.push(attempt),
        )
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(retries, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_fatal_error_not_retried() {
        let policy = fast_policy(5);
        let calls = Arc::new(AtomicUsize::new(0));

        let c = calls.clone();
        let result: HarnessResult<()> = with_retry(
            &policy,
            "vpc",
            "apply",
            || {
                c.fetch_add(1, Ordering::SeqCst);
                async { Err(HarnessError::configuration("vpc", "No value for required variable")) }
            },
            |_, _, _| {},
        )
        .await;

        assert!(matches!(result, Err(HarnessError::Configuration { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_escalates() {
        let policy = fast_policy(2);
        let calls = Arc::new(AtomicUsize::new(0));

        let c = calls.clone();
        let result: HarnessResult<()> = with_retry(
            &policy,
            "vpc",
            "apply",
            || {
                c.fetch_add(1, Ordering::SeqCst);
                async { Err(HarnessError::transient("vpc", "apply", "Rate exceeded")) }
            },
            |_, _, _| {},
        )
        .await;

        match result {
            Err(HarnessError::RetriesExhausted { attempts, message, .. }) => {
                assert_eq!(attempts, 3);
                assert_eq!(message, "Rate exceeded");
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
