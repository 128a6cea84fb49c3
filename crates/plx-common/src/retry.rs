//! Retry utilities with quadratic backoff.
//!
//! The agent, the `wait` command and the sidecar all back off the same way:
//! after the n-th failed attempt they sleep `n²` seconds, capped by
//! `max_delay`. Only errors whose [`Retryable::is_retryable`] returns true are
//! retried; anything else is returned immediately.
//!
//! # Example
//!
//! ```ignore
//! use plx_common::retry::{retry_with_backoff, RetryConfig};
//!
//! let run = retry_with_backoff(
//!     &RetryConfig::with_max_attempts(5),
//!     "get_run",
//!     || async { api.get_run(&owner, &project, &uuid).await },
//! ).await?;
//! ```

use std::time::Duration;

use tracing::{error, warn};

use crate::error::Retryable;

/// Configuration for operations that may fail transiently.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts (0 = infinite)
    pub max_attempts: u32,
    /// Base unit multiplied by `attempt²`
    pub unit: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            unit: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    /// Create a config with a maximum number of attempts
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }

    /// Create a config that retries forever (infinite attempts)
    pub fn infinite() -> Self {
        Self::default()
    }

    /// Delay to wait after the given (1-based) failed attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        backoff_delay(attempt, self.unit, self.max_delay)
    }
}

/// `attempt² × unit`, capped at `max_delay`.
pub fn backoff_delay(attempt: u32, unit: Duration, max_delay: Duration) -> Duration {
    let squared = u64::from(attempt).saturating_mul(u64::from(attempt));
    let delay = unit.saturating_mul(squared.min(u64::from(u32::MAX)) as u32);
    delay.min(max_delay)
}

/// Execute an async operation with quadratic backoff.
///
/// Retries until success, until `max_attempts` is exhausted, or until the
/// operation returns a non-retryable error.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display + Retryable,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_retryable() => {
                error!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    "Operation failed with a permanent error"
                );
                return Err(e);
            }
            Err(e) => {
                if config.max_attempts > 0 && attempt >= config.max_attempts {
                    error!(
                        operation = %operation_name,
                        attempt = attempt,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }

                let delay = config.delay_for(attempt);
                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug, PartialEq)]
    struct TestError {
        retryable: bool,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "test error (retryable={})", self.retryable)
        }
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            self.retryable
        }
    }

    #[test]
    fn delay_is_quadratic_and_capped() {
        let unit = Duration::from_secs(1);
        let cap = Duration::from_secs(10);
        assert_eq!(backoff_delay(1, unit, cap), Duration::from_secs(1));
        assert_eq!(backoff_delay(2, unit, cap), Duration::from_secs(4));
        assert_eq!(backoff_delay(3, unit, cap), Duration::from_secs(9));
        assert_eq!(backoff_delay(4, unit, cap), Duration::from_secs(10));
        assert_eq!(backoff_delay(u32::MAX, unit, cap), cap);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_immediately() {
        let config = RetryConfig::with_max_attempts(3);
        let result: Result<i32, TestError> =
            retry_with_backoff(&config, "op", || async { Ok(42) }).await;
        assert_eq!(result, Ok(42));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Result<i32, TestError> =
            retry_with_backoff(&RetryConfig::with_max_attempts(5), "op", || {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(TestError { retryable: true })
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(42));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_max_attempts() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Result<i32, TestError> =
            retry_with_backoff(&RetryConfig::with_max_attempts(3), "op", || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(TestError { retryable: true })
                }
            })
            .await;

        assert_eq!(result, Err(TestError { retryable: true }));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_error_is_not_retried() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Result<i32, TestError> =
            retry_with_backoff(&RetryConfig::infinite(), "op", || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(TestError { retryable: false })
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
