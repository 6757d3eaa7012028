use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use crate::domain::models::RetryConfig;

/// Exponential backoff retry policy for transient failures.
///
/// Backoff doubles with each retry: `initial * 2^attempt`, capped at `max_backoff_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    max_retries: u32,
    /// Initial backoff duration in milliseconds
    initial_backoff_ms: u64,
    /// Maximum backoff duration in milliseconds
    max_backoff_ms: u64,
}

/// Why [`RetryPolicy::execute`] gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// The operation failed with an error that retrying cannot fix.
    Permanent(E),
    /// Every allowed attempt failed transiently.
    Exhausted { attempts: u32, last: E },
}

impl RetryPolicy {
    pub const fn new(max_retries: u32, initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            max_retries,
            initial_backoff_ms,
            max_backoff_ms,
        }
    }

    pub const fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_retries,
            config.initial_backoff_ms,
            config.max_backoff_ms,
        )
    }

    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Run `operation` until it succeeds, fails permanently, or the retry
    /// ceiling is reached.
    ///
    /// `on_retry` runs before each backoff sleep with the upcoming retry
    /// number (1-based), the delay and the error that triggered it.
    pub async fn execute<F, Fut, T, E, C, R>(
        &self,
        mut operation: F,
        is_transient: C,
        mut on_retry: R,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> bool,
        R: FnMut(u32, Duration, &E),
    {
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(result) => {
                    if attempt > 0 {
                        debug!("Operation succeeded after {} retries", attempt);
                    }
                    return Ok(result);
                }
                Err(err) if !is_transient(&err) => return Err(RetryError::Permanent(err)),
                Err(err) if attempt >= self.max_retries => {
                    return Err(RetryError::Exhausted {
                        attempts: attempt + 1,
                        last: err,
                    });
                }
                Err(err) => {
                    let backoff = self.calculate_backoff(attempt);
                    attempt += 1;
                    on_retry(attempt, backoff, &err);
                    sleep(backoff).await;
                }
            }
        }
    }

    /// Formula: min(initial_backoff * 2^attempt, max_backoff)
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let backoff_ms = self
            .initial_backoff_ms
            .saturating_mul(2_u64.saturating_pow(attempt))
            .min(self.max_backoff_ms);

        Duration::from_millis(backoff_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug, PartialEq)]
    enum TestError {
        Flaky,
        Broken,
    }

    fn transient(err: &TestError) -> bool {
        *err == TestError::Flaky
    }

    #[test]
    fn test_backoff_calculation() {
        let policy = RetryPolicy::new(5, 1000, 60000);

        assert_eq!(policy.calculate_backoff(0), Duration::from_millis(1000));
        assert_eq!(policy.calculate_backoff(1), Duration::from_millis(2000));
        assert_eq!(policy.calculate_backoff(2), Duration::from_millis(4000));
        assert_eq!(policy.calculate_backoff(5), Duration::from_millis(32000));
        assert_eq!(policy.calculate_backoff(6), Duration::from_millis(60000));
        assert_eq!(policy.calculate_backoff(60), Duration::from_millis(60000));
    }

    #[tokio::test]
    async fn test_execute_retries_transient_then_succeeds() {
        let policy = RetryPolicy::new(3, 1, 5);
        let calls = Arc::new(AtomicU32::new(0));
        let mut retries = Vec::new();

        let result = policy
            .execute(
                || {
                    let calls = Arc::clone(&calls);
                    async move {
                        if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                            Err(TestError::Flaky)
                        } else {
                            Ok(42)
                        }
                    }
                },
                transient,
                |attempt, _, _| retries.push(attempt),
            )
            .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(retries, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_execute_does_not_retry_permanent_error() {
        let policy = RetryPolicy::new(3, 1, 5);
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = policy
            .execute(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(TestError::Broken) }
                },
                transient,
                |_, _, _| {},
            )
            .await;

        assert_eq!(result, Err(RetryError::Permanent(TestError::Broken)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_execute_exhausts_after_max_retries() {
        let policy = RetryPolicy::new(2, 1, 5);
        let calls = AtomicU32::new(0);
        let mut retries = 0;

        let result: Result<(), _> = policy
            .execute(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(TestError::Flaky) }
                },
                transient,
                |_, _, _| retries += 1,
            )
            .await;

        assert_eq!(
            result,
            Err(RetryError::Exhausted {
                attempts: 3,
                last: TestError::Flaky
            })
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(retries, 2);
    }
}
