//! Bounded retry and confirmation polling for backend calls
//!
//! Every call against a ledger backend goes through [`RetryRunner::run`].
//! The delay between attempts is fixed: both backends sit behind rate-stable
//! RPC/HTTP endpoints.

use crate::config::RetryConfig;
use crate::error::{ApprovalError, ApprovalResult};

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Result of polling a backend until a predicate holds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Satisfied(T),
    /// Attempts ran out; carries the last observed value
    TimedOut(Option<T>),
}

impl<T> PollOutcome<T> {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, PollOutcome::Satisfied(_))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryRunner {
    max_attempts: u32,
    delay: Duration,
}

impl Default for RetryRunner {
    fn default() -> Self {
        Self::new(10, Duration::from_secs(5))
    }
}

impl RetryRunner {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, config.delay())
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or
    /// exhausts `max_attempts`
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> ApprovalResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ApprovalResult<T>>,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;

            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempt >= self.max_attempts => {
                    return Err(ApprovalError::ExhaustedRetries {
                        operation: operation.to_string(),
                        attempts: attempt,
                        source: Box::new(e),
                    });
                }
                Err(e) => {
                    warn!(
                        "{} failed: {}; retrying {}/{} in {:?}",
                        operation,
                        e,
                        attempt + 1,
                        self.max_attempts,
                        self.delay
                    );
                    crate::metrics::record_retry(operation);
                    sleep(self.delay).await;
                }
            }
        }
    }

    /// Probe up to `attempts` times, `interval` apart, until `predicate`
    /// accepts the probed value. Each probe is itself retried with [`run`].
    ///
    /// [`run`]: RetryRunner::run
    pub async fn poll_until<T, F, Fut, P>(
        &self,
        operation: &str,
        attempts: u32,
        interval: Duration,
        mut probe: F,
        predicate: P,
    ) -> ApprovalResult<PollOutcome<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ApprovalResult<T>>,
        P: Fn(&T) -> bool,
    {
        let mut last = None;

        for attempt in 1..=attempts {
            let value = self.run(operation, &mut probe).await?;
            if predicate(&value) {
                return Ok(PollOutcome::Satisfied(value));
            }
            debug!("{}: condition not met ({}/{})", operation, attempt, attempts);
            last = Some(value);

            if attempt < attempts {
                sleep(interval).await;
            }
        }

        Ok(PollOutcome::TimedOut(last))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;
    use tokio_test::{assert_err, assert_ok};

    fn transient(n: u32) -> ApprovalError {
        ApprovalError::TransientNetwork {
            backend: "test".into(),
            message: format!("failure {}", n),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_r_minus_one_failures_with_fixed_delays() {
        let runner = RetryRunner::new(5, Duration::from_secs(5));
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let result = runner
            .run("flaky", || {
                let calls = calls.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 5 {
                        Err(transient(n))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(assert_ok!(result), 5);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(20));
        assert!(elapsed < Duration::from_secs(20) + Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_exactly_r_attempts_keeping_last_error() {
        let runner = RetryRunner::new(3, Duration::from_secs(1));
        let calls = Arc::new(AtomicU32::new(0));

        let result: ApprovalResult<()> = runner
            .run("always_down", || {
                let calls = calls.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    Err(transient(n))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match assert_err!(result) {
            ApprovalError::ExhaustedRetries {
                operation,
                attempts,
                source,
            } => {
                assert_eq!(operation, "always_down");
                assert_eq!(attempts, 3);
                assert!(source.to_string().contains("failure 3"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_errors_return_immediately() {
        let runner = RetryRunner::new(10, Duration::from_secs(5));
        let calls = Arc::new(AtomicU32::new(0));

        let result: ApprovalResult<()> = runner
            .run("reject", || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ApprovalError::InvalidInput("bad".into()))
                }
            })
            .await;

        assert!(matches!(result, Err(ApprovalError::InvalidInput(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_until_reports_satisfied_and_timeout() {
        let runner = RetryRunner::new(2, Duration::from_millis(10));
        let counter = Arc::new(AtomicU32::new(0));

        let outcome = runner
            .poll_until(
                "count",
                5,
                Duration::from_secs(5),
                || {
                    let counter = counter.clone();
                    async move { Ok(counter.fetch_add(1, Ordering::SeqCst) + 1) }
                },
                |n| *n >= 3,
            )
            .await
            .expect("poll");
        assert_eq!(outcome, PollOutcome::Satisfied(3));

        let start = Instant::now();
        let outcome = runner
            .poll_until(
                "never",
                4,
                Duration::from_secs(5),
                || async { Ok(0u32) },
                |n| *n > 0,
            )
            .await
            .expect("poll");
        assert_eq!(outcome, PollOutcome::TimedOut(Some(0)));
        assert!(start.elapsed() >= Duration::from_secs(15));
        assert!(start.elapsed() < Duration::from_secs(20));
    }
}
