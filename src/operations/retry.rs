//! Fixed-interval, deadline-bounded retry
//!
//! The first attempt starts immediately. Failed attempts are retried every
//! `interval` until `timeout` has elapsed since the start. The loop stops
//! early on success, on a non-retryable error, on an error marked
//! [`Error::Terminal`], or on cancellation. When the deadline passes the
//! last attempt's error is returned.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::common::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Same interval, different deadline
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }

    pub async fn run<T, F, Fut>(&self, cancel: &CancellationToken, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let deadline = Instant::now() + self.timeout;
        let mut last_error: Option<Error> = None;
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let remaining = deadline.saturating_duration_since(Instant::now());
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                outcome = tokio::time::timeout(remaining, attempt()) => outcome,
            };

            let error = match outcome {
                Ok(Ok(value)) => {
                    if attempts > 1 {
                        tracing::debug!(attempts, "succeeded after retrying");
                    }
                    return Ok(value);
                }
                Ok(Err(Error::Terminal(error))) => return Err(*error),
                Ok(Err(error)) if !error.is_retryable() => return Err(error),
                Ok(Err(error)) => error,
                Err(_) => return Err(last_error.unwrap_or(Error::Timeout(self.timeout))),
            };

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                tracing::debug!(attempts, error = %error, "deadline reached");
                return Err(error);
            }
            tracing::trace!(attempts, error = %error, "attempt failed, retrying");
            last_error = Some(error);

            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(self.interval.min(remaining)) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> Error {
        Error::Client(ClientError::Connection("refused".into()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(10));
        let result = policy
            .run(&CancellationToken::new(), || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 3 {
                    Err(transient())
                } else {
                    Ok(42)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_last_error_at_deadline() {
        let started = Instant::now();
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(2));
        let err = policy
            .run(&CancellationToken::new(), || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Error::WaitNotSatisfied(format!("attempt {n}")))
            })
            .await
            .unwrap_err();
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert_eq!(err.to_string(), "attempt 2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_on_non_retryable() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(10));
        let err = policy
            .run(&CancellationToken::new(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Error::AlreadyExists)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_marker_is_stripped() {
        let policy = RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(10));
        let err = policy
            .run(&CancellationToken::new(), || async {
                Err::<(), _>(transient().terminal())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Client(_)));
    }

    #[tokio::test]
    async fn test_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let policy = RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(10));
        let err = policy
            .run(&cancel, || async { Err::<(), _>(transient()) })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
