//! Bounded exponential backoff.

use std::future::Future;
use std::time::Duration;

use crate::error::Result;

/// Backoff policy for retryable failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total tries, including the first one.
    pub attempts: u32,
    /// Growth factor between consecutive delays.
    pub factor: f64,
    pub min_delay: Duration,
    pub max_delay: Duration,
    /// Multiply each delay by a random factor in `[1, 2)`.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            factor: 3.0,
            min_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(5000),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (zero-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let mut millis = self.min_delay.as_millis() as f64 * self.factor.powi(exponent);
        if self.jitter {
            millis *= 1.0 + rand::random::<f64>();
        }
        let max = self.max_delay.as_millis() as f64;
        Duration::from_millis(millis.min(max).max(0.0) as u64)
    }
}

/// Run `operation` under `policy`.
///
/// Retryable errors (see [`crate::DatalogError::is_retryable`]) are retried after a
/// backoff sleep until `policy.attempts` tries are used up; the last error is
/// then returned. Any other error is returned immediately.
pub async fn retry<F, Fut, T>(policy: &RetryPolicy, operation: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() || attempt >= attempts => {
                if attempt > 1 {
                    tracing::warn!(operation, attempt, error = %e, "Giving up after retries");
                }
                return Err(e);
            }
            Err(e) => {
                let backoff = policy.delay_for(attempt - 1);
                tracing::warn!(
                    operation,
                    attempt,
                    max_attempts = attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Request failed, retrying"
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DatalogError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            attempts: 5,
            factor: 2.0,
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: false,
        }
    }

    #[tokio::test]
    async fn test_retries_dns_failures_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = retry(&fast_policy(), "test", || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(DatalogError::Dns("getaddrinfo EAI_AGAIN".into()))
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<()> = retry(&fast_policy(), "test", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(DatalogError::Http {
                    status: 400,
                    body: "bad request".into(),
                })
            }
        })
        .await;

        assert!(matches!(result, Err(DatalogError::Http { status: 400, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausts_attempts_and_returns_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<()> = retry(&fast_policy(), "test", || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                Err(DatalogError::Http {
                    status: 503,
                    body: format!("attempt {n}"),
                })
            }
        })
        .await;

        match result.unwrap_err() {
            DatalogError::Http { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "attempt 4");
            }
            other => panic!("Expected Http error, got: {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_grows_and_is_capped() {
        let policy = RetryPolicy {
            jitter: false,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for(1), Duration::from_millis(1500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(4500));
        assert_eq!(policy.delay_for(3), Duration::from_millis(5000));

        let start = tokio::time::Instant::now();
        let result: Result<()> = retry(&policy, "paused", || async {
            Err(DatalogError::Dns("dns error".into()))
        })
        .await;
        assert!(result.is_err());
        // 500 + 1500 + 4500 + 5000
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(11_500), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(11_600), "{elapsed:?}");
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy::default();
        for retry in 0..4 {
            let delay = policy.delay_for(retry);
            assert!(delay >= Duration::from_millis(500));
            assert!(delay <= Duration::from_millis(5000));
        }
    }
}
