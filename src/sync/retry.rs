use std::future::Future;
use std::time::Duration;

use tracing::warn;

use super::error::{SyncError, SyncResult};

/// Bounded exponential backoff for pull/push attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Delay to wait before retry number `attempt` (1-based). Doubles each
    /// attempt, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        let delay = self.base_delay.saturating_mul(factor);
        std::cmp::min(delay, self.max_delay)
    }

    /// Runs `op` until it succeeds, fails with a permanent error, or the
    /// attempt budget is spent. The terminal error is wrapped with the
    /// operation label and the number of attempts made.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> SyncResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SyncResult<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient sync failure, will retry"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    return Err(SyncError::Failed {
                        operation: operation.to_string(),
                        attempts: attempt,
                        source: Box::new(err),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(4))
    }

    #[test]
    fn test_delay_doubles_per_attempt() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_secs(60));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy::new(5, Duration::from_millis(10), Duration::from_millis(15));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(10));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(15));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(15));
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = fast_policy()
            .run("pull", move || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        Err(SyncError::Transport("connection refused".into()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.ok(), Some(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_fails_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: SyncResult<()> = fast_policy()
            .run("push", move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(SyncError::Rejected {
                        status: 401,
                        message: "bad token".into(),
                    })
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        match result {
            Err(SyncError::Failed {
                attempts, source, ..
            }) => {
                assert_eq!(attempts, 1);
                assert!(matches!(*source, SyncError::Rejected { status: 401, .. }));
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_attempt_budget_is_exhausted() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: SyncResult<()> = fast_policy()
            .run("pull", move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(SyncError::ServerError {
                        status: 503,
                        message: "try later".into(),
                    })
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(SyncError::Failed {
                operation,
                attempts,
                ..
            }) => {
                assert_eq!(operation, "pull");
                assert_eq!(attempts, 3);
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }
}
