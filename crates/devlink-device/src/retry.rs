use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{DeviceError, Result};

/// Bounded retry of a request whose attempts can fail transiently.
///
/// Failures for which `retry_on` is false end the loop immediately.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Reply deadline for each attempt.
    pub attempt_timeout: Duration,
    /// Pause after a successful attempt before returning.
    pub settle_delay: Duration,
    pub retry_on: fn(&DeviceError) -> bool,
}

impl RetryPolicy {
    /// Policy used to take the controller lock.
    pub const LOCK: RetryPolicy = RetryPolicy {
        max_attempts: 50,
        attempt_timeout: Duration::from_millis(100),
        settle_delay: Duration::from_millis(10),
        retry_on: DeviceError::is_timeout,
    };

    /// Run `attempt` until it succeeds, fails with a non-retryable error, or
    /// the attempts run out.
    ///
    /// Running out is not an error: it resolves to `Ok(None)` with a warning.
    /// Callers that must know whether they succeeded check for `Some`.
    pub async fn run<T, F, Fut>(&self, what: &str, mut attempt: F) -> Result<Option<T>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        for n in 1..=self.max_attempts {
            match attempt(n).await {
                Ok(value) => {
                    tokio::time::sleep(self.settle_delay).await;
                    return Ok(Some(value));
                }
                Err(err) if (self.retry_on)(&err) => {
                    debug!(what, attempt = n, %err, "attempt failed, retrying");
                }
                Err(err) => return Err(err),
            }
        }
        warn!(what, attempts = self.max_attempts, "giving up after all attempts failed");
        Ok(None)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::LOCK
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn exhaustion_resolves_without_error() {
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy::LOCK;
        let out: Option<()> = policy
            .run("test", |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(DeviceError::Timeout(policy.attempt_timeout))
            })
            .await
            .unwrap();
        assert!(out.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 50);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_on_first_success() {
        let out = RetryPolicy::LOCK
            .run("test", |n| async move {
                if n < 3 {
                    Err(DeviceError::Timeout(Duration::from_millis(100)))
                } else {
                    Ok(n)
                }
            })
            .await
            .unwrap();
        assert_eq!(out, Some(3));
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let calls = &AtomicU32::new(0);
        let err = RetryPolicy::LOCK
            .run("test", |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(DeviceError::Protocol("ERROR".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::Protocol(ref name) if name == "ERROR"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn predicate_selects_retryable_errors() {
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 3,
            retry_on: |err| matches!(err, DeviceError::Busy(_)),
            ..RetryPolicy::LOCK
        };
        let out: Option<()> = policy
            .run("test", |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(DeviceError::Busy("controller"))
            })
            .await
            .unwrap();
        assert!(out.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
