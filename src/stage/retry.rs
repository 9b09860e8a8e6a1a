//! Bounded retries with exponential backoff for stage calls.

use crate::config::RetrySettings;
use crate::error::{StageError, StageErrorKind};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// How many times, and how patiently, a retryable call is repeated.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Always at least 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
        }
    }

    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before the attempt following `attempt` (1-based): base * 2^(attempt-1), capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op`, repeating it while it fails with a retryable error.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, StageError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StageError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        "{} failed (attempt {}/{}): {}. Retrying in {:?}",
                        what, attempt, self.max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Bound a future by `limit`, turning an overrun into a retryable timeout.
pub async fn bounded<T, Fut>(limit: Duration, what: &str, fut: Fut) -> Result<T, StageError>
where
    Fut: Future<Output = Result<T, StageError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(StageError::new(
            StageErrorKind::Timeout,
            format!("{} timed out after {:?}", what, limit),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 6,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for(40), Duration::from_millis(500));
    }

    #[test]
    fn test_zero_attempts_clamped() {
        let policy = RetryPolicy::from_settings(&RetrySettings {
            max_attempts: 0,
            ..Default::default()
        });
        assert_eq!(policy.max_attempts, 1);
    }

    #[tokio::test]
    async fn test_retries_retryable_until_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = fast(3)
            .run("flaky", move || async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(StageError::new(StageErrorKind::RateLimit, "429"))
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = fast(2)
            .run("down", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(StageError::new(StageErrorKind::Service, "503"))
            })
            .await;

        assert_eq!(result.unwrap_err().kind, StageErrorKind::Service);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_never_retries_non_retryable() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = fast(5)
            .run("quota", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(StageError::new(StageErrorKind::QuotaExceeded, "daily cap"))
            })
            .await;

        assert_eq!(result.unwrap_err().kind, StageErrorKind::QuotaExceeded);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bounded_times_out() {
        let result: Result<(), _> = bounded(Duration::from_millis(5), "sleepy", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        let err = result.unwrap_err();
        assert_eq!(err.kind, StageErrorKind::Timeout);
        assert!(err.is_retryable());
    }
}
