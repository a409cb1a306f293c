//! Reusable retry with exponential backoff.

use std::future::Future;
use std::time::Duration;

/// Retry policy with exponential backoff.
///
/// Attempt `n` (zero-based) that fails is followed by a sleep of
/// `base_delay * 2^n` before the next attempt. No sleep follows the final
/// failure; the last error is returned as-is.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay inserted after a failed attempt (zero-based index).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }

    /// Run `op` until it succeeds or attempts are exhausted.
    ///
    /// The operation receives the zero-based attempt number, mainly for
    /// logging.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt + 1 < self.max_attempts => {
                    let delay = self.backoff_delay(attempt);
                    tracing::warn!(
                        "attempt {} of {} failed ({}), retrying in {:.1}s",
                        attempt + 1,
                        self.max_attempts,
                        e,
                        delay.as_secs_f64()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(0), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_succeeds_first_try_without_sleeping() {
        let policy = RetryPolicy::new(3, Duration::from_secs(60));
        let result: Result<u32, &str> = policy.run(|_| async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_fail_succeed_backs_off_one_then_two_seconds() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let result: Result<&str, &str> = policy
            .run(|_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("transient")
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s after the first failure, 2s after the second.
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error_without_trailing_sleep() {
        let policy = RetryPolicy::new(2, Duration::from_secs(1));
        let started = tokio::time::Instant::now();

        let result: Result<(), String> = policy
            .run(|attempt| async move { Err(format!("failure {}", attempt)) })
            .await;

        assert_eq!(result.unwrap_err(), "failure 1");
        assert_eq!(started.elapsed(), Duration::from_secs(1));
    }
}
