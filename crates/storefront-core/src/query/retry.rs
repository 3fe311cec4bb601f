//! Retry with capped exponential backoff.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Number of retries after the first failed attempt.
pub const DEFAULT_RETRIES: u32 = 2;

/// Delay before the first retry. Doubles for each subsequent retry.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;

/// Upper bound on any single backoff delay.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            retries: 0,
            ..Self::default()
        }
    }

    /// Delay before the retry with zero-based index `attempt_index`:
    /// `min(base * 2^attempt_index, max)`.
    pub fn delay_for_attempt(&self, attempt_index: u32) -> Duration {
        let multiplier = 2u32.checked_pow(attempt_index).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(multiplier)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Run `operation` until it succeeds or the retries are used up, sleeping
    /// between attempts. Returns the last error on exhaustion.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut attempt_index = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt_index < self.retries => {
                    let backoff = self.delay_for_attempt(attempt_index);
                    warn!(
                        key = label,
                        attempt = attempt_index + 1,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Fetch failed, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt_index += 1;
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
    fn test_delay_doubles_then_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(16_000));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(30_000));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_millis(30_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_gives_up_after_retries() {
        let calls = AtomicU32::new(0);
        let start = tokio::time::Instant::now();
        let result: Result<(), String> = RetryPolicy::default()
            .run("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("boom".to_string()) }
            })
            .await;

        assert_eq!(result, Err("boom".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_returns_first_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = RetryPolicy::default()
            .run("test", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { if n == 0 { Err("flaky".to_string()) } else { Ok(n) } }
            })
            .await;

        assert_eq!(result, Ok(1));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_retry_policy_tries_once() {
        let calls = AtomicU32::new(0);
        let result: Result<(), &str> = RetryPolicy::none()
            .run("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("down") }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
