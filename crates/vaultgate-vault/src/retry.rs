//! Exponential backoff retry around vault calls.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::VaultError;

/// Retry policy for vault operations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Backoff before the second attempt.
    pub base_backoff: Duration,
    /// Multiplier applied per subsequent attempt.
    pub backoff_multiplier: f64,
    /// Fractional jitter applied to each backoff (0.2 = ±20 %).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(100),
            backoff_multiplier: 1.5,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Backoff before attempt `attempt` (1-based; attempt 1 has none),
    /// without jitter.
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = self.backoff_multiplier.powi(attempt as i32 - 2);
        Duration::from_secs_f64(self.base_backoff.as_secs_f64() * factor)
    }

    /// Backoff with jitter applied, sampled fresh per call.
    fn jittered_backoff(&self, attempt: u32) -> Duration {
        let base = self.backoff_duration(attempt);
        if base.is_zero() || self.jitter <= 0.0 {
            return base;
        }
        let factor = rand::thread_rng().gen_range(1.0 - self.jitter..=1.0 + self.jitter);
        Duration::from_secs_f64(base.as_secs_f64() * factor)
    }
}

/// Run `operation` under `policy`, retrying transient failures only.
///
/// `NotFound` and `Denied` return immediately; only `Unavailable` is
/// retried, and the last error is returned once attempts are exhausted.
pub async fn execute<F, Fut, T>(policy: &RetryPolicy, mut operation: F) -> crate::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = crate::Result<T>>,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                let backoff = policy.jittered_backoff(attempt + 1);
                debug!(attempt, backoff_ms = backoff.as_millis() as u64, "vault call failed, retrying");
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_grows_geometrically() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_duration(1), Duration::ZERO);
        assert_eq!(policy.backoff_duration(2), Duration::from_millis(100));
        assert_eq!(policy.backoff_duration(3), Duration::from_millis(150));
    }

    #[tokio::test]
    async fn not_found_is_never_retried() {
        let calls = AtomicU32::new(0);
        let result: crate::Result<()> = execute(&RetryPolicy::default(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(VaultError::NotFound("credentials/x/current".into())) }
        })
        .await;
        assert!(matches!(result, Err(VaultError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_errors_exhaust_attempts() {
        let policy = RetryPolicy {
            base_backoff: Duration::from_millis(1),
            ..RetryPolicy::default()
        };
        let calls = AtomicU32::new(0);
        let result: crate::Result<()> = execute(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(VaultError::Unavailable("connection refused".into())) }
        })
        .await;
        assert!(matches!(result, Err(VaultError::Unavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let policy = RetryPolicy {
            base_backoff: Duration::from_millis(1),
            ..RetryPolicy::default()
        };
        let calls = AtomicU32::new(0);
        let result = execute(&policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(VaultError::Unavailable("flaky".into()))
                } else {
                    Ok(42u32)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
