//! Throttling and retry for HTTP collaborators
//!
//! Every outbound call first waits on the client's rate limiter, then retries
//! with exponential backoff for rate-limit responses and a flat delay for
//! other transient failures.

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::future::Future;
use std::time::Duration;

use super::collaborators::CollaboratorError;

/// Backoff parameters
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after `attempt` (0-based) failed with `error`
    pub fn delay_for(&self, attempt: u32, error: &CollaboratorError) -> Duration {
        if error.is_rate_limited() {
            let factor = 2u32.saturating_pow(attempt);
            self.base_delay.saturating_mul(factor).min(self.max_delay)
        } else {
            self.base_delay.min(self.max_delay)
        }
    }
}

/// Rate limiter allowing one call per `min_interval`
pub fn throttle(min_interval: Duration) -> DefaultDirectRateLimiter {
    // with_period only rejects a zero interval
    let quota = Quota::with_period(min_interval)
        .unwrap_or_else(|| Quota::per_second(std::num::NonZeroU32::MIN));
    RateLimiter::direct(quota)
}

/// Run `op` under the limiter, retrying transient failures per `policy`
pub async fn call_with_retry<T, F, Fut>(
    label: &str,
    limiter: &DefaultDirectRateLimiter,
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T, CollaboratorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CollaboratorError>>,
{
    let mut attempt = 0;
    loop {
        limiter.until_ready().await;

        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay_for(attempt, &e);
                tracing::warn!(
                    call = label,
                    attempt = attempt + 1,
                    max_attempts = policy.max_attempts,
                    delay_secs = delay.as_secs_f64(),
                    error = %e,
                    "Collaborator call failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::error!(call = label, attempts = attempt + 1, error = %e, "Collaborator call failed");
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_rate_limit_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        let err = CollaboratorError::RateLimited("429".into());
        assert_eq!(policy.delay_for(0, &err), Duration::from_secs(3));
        assert_eq!(policy.delay_for(1, &err), Duration::from_secs(6));
        assert_eq!(policy.delay_for(2, &err), Duration::from_secs(12));
        assert_eq!(policy.delay_for(10, &err), Duration::from_secs(60));
    }

    #[test]
    fn test_other_errors_use_flat_delay() {
        let policy = RetryPolicy::default();
        let err = CollaboratorError::Network("reset".into());
        assert_eq!(policy.delay_for(3, &err), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let limiter = throttle(Duration::from_millis(1));
        let calls = AtomicU32::new(0);

        let result = call_with_retry("test", &limiter, &fast_policy(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(CollaboratorError::Network("flaky".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let limiter = throttle(Duration::from_millis(1));
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = call_with_retry("test", &limiter, &fast_policy(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CollaboratorError::RateLimited("429".into())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_unavailable_is_not_retried() {
        let limiter = throttle(Duration::from_millis(1));
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = call_with_retry("test", &limiter, &fast_policy(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CollaboratorError::Unavailable("no key".into())) }
        })
        .await;

        assert!(matches!(result, Err(CollaboratorError::Unavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
