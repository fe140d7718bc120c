//! Shared retry wrapper for outbound calls.
//!
//! Handles the transient error kinds (transport, rate-limited, timeout,
//! upstream 5xx) with bounded exponential backoff plus jitter. The
//! per-attempt timeout wraps the future itself, so a fired timeout
//! drops the in-flight request rather than racing a detached timer.

use gl_domain::error::{Error, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Retry policy for one logical operation.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Per-attempt timeout. The whole attempt (connect + body) must
    /// finish within this window.
    pub per_attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(8),
            per_attempt_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.per_attempt_timeout = timeout;
        self
    }

    /// Exponential backoff with up-to-50% jitter.
    fn delay_for(&self, attempt: usize) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(1u32 << attempt.min(16) as u32)
            .min(self.max_delay);
        let jitter_ms = rand::thread_rng().gen_range(0..=exp.as_millis() as u64 / 2);
        exp + Duration::from_millis(jitter_ms)
    }
}

/// Run `f` under the retry policy.
///
/// `f` is called with the zero-based attempt number. Errors that are
/// not retry-eligible, and the final attempt's error, propagate as-is.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, op: &str, f: F) -> Result<T>
where
    F: Fn(usize) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0usize;
    loop {
        let result = match tokio::time::timeout(policy.per_attempt_timeout, f(attempt)).await
        {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(format!(
                "{op}: attempt {attempt} exceeded {}ms",
                policy.per_attempt_timeout.as_millis()
            ))),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(err) if err.retry_eligible && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    op = %op,
                    attempt,
                    kind = err.kind.as_str(),
                    delay_ms = delay.as_millis() as u64,
                    correlation_id = %err.correlation_id,
                    "transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            per_attempt_timeout: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_ref = Arc::clone(&calls);

        let result = with_retry(&fast_policy(), "test_op", move |_attempt| {
            let calls = Arc::clone(&calls_ref);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::transport("flaky"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retriable_error_fails_immediately() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_ref = Arc::clone(&calls);

        let result: Result<()> = with_retry(&fast_policy(), "test_op", move |_| {
            let calls = Arc::clone(&calls_ref);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::validation("bad input"))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_attempts_return_last_error() {
        let result: Result<()> = with_retry(&fast_policy(), "test_op", |_| async {
            Err(Error::from_status(503, "unavailable"))
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind, gl_domain::ErrorKind::Upstream5xx);
    }

    #[tokio::test]
    async fn per_attempt_timeout_produces_timeout_kind() {
        let policy = RetryPolicy {
            max_attempts: 1,
            per_attempt_timeout: Duration::from_millis(10),
            ..fast_policy()
        };
        let result: Result<()> = with_retry(&policy, "slow_op", |_| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert_eq!(result.unwrap_err().kind, gl_domain::ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn rate_limit_is_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_ref = Arc::clone(&calls);

        let result = with_retry(&fast_policy(), "test_op", move |_| {
            let calls = Arc::clone(&calls_ref);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(Error::from_status(429, "slow down"))
                } else {
                    Ok("ok")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
