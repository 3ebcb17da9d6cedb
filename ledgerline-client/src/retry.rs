//! Exponential-backoff retry around fallible remote calls.

use std::future::Future;
use std::time::Duration;

use ledgerline_core::ApiResult;
use rand::Rng;

/// Retry schedule for remote calls.
///
/// Terminal error kinds (see [`ledgerline_core::ErrorKind::is_retryable`]) are
/// returned on the first failure. Side effects are never deduplicated: a
/// mutation that timed out may be applied twice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles afterwards
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Upper bound of the random delay added to each wait
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            jitter: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            ..Self::default()
        }
    }

    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Deterministic part of the wait after failed attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    fn delay_after(&self, attempt: u32) -> Duration {
        let jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
        };
        self.backoff(attempt).saturating_add(jitter).min(self.max_delay)
    }

    /// Run `call` until it succeeds, fails terminally, or attempts run out.
    ///
    /// The last error is returned unchanged.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> ApiResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ApiResult<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let error = match call().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };
            if !error.is_retryable() || attempt >= max_attempts {
                return Err(error);
            }
            let delay = self.delay_after(attempt);
            tracing::warn!(
                operation,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                kind = %error.kind,
                "Transient failure; retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Run `call` under the default policy.
pub async fn with_retry<T, F, Fut>(operation: &str, call: F) -> ApiResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ApiResult<T>>,
{
    RetryPolicy::default().run(operation, call).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerline_core::{ApiError, ErrorKind};
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_failures_with_doubling_delay() {
        let calls = &AtomicU32::new(0);
        let started = Instant::now();
        let result: ApiResult<()> = RetryPolicy::default()
            .run("list employees", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ApiError::from_kind(ErrorKind::ServerError))
            })
            .await;

        assert_eq!(result.unwrap_err().kind, ErrorKind::ServerError);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s after the first failure, 2s after the second.
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_validation_is_never_retried() {
        let calls = &AtomicU32::new(0);
        let started = Instant::now();
        let result: ApiResult<()> = RetryPolicy::default()
            .run("create employee", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ApiError::validation("email is required"))
            })
            .await;

        assert_eq!(result.unwrap_err().message, "email is required");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failure() {
        let calls = &AtomicU32::new(0);
        let result = with_retry("get association", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ApiError::network("connection reset"))
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_kinds_make_one_attempt() {
        for kind in ErrorKind::ALL.into_iter().filter(|k| !k.is_retryable()) {
            let calls = &AtomicU32::new(0);
            let _: ApiResult<()> = RetryPolicy::default()
                .run("op", move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ApiError::from_kind(kind))
                })
                .await;
            assert_eq!(calls.load(Ordering::SeqCst), 1, "{kind}");
        }
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::new(10, Duration::from_secs(1)).with_max_delay(Duration::from_secs(5));
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(4), Duration::from_secs(5));
        assert_eq!(policy.backoff(200), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy::default().with_jitter(Duration::from_millis(250));
        for _ in 0..50 {
            let delay = policy.delay_after(1);
            assert!(delay >= Duration::from_millis(1000));
            assert!(delay <= Duration::from_millis(1250));
        }
    }

    proptest! {
        #[test]
        fn prop_backoff_is_non_decreasing(base_ms in 0u64..5_000, attempts in 1u32..40) {
            let policy = RetryPolicy::new(attempts, Duration::from_millis(base_ms));
            let delays: Vec<Duration> = (1..attempts).map(|n| policy.backoff(n)).collect();
            prop_assert!(delays.windows(2).all(|w| w[0] <= w[1]));
            prop_assert!(delays.iter().all(|d| *d <= policy.max_delay));
        }
    }
}
