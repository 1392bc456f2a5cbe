//! Bounded retry with exponential backoff around outbound calls.
//!
//! The original leans on `urllib3`'s transport-level `Retry` adapter
//! (`odoo_client.py`/`mail_writer_client.py`); `reqwest` has no equivalent
//! transport retry, so call sites are wrapped explicitly with a fixed
//! retry count and an exponential delay schedule built on the `backoff`
//! crate, capped by count rather than wall-clock budget.

use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;

/// Retry parameters for one external dependency (spec §4.5).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_interval: Duration,
}

impl RetryPolicy {
    /// Up to 2 retries, 1.0s exponential backoff — the composer.
    pub const COMPOSER: RetryPolicy = RetryPolicy {
        max_retries: 2,
        initial_interval: Duration::from_millis(1000),
    };

    /// Up to 3 retries, 0.5s backoff — the CRM.
    pub const CRM: RetryPolicy = RetryPolicy {
        max_retries: 3,
        initial_interval: Duration::from_millis(500),
    };
}

/// Runs `f`, retrying up to `policy.max_retries` times whenever
/// `is_retryable` accepts the error, waiting an exponentially growing
/// delay starting at `policy.initial_interval` between attempts. Returns
/// the last error once retries are exhausted or `is_retryable` rejects it.
pub async fn retry_with_backoff<F, Fut, T, E>(
    policy: RetryPolicy,
    mut f: F,
    is_retryable: impl Fn(&E) -> bool,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut backoff = ExponentialBackoff {
        initial_interval: policy.initial_interval,
        multiplier: 2.0,
        max_elapsed_time: None,
        ..ExponentialBackoff::default()
    };

    let mut attempt = 0u32;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= policy.max_retries || !is_retryable(&err) {
                    return Err(err);
                }
                let delay = backoff.next_backoff().unwrap_or(policy.initial_interval);
                attempt += 1;
                tracing::warn!(attempt, ?delay, "retrying after transient failure");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_interval: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn succeeds_without_retry() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = retry_with_backoff(
            fast_policy(2),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(42) }
            },
            |_| true,
        )
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_until_success_within_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = retry_with_backoff(
            fast_policy(2),
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("503")
                    } else {
                        Ok(7)
                    }
                }
            },
            |_| true,
        )
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_retries_and_returns_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = retry_with_backoff(
            fast_policy(2),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("504") }
            },
            |_| true,
        )
        .await;
        assert_eq!(result.unwrap_err(), "504");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_short_circuits() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = retry_with_backoff(
            fast_policy(5),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("400") }
            },
            |e| *e != "400",
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
