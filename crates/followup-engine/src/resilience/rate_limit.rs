//! Per-client token bucket rate limiting for inbound control operations.
//!
//! Grounded in `original_source/.../api/rate_limiting.py`'s `TokenBucket`
//! (refill at `requests_per_minute / 60` tokens/second, capacity
//! `burst_size`, keyed per client id), reimplemented on the `governor`
//! crate's keyed rate limiter rather than hand-rolling the bucket math —
//! the pack's `knhk-workflow-engine` resilience module shows the same
//! `governor::RateLimiter::keyed` shape for per-key token buckets.

use std::num::NonZeroU32;

use governor::clock::{Clock, DefaultClock, QuantaClock};
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter as GovernorRateLimiter};

use crate::error::{FollowupError, Result};

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            burst_size: 10,
        }
    }
}

/// One token bucket per caller identity (spec §4.5), refilled at
/// `requests_per_minute / 60` tokens/second up to `burst_size`.
pub struct InboundRateLimiter {
    limiter: GovernorRateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>,
    clock: QuantaClock,
}

impl InboundRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let burst = NonZeroU32::new(config.burst_size.max(1)).expect("burst_size clamped to >= 1");
        let per_minute =
            NonZeroU32::new(config.requests_per_minute.max(1)).expect("requests_per_minute clamped to >= 1");
        let quota = Quota::per_minute(per_minute).allow_burst(burst);
        Self {
            limiter: GovernorRateLimiter::keyed(quota),
            clock: QuantaClock::default(),
        }
    }

    /// Checks whether `client_id` may proceed, consuming one token on
    /// success. On rejection, returns `RateLimitExceeded` carrying the
    /// seconds until a token is available, for the `Retry-After` header.
    pub fn check(&self, client_id: &str) -> Result<()> {
        self.limiter.check_key(&client_id.to_string()).map_err(|not_until| {
            let retry_after = not_until.wait_time_from(self.clock.now()).as_secs().max(1);
            FollowupError::RateLimitExceeded { retry_after }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_requests_within_burst() {
        let limiter = InboundRateLimiter::new(RateLimitConfig {
            requests_per_minute: 60,
            burst_size: 3,
        });
        for _ in 0..3 {
            assert!(limiter.check("client-a").is_ok());
        }
    }

    #[test]
    fn rejects_once_burst_is_exhausted() {
        let limiter = InboundRateLimiter::new(RateLimitConfig {
            requests_per_minute: 60,
            burst_size: 2,
        });
        assert!(limiter.check("client-a").is_ok());
        assert!(limiter.check("client-a").is_ok());
        let err = limiter.check("client-a").unwrap_err();
        assert!(matches!(err, FollowupError::RateLimitExceeded { .. }));
    }

    #[test]
    fn buckets_are_independent_per_client() {
        let limiter = InboundRateLimiter::new(RateLimitConfig {
            requests_per_minute: 60,
            burst_size: 1,
        });
        assert!(limiter.check("client-a").is_ok());
        assert!(limiter.check("client-b").is_ok());
    }
}
