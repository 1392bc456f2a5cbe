//! The resilience envelope wrapping every outbound call to the CRM and the
//! composer: bounded retry with backoff, a per-dependency circuit breaker,
//! and a per-client token bucket on inbound control operations.

pub mod circuit_breaker;
pub mod rate_limit;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use rate_limit::InboundRateLimiter;
pub use retry::{retry_with_backoff, RetryPolicy};
