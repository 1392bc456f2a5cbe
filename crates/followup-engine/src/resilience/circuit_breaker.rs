//! Per-dependency circuit breaker: `closed` -> `open` -> `half_open`.
//!
//! A single failure while `half_open` reopens the circuit; the configured
//! number of consecutive successes while `half_open` closes it.

use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub open_timeout: Duration,
}

struct Inner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_at: Option<Instant>,
}

/// Guards one external dependency. Cheap to construct; holds its state
/// behind a plain `Mutex`, the way the teacher guards its DB connection
/// handle rather than reaching for an actor or an atomic state machine.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

#[derive(Debug, thiserror::Error)]
#[error("circuit breaker '{0}' is open")]
pub struct CircuitOpenError(pub String);

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_at: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, transitioning `open` -> `half_open` if the timeout
    /// has elapsed since the last recorded failure.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock().expect("circuit breaker lock poisoned");
        if inner.state == CircuitState::Open && self.should_attempt_reset(&inner) {
            inner.state = CircuitState::HalfOpen;
            inner.success_count = 0;
            tracing::info!(circuit = self.name, "circuit breaker entering half-open state");
        }
        inner.state
    }

    fn should_attempt_reset(&self, inner: &Inner) -> bool {
        match inner.last_failure_at {
            None => true,
            Some(t) => t.elapsed() >= self.config.open_timeout,
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock().expect("circuit breaker lock poisoned");
        match inner.state {
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    tracing::info!(circuit = self.name, "circuit breaker closed after recovery");
                }
            }
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("circuit breaker lock poisoned");
        inner.failure_count += 1;
        inner.last_failure_at = Some(Instant::now());

        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                tracing::warn!(circuit = self.name, "circuit breaker reopened after half-open failure");
            }
            CircuitState::Closed if inner.failure_count >= self.config.failure_threshold => {
                inner.state = CircuitState::Open;
                tracing::warn!(
                    circuit = self.name,
                    failure_count = inner.failure_count,
                    "circuit breaker opened"
                );
            }
            _ => {}
        }
    }

    /// Executes `f` through the circuit breaker. Fails fast with
    /// `CircuitOpenError` while open; otherwise runs `f` and records the
    /// outcome.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitBreakerOutcome<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        if self.state() == CircuitState::Open {
            return Err(CircuitBreakerOutcome::Open(CircuitOpenError(self.name.clone())));
        }

        match f().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(CircuitBreakerOutcome::Failed(err))
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerOutcome<E> {
    #[error(transparent)]
    Open(#[from] CircuitOpenError),
    #[error(transparent)]
    Failed(E),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            open_timeout: Duration::from_millis(20),
        }
    }

    #[tokio::test]
    async fn opens_after_failure_threshold() {
        let breaker = CircuitBreaker::new("composer", config());
        for _ in 0..3 {
            let _ = breaker.call(|| async { Err::<(), _>("boom") }).await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let result = breaker.call(|| async { Ok::<_, &str>(()) }).await;
        assert!(matches!(result, Err(CircuitBreakerOutcome::Open(_))));
    }

    #[tokio::test]
    async fn half_open_single_failure_reopens() {
        let breaker = CircuitBreaker::new("composer", config());
        for _ in 0..3 {
            let _ = breaker.call(|| async { Err::<(), _>("boom") }).await;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        let _ = breaker.call(|| async { Err::<(), _>("boom again") }).await;
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn half_open_closes_after_success_threshold() {
        let breaker = CircuitBreaker::new("composer", config());
        for _ in 0..3 {
            let _ = breaker.call(|| async { Err::<(), _>("boom") }).await;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;

        let _ = breaker.call(|| async { Ok::<_, &str>(()) }).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        let _ = breaker.call(|| async { Ok::<_, &str>(()) }).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
