//! Circuit breaker wrapping external dependencies.
//!
//! Two breakers exist per process by convention: one for Telegram, one for
//! the AI backends. Only failures that [`crate::error::SakaiError::trips_circuit`]
//! classifies as dependency failures count toward opening.

use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::error::{Result, SakaiError};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation
    Closed,
    /// Failing; reject requests without calling out
    Open,
    /// Probing whether the dependency recovered
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
}

/// Closed/open/half-open breaker for one external dependency.
pub struct CircuitBreaker {
    name: &'static str,
    fail_to_open: u32,
    success_to_close: u32,
    open_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(
        name: &'static str,
        fail_to_open: u32,
        success_to_close: u32,
        open_timeout: Duration,
    ) -> Self {
        Self {
            name,
            fail_to_open,
            success_to_close,
            open_timeout,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
            }),
        }
    }

    /// Breaker with the conventional thresholds (5 failures, 2 successes,
    /// 60 s open timeout).
    pub fn with_defaults(name: &'static str) -> Self {
        Self::new(name, 5, 2, Duration::from_secs(60))
    }

    /// Run `f` under breaker protection.
    ///
    /// Fails fast with [`SakaiError::CircuitOpen`] while open; admits one
    /// caller into half-open once the open timeout elapses. Failures that do
    /// not trip circuits pass through without touching breaker state.
    pub async fn call<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.admit()?;
        match f().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                if err.trips_circuit() {
                    self.record_failure();
                }
                Err(err)
            }
        }
    }

    /// Check admission, transitioning Open → HalfOpen when the timeout has
    /// elapsed.
    pub fn admit(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == CircuitState::Open {
            let elapsed = inner
                .opened_at
                .map(|t| t.elapsed() >= self.open_timeout)
                .unwrap_or(true);
            if elapsed {
                info!(breaker = self.name, "Circuit transitioning OPEN -> HALF_OPEN");
                inner.state = CircuitState::HalfOpen;
                inner.consecutive_successes = 0;
            } else {
                return Err(SakaiError::CircuitOpen(self.name));
            }
        }
        Ok(())
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.success_to_close {
                    info!(breaker = self.name, "Circuit transitioning HALF_OPEN -> CLOSED");
                    inner.state = CircuitState::Closed;
                    inner.consecutive_failures = 0;
                    inner.consecutive_successes = 0;
                    inner.opened_at = None;
                }
            }
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.consecutive_failures += 1;
        match inner.state {
            CircuitState::HalfOpen => {
                warn!(breaker = self.name, "Circuit transitioning HALF_OPEN -> OPEN");
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.consecutive_successes = 0;
            }
            CircuitState::Closed => {
                if inner.consecutive_failures >= self.fail_to_open {
                    warn!(
                        breaker = self.name,
                        failures = inner.consecutive_failures,
                        "Circuit transitioning CLOSED -> OPEN"
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;

    fn server_error() -> SakaiError {
        SakaiError::Provider(ProviderError::ServerError("500".into()))
    }

    fn breaker(fail: u32, success: u32, timeout_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new("test", fail, success, Duration::from_millis(timeout_ms))
    }

    #[tokio::test]
    async fn test_closed_passes_through() {
        let cb = breaker(3, 1, 100);
        let result = cb.call(|| async { Ok::<_, SakaiError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_opens_after_threshold() {
        let cb = breaker(3, 1, 10_000);
        for _ in 0..3 {
            let _ = cb.call(|| async { Err::<(), _>(server_error()) }).await;
        }
        assert_eq!(cb.state(), CircuitState::Open);

        // Next call fast-fails with the dedicated error.
        let result = cb.call(|| async { Ok::<_, SakaiError>(1) }).await;
        assert!(matches!(result, Err(SakaiError::CircuitOpen(_))));
    }

    #[tokio::test]
    async fn test_success_resets_failure_count_when_closed() {
        let cb = breaker(3, 1, 10_000);
        for _ in 0..2 {
            let _ = cb.call(|| async { Err::<(), _>(server_error()) }).await;
        }
        let _ = cb.call(|| async { Ok::<_, SakaiError>(()) }).await;
        for _ in 0..2 {
            let _ = cb.call(|| async { Err::<(), _>(server_error()) }).await;
        }
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_after_timeout_then_close() {
        let cb = breaker(1, 2, 20);
        let _ = cb.call(|| async { Err::<(), _>(server_error()) }).await;
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(40)).await;

        // First admitted call transitions to half-open.
        let _ = cb.call(|| async { Ok::<_, SakaiError>(()) }).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        let _ = cb.call(|| async { Ok::<_, SakaiError>(()) }).await;
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let cb = breaker(1, 2, 20);
        let _ = cb.call(|| async { Err::<(), _>(server_error()) }).await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        let _ = cb.call(|| async { Err::<(), _>(server_error()) }).await;
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_validation_errors_do_not_trip() {
        let cb = breaker(1, 1, 10_000);
        for _ in 0..5 {
            let _ = cb
                .call(|| async { Err::<(), _>(SakaiError::Validation("bad".into())) })
                .await;
        }
        assert_eq!(cb.state(), CircuitState::Closed);
    }
}
