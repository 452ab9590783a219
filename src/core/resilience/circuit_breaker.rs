//! Circuit breaker for calls to unreliable dependencies.
//!
//! The breaker starts `Closed`. Once `failure_threshold` expected failures
//! have been observed it opens and rejects calls without running them. After
//! `recovery_timeout` has elapsed since the last failure the next call moves
//! it to `HalfOpen` and is let through; `success_threshold` successes in a
//! row close it again, while any expected failure re-opens it.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::ErrorFilter;
use crate::core::error::{Error, Result};

/// State of a [`CircuitBreaker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls pass through.
    Closed,
    /// Calls are rejected.
    Open,
    /// Trial calls are admitted to test recovery.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => f.write_str("CLOSED"),
            Self::Open => f.write_str("OPEN"),
            Self::HalfOpen => f.write_str("HALF_OPEN"),
        }
    }
}

/// Circuit breaker settings.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Expected failures before the circuit opens.
    pub failure_threshold: u32,
    /// Time since the last failure before a trial call is allowed.
    pub recovery_timeout: Duration,
    /// Consecutive half-open successes needed to close the circuit.
    pub success_threshold: u32,
    /// Errors that count as failures; others pass through untouched.
    pub expected: ErrorFilter,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 2,
            expected: ErrorFilter::Any,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
            ..Self::default()
        }
    }

    /// Restrict which errors count as failures.
    pub fn with_expected(mut self, expected: ErrorFilter) -> Self {
        self.expected = expected;
        self
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub success_count: u32,
    /// Seconds since the last expected failure, if any.
    pub seconds_since_last_failure: Option<f64>,
}

struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
    /// Bumped on every transition into `HalfOpen`.
    epoch: u64,
}

/// Circuit breaker guarding an async operation.
///
/// All state transitions happen under a single lock that is never held
/// while the guarded operation runs.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure: None,
                epoch: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Run `operation` under the breaker.
    ///
    /// Returns [`Error::CircuitOpen`] without calling `operation` while the
    /// circuit is open. The operation's own error is returned unchanged.
    pub async fn call<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let epoch = self.admit()?;

        match operation().await {
            Ok(value) => {
                self.on_success(epoch);
                Ok(value)
            }
            Err(e) => {
                if self.config.expected.matches(&e) {
                    self.on_failure();
                } else {
                    debug!(breaker = %self.name, "Ignoring unexpected error: {}", e);
                }
                Err(e)
            }
        }
    }

    /// Decide whether a call may proceed, returning the half-open epoch it
    /// was admitted under.
    fn admit(&self) -> Result<u64> {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::Open {
            let recovered = inner
                .last_failure
                .is_none_or(|at| at.elapsed() >= self.config.recovery_timeout);
            if !recovered {
                return Err(Error::circuit_open(
                    &self.name,
                    inner.failure_count,
                    self.config.recovery_timeout,
                ));
            }
            inner.state = CircuitState::HalfOpen;
            inner.success_count = 0;
            inner.epoch += 1;
            info!(breaker = %self.name, "Circuit breaker transitioning to HALF_OPEN state");
        }
        Ok(inner.epoch)
    }

    fn on_success(&self, epoch: u64) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => inner.failure_count = 0,
            // Successes admitted before the latest re-open do not count.
            CircuitState::HalfOpen if inner.epoch == epoch => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    info!(breaker = %self.name, "Circuit breaker transitioning to CLOSED state");
                }
            }
            _ => {}
        }
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count += 1;
        inner.last_failure = Some(Instant::now());

        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.success_count = 0;
                warn!(breaker = %self.name, "Circuit breaker re-OPENED after failed trial call");
            }
            CircuitState::Closed if inner.failure_count >= self.config.failure_threshold => {
                inner.state = CircuitState::Open;
                warn!(
                    breaker = %self.name,
                    "Circuit breaker OPENED after {} failures", inner.failure_count
                );
            }
            _ => {}
        }
    }

    /// Current state report.
    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.inner.lock();
        CircuitSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            failure_threshold: self.config.failure_threshold,
            success_count: inner.success_count,
            seconds_since_last_failure: inner.last_failure.map(|at| at.elapsed().as_secs_f64()),
        }
    }

    /// Force the breaker back to `Closed`, clearing all counters.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.last_failure = None;
        info!(breaker = %self.name, "Circuit breaker reset");
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new("downstream", CircuitBreakerConfig::new(5, Duration::from_secs(60)))
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<()> {
        breaker
            .call(|| async { Err::<(), _>(Error::transport("connection refused")) })
            .await
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<u32> {
        breaker.call(|| async { Ok(7) }).await
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_recovery_cycle() {
        let breaker = breaker();

        for _ in 0..5 {
            assert!(fail(&breaker).await.is_err());
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        // Rejected without running the operation.
        let calls = AtomicUsize::new(0);
        let err = breaker
            .call(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(err.is_circuit_open());
        assert!(err.to_string().contains("'downstream' is OPEN (failed 5 times"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_secs(61)).await;

        assert_eq!(succeed(&breaker).await.unwrap(), 7);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert_eq!(succeed(&breaker).await.unwrap(), 7);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.snapshot().failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let breaker = breaker();
        for _ in 0..5 {
            let _ = fail(&breaker).await;
        }
        tokio::time::advance(Duration::from_secs(60)).await;

        assert!(succeed(&breaker).await.is_ok());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(fail(&breaker).await.is_err());
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.snapshot().success_count, 0);

        // Recovery timer restarts from the latest failure.
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(succeed(&breaker).await.is_err());
    }

    #[tokio::test]
    async fn test_success_resets_failure_count_when_closed() {
        let breaker = breaker();
        for _ in 0..4 {
            let _ = fail(&breaker).await;
        }
        assert!(succeed(&breaker).await.is_ok());
        assert_eq!(breaker.snapshot().failure_count, 0);

        for _ in 0..4 {
            let _ = fail(&breaker).await;
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_unexpected_errors_pass_through() {
        let breaker = CircuitBreaker::new(
            "downstream",
            CircuitBreakerConfig::new(1, Duration::from_secs(60))
                .with_expected(ErrorFilter::kinds([ErrorKind::Transport])),
        );

        let err = breaker
            .call(|| async { Err::<(), _>(Error::validation("bad input")) })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.snapshot().failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_half_open_success_does_not_count() {
        let breaker = Arc::new(CircuitBreaker::new(
            "downstream",
            CircuitBreakerConfig::new(1, Duration::from_secs(10)),
        ));
        let _ = fail(&breaker).await;
        tokio::time::advance(Duration::from_secs(10)).await;

        // A slow trial call admitted in the first half-open epoch.
        let slow = {
            let breaker = breaker.clone();
            tokio::spawn(async move {
                breaker
                    .call(|| async {
                        tokio::time::sleep(Duration::from_secs(30)).await;
                        Ok(())
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;

        // A concurrent trial fails and re-opens; a later one starts a new epoch.
        assert!(fail(&breaker).await.is_err());
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(succeed(&breaker).await.is_ok());
        assert_eq!(breaker.snapshot().success_count, 1);

        slow.await.unwrap().unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert_eq!(breaker.snapshot().success_count, 1);
    }

    #[tokio::test]
    async fn test_reset() {
        let breaker = CircuitBreaker::new("x", CircuitBreakerConfig::new(1, Duration::from_secs(60)));
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);
        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(succeed(&breaker).await.is_ok());
    }
}
