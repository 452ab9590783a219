//! Retry with backoff.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

use super::ErrorFilter;
use crate::core::error::{Error, ErrorKind, Result};

/// Maximum extra delay added by jitter, as a fraction of the base delay.
const JITTER_FRACTION: f64 = 0.1;

/// Callback invoked before each retry sleep with the failure and the
/// zero-based attempt index that produced it.
pub type RetryCallback = Arc<dyn Fn(&Error, u32) -> anyhow::Result<()> + Send + Sync>;

/// How the delay between attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackoffStrategy {
    /// Always `initial_delay`.
    Fixed,
    /// `initial_delay * (attempt + 1)`.
    Linear,
    /// `initial_delay * multiplier^attempt`.
    #[default]
    Exponential,
}

/// Retry settings.
#[derive(Clone)]
pub struct RetryConfig {
    /// Total attempts including the first one. At least 1.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    /// Upper bound for any single delay. Never below `initial_delay`.
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
    pub multiplier: f64,
    /// Add up to 10% random extra delay (exponential strategy only).
    pub jitter: bool,
    /// Errors eligible for retry.
    pub retry_on: ErrorFilter,
    /// Errors that are never retried, even if `retry_on` matches.
    pub never_retry: ErrorFilter,
    pub on_retry: Option<RetryCallback>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            strategy: BackoffStrategy::Exponential,
            multiplier: 2.0,
            jitter: false,
            retry_on: ErrorFilter::kinds([ErrorKind::Transport, ErrorKind::Timeout, ErrorKind::Io]),
            never_retry: ErrorFilter::kinds([ErrorKind::Validation]),
            on_retry: None,
        }
    }
}

impl RetryConfig {
    /// Build a config, normalizing `max_attempts` to at least 1 and
    /// `max_delay` to at least `initial_delay`.
    pub fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            max_delay: max_delay.max(initial_delay),
            ..Self::default()
        }
    }

    pub fn with_strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_retry_on(mut self, retry_on: ErrorFilter) -> Self {
        self.retry_on = retry_on;
        self
    }

    pub fn with_never_retry(mut self, never_retry: ErrorFilter) -> Self {
        self.never_retry = never_retry;
        self
    }

    pub fn with_on_retry<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Error, u32) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_attempts", &self.max_attempts)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("strategy", &self.strategy)
            .field("multiplier", &self.multiplier)
            .field("jitter", &self.jitter)
            .field("retry_on", &self.retry_on)
            .field("never_retry", &self.never_retry)
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

/// Runs an async operation, retrying transient failures.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Delay to wait after the failed attempt with index `attempt`,
    /// without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let initial = self.config.initial_delay.as_secs_f64();
        let secs = match self.config.strategy {
            BackoffStrategy::Fixed => initial,
            BackoffStrategy::Linear => initial * f64::from(attempt + 1),
            BackoffStrategy::Exponential => {
                initial * self.config.multiplier.powi(attempt.min(i32::MAX as u32) as i32)
            }
        };
        clamp_secs(secs, self.config.max_delay)
    }

    /// Delay to wait after the failed attempt with index `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.config.jitter && self.config.strategy == BackoffStrategy::Exponential {
            let extra = base.as_secs_f64() * JITTER_FRACTION * rand::thread_rng().r#gen::<f64>();
            clamp_secs(base.as_secs_f64() + extra, self.config.max_delay)
        } else {
            base
        }
    }

    /// Whether `error`, raised by the attempt with index `attempt`, should
    /// be retried.
    pub fn should_retry(&self, error: &Error, attempt: u32) -> bool {
        attempt + 1 < self.config.max_attempts && self.is_retryable(error)
    }

    /// Open-circuit rejections are never retried, whatever the filters say.
    fn is_retryable(&self, error: &Error) -> bool {
        !error.is_circuit_open()
            && self.config.retry_on.matches(error)
            && !self.config.never_retry.matches(error)
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or the attempt budget is exhausted.
    ///
    /// Non-retryable errors, and any error when `max_attempts` is 1, are
    /// returned unchanged. Exhaustion yields a `ToolExecution` error
    /// wrapping the last failure.
    pub async fn execute<T, F, Fut>(&self, name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            let e = match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            // With a single attempt there is nothing to exhaust.
            if !self.is_retryable(&e) || max_attempts == 1 {
                return Err(e);
            }
            if attempt + 1 >= max_attempts {
                error!("Operation {} failed after {} attempts: {}", name, max_attempts, e);
                return Err(Error::tool_execution_with(
                    format!("Operation {name} failed after {max_attempts} attempts"),
                    e,
                ));
            }

            let delay = self.delay_for(attempt);
            warn!(
                "Operation {} failed (attempt {}/{}), retrying in {:.2}s: {}",
                name,
                attempt + 1,
                max_attempts,
                delay.as_secs_f64(),
                e
            );

            if let Some(callback) = &self.config.on_retry {
                if let Err(callback_error) = callback(&e, attempt) {
                    error!("Error in retry callback: {:#}", callback_error);
                }
            }

            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

fn clamp_secs(secs: f64, max: Duration) -> Duration {
    if !secs.is_finite() || secs >= max.as_secs_f64() {
        max
    } else {
        Duration::from_secs_f64(secs.max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn secs(d: Duration) -> f64 {
        d.as_secs_f64()
    }

    #[test]
    fn test_exponential_delays_are_clamped() {
        let executor = RetryExecutor::new(RetryConfig::new(
            10,
            Duration::from_secs(1),
            Duration::from_secs(30),
        ));
        let delays: Vec<f64> = (0..6).map(|i| secs(executor.delay_for(i))).collect();
        assert_eq!(delays, vec![1.0, 2.0, 4.0, 8.0, 16.0, 30.0]);
    }

    #[test]
    fn test_fixed_and_linear_delays() {
        let config = RetryConfig::new(5, Duration::from_millis(500), Duration::from_secs(2));
        let fixed = RetryExecutor::new(config.clone().with_strategy(BackoffStrategy::Fixed));
        let linear = RetryExecutor::new(config.with_strategy(BackoffStrategy::Linear));

        assert_eq!(fixed.delay_for(3), Duration::from_millis(500));
        assert_eq!(linear.delay_for(0), Duration::from_millis(500));
        assert_eq!(linear.delay_for(2), Duration::from_millis(1500));
        assert_eq!(linear.delay_for(7), Duration::from_secs(2));
    }

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        let executor = RetryExecutor::new(
            RetryConfig::new(5, Duration::from_secs(1), Duration::from_secs(60)).with_jitter(true),
        );
        for _ in 0..50 {
            let d = secs(executor.delay_for(2));
            assert!((4.0..=4.4).contains(&d), "delay {d} out of range");
        }
        let capped = RetryExecutor::new(
            RetryConfig::new(5, Duration::from_secs(1), Duration::from_secs(4)).with_jitter(true),
        );
        assert_eq!(capped.delay_for(2), Duration::from_secs(4));
    }

    #[test]
    fn test_config_normalization() {
        let config = RetryConfig::new(0, Duration::from_secs(5), Duration::from_secs(1));
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.max_delay, Duration::from_secs(5));
    }

    #[test]
    fn test_should_retry_respects_budget_and_classification() {
        let executor = RetryExecutor::default();
        let transient = Error::transport("reset");
        assert!(executor.should_retry(&transient, 0));
        assert!(executor.should_retry(&transient, 1));
        assert!(!executor.should_retry(&transient, 2));
        assert!(!executor.should_retry(&Error::validation("bad"), 0));
        assert!(!executor.should_retry(&Error::from(crate::core::pool::ResourceError::Closed), 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let executor = RetryExecutor::default();
        let attempts = AtomicU32::new(0);
        let started = Instant::now();

        let value = executor
            .execute("flaky", || async {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::transport("connection reset"))
                } else {
                    Ok("done")
                }
            })
            .await
            .unwrap();

        assert_eq!(value, "done");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        // 1s + 2s of backoff
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_wraps_last_error() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let s = seen.clone();
        let executor = RetryExecutor::new(
            RetryConfig::new(3, Duration::from_millis(10), Duration::from_secs(1))
                .with_on_retry(move |_, attempt| {
                    s.lock().push(attempt);
                    anyhow::bail!("callback failure is ignored")
                }),
        );

        let err = executor
            .execute("always_down", || async { Err::<(), _>(Error::transport("down")) })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ToolExecution);
        assert!(err.to_string().contains("failed after 3 attempts"));
        let cause = std::error::Error::source(&err).unwrap();
        assert!(cause.to_string().contains("down"));
        assert_eq!(*seen.lock(), vec![0, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_is_not_retried() {
        let executor = RetryExecutor::default();
        let attempts = AtomicU32::new(0);
        let started = Instant::now();

        let err = executor
            .execute("guarded", || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Error::circuit_open("tool:guarded", 5, Duration::from_secs(60)))
            })
            .await
            .unwrap_err();

        assert!(err.is_circuit_open());
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert!(!executor.should_retry(&err, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_attempt_returns_original_error() {
        let executor = RetryExecutor::new(RetryConfig::new(
            1,
            Duration::from_secs(1),
            Duration::from_secs(1),
        ));

        let err = executor
            .execute("once", || async { Err::<(), _>(Error::transport("reset")) })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Transport(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_propagates_immediately() {
        let executor = RetryExecutor::default();
        let attempts = AtomicU32::new(0);
        let started = Instant::now();

        let err = executor
            .execute("validate", || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Error::validation("missing field"))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }
}
