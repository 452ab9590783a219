//! Resilience primitives wrapping fallible async operations.
//!
//! - [`CircuitBreaker`]: stops calling a failing dependency for a while.
//! - [`RetryExecutor`]: re-runs transient failures with backoff.
//! - [`HandlerPipeline`]: composes timeout, retry and circuit breaker
//!   policies around a tool handler in an explicit order.

pub mod circuit_breaker;
pub mod pipeline;
pub mod retry;

use std::fmt;
use std::sync::Arc;

use super::error::{Error, ErrorKind};

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState};
pub use pipeline::{BlockingTool, HandlerPipeline, Operation, Policy};
pub use retry::{BackoffStrategy, RetryCallback, RetryConfig, RetryExecutor};

/// Selects which errors a resilience policy reacts to.
#[derive(Clone, Default)]
pub enum ErrorFilter {
    /// Every error matches.
    #[default]
    Any,
    /// Only errors of the listed kinds match.
    Kinds(Vec<ErrorKind>),
    /// Arbitrary predicate.
    Custom(Arc<dyn Fn(&Error) -> bool + Send + Sync>),
}

impl ErrorFilter {
    /// Filter matching nothing.
    pub fn none() -> Self {
        Self::Kinds(Vec::new())
    }

    /// Filter matching the given kinds.
    pub fn kinds(kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        Self::Kinds(kinds.into_iter().collect())
    }

    /// Filter backed by a predicate.
    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(&Error) -> bool + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(predicate))
    }

    pub fn matches(&self, error: &Error) -> bool {
        match self {
            Self::Any => true,
            Self::Kinds(kinds) => kinds.contains(&error.kind()),
            Self::Custom(predicate) => predicate(error),
        }
    }
}

impl fmt::Debug for ErrorFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("Any"),
            Self::Kinds(kinds) => f.debug_tuple("Kinds").field(kinds).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}
