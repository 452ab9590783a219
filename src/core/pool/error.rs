//! Resource-pool error types.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while managing pooled resources.
#[derive(Debug, Error)]
pub enum ResourceError {
    /// The pool was closed; no resource can be handed out.
    #[error("Pool is closed")]
    Closed,

    /// No resource became available before the acquire timeout elapsed.
    #[error("Pool exhausted: no resource available after {}s (max size: {max_size})", .waited.as_secs_f64())]
    Exhausted { waited: Duration, max_size: usize },

    /// The resource factory failed.
    #[error("Failed to create resource: {0}")]
    Factory(String),

    /// The requested pool was not found.
    #[error("Pool '{0}' not found")]
    NotFound(String),

    /// A pool with the same name was already registered.
    #[error("Pool '{0}' already registered")]
    AlreadyRegistered(String),

    /// One or more cleanup calls failed while closing the pool.
    #[error("Failed to clean up {failed} of {total} resources")]
    Cleanup { failed: usize, total: usize },

    /// The pool exists but holds a different resource type.
    #[error("Pool '{0}' holds a different resource type")]
    TypeMismatch(String),
}

impl ResourceError {
    /// Create a new "factory" error.
    pub fn factory(msg: impl Into<String>) -> Self {
        Self::Factory(msg.into())
    }

    /// Create a new "not found" error.
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound(name.into())
    }

    /// Whether this error reports pool exhaustion.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}
