//! Error types and handling for the MCP server.
//!
//! This module defines a unified error type that can represent errors from
//! every part of the request pipeline, providing consistent error handling
//! and a single conversion point into structured error payloads.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use super::middleware::Payload;
use super::pool::ResourceError;
use crate::domains::tools::ToolError;

/// A specialized Result type for MCP server operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the MCP server.
///
/// This enum captures all possible error conditions that can occur while a
/// tool call travels through the middleware chain, the handler pipeline and
/// the resource pools.
#[derive(Debug, Error)]
pub enum Error {
    /// Caller-supplied data was rejected. Never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A resource pool was exhausted, closed or misused.
    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    /// Handler-level failure wrapping an underlying cause.
    ///
    /// Raised by the retry executor once every attempt has failed.
    #[error("Tool execution failed: {message}")]
    ToolExecution {
        message: String,
        #[source]
        source: Option<Box<Error>>,
    },

    /// A downstream dependency is unreachable.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A circuit breaker rejected the call without running it.
    ///
    /// Classified as `Transport`, but never retried.
    #[error(
        "Circuit breaker '{breaker}' is OPEN (failed {failures} times, waiting {}s before retry)",
        .recovery_timeout.as_secs_f64()
    )]
    CircuitOpen {
        breaker: String,
        failures: u32,
        recovery_timeout: Duration,
    },

    /// The rate limiter rejected the request.
    #[error("Rate limit exceeded: {count} requests in the last {window_seconds}s (limit: {limit})")]
    RateLimitExceeded {
        count: usize,
        limit: usize,
        window_seconds: f64,
    },

    /// An operation did not complete within its deadline.
    #[error("Operation '{operation}' timed out after {}s", .after.as_secs_f64())]
    Timeout { operation: String, after: Duration },

    /// Error originating from the tools domain.
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors from file operations or network communication.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal server errors that should not occur under normal operation.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of an [`Error`], used by retry and circuit breaker
/// policies and reported in error payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Resource,
    ToolExecution,
    Transport,
    RateLimit,
    Timeout,
    Tool,
    Config,
    Io,
    Json,
    Internal,
}

impl ErrorKind {
    /// Stable snake_case name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Resource => "resource",
            Self::ToolExecution => "tool_execution",
            Self::Transport => "transport",
            Self::RateLimit => "rate_limit",
            Self::Timeout => "timeout",
            Self::Tool => "tool",
            Self::Config => "config",
            Self::Io => "io",
            Self::Json => "json",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Create a new validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create an open-circuit rejection.
    pub fn circuit_open(breaker: impl Into<String>, failures: u32, recovery_timeout: Duration) -> Self {
        Self::CircuitOpen {
            breaker: breaker.into(),
            failures,
            recovery_timeout,
        }
    }

    /// True for rejections by an open circuit breaker.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// Create a tool execution error without an underlying cause.
    pub fn tool_execution(msg: impl Into<String>) -> Self {
        Self::ToolExecution {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a tool execution error wrapping `cause`.
    pub fn tool_execution_with(msg: impl Into<String>, cause: Error) -> Self {
        Self::ToolExecution {
            message: msg.into(),
            source: Some(Box::new(cause)),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// Create a new configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Resource(_) => ErrorKind::Resource,
            Self::ToolExecution { .. } => ErrorKind::ToolExecution,
            Self::Transport(_) | Self::CircuitOpen { .. } => ErrorKind::Transport,
            Self::RateLimitExceeded { .. } => ErrorKind::RateLimit,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Tool(ToolError::InvalidArguments(_)) => ErrorKind::Validation,
            Self::Tool(_) => ErrorKind::Tool,
            Self::Config(_) => ErrorKind::Config,
            Self::Io(_) => ErrorKind::Io,
            Self::Json(_) => ErrorKind::Json,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Build the base structured error payload for this error.
    ///
    /// The payload always carries `success: false`, a human-readable `error`
    /// message and the `error_kind`; middleware may add further fields.
    pub fn to_payload(&self) -> Payload {
        let mut payload = Payload::new();
        payload.insert("success".to_string(), Value::Bool(false));
        payload.insert("error".to_string(), Value::String(self.to_string()));
        payload.insert(
            "error_kind".to_string(),
            Value::String(self.kind().as_str().to_string()),
        );
        if let Self::ToolExecution {
            source: Some(cause),
            ..
        } = self
        {
            payload.insert("cause".to_string(), Value::String(cause.to_string()));
        }
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(Error::validation("bad").kind(), ErrorKind::Validation);
        assert_eq!(Error::transport("down").kind(), ErrorKind::Transport);
        assert_eq!(
            Error::from(ToolError::invalid_arguments("x")).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            Error::from(ToolError::unknown("x")).kind(),
            ErrorKind::Tool
        );
        assert_eq!(
            Error::from(ResourceError::Closed).kind(),
            ErrorKind::Resource
        );
    }

    #[test]
    fn test_payload_shape() {
        let payload = Error::validation("name is required").to_payload();
        assert_eq!(payload["success"], Value::Bool(false));
        assert_eq!(payload["error_kind"], "validation");
        assert!(
            payload["error"]
                .as_str()
                .unwrap()
                .contains("name is required")
        );
    }

    #[test]
    fn test_tool_execution_payload_carries_cause() {
        let err = Error::tool_execution_with("fetch failed after 3 attempts", Error::transport("reset"));
        let payload = err.to_payload();
        assert_eq!(payload["error_kind"], "tool_execution");
        assert!(payload["cause"].as_str().unwrap().contains("reset"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_circuit_open_is_transport() {
        let err = Error::circuit_open("tool:fetch", 5, Duration::from_secs(60));
        assert!(err.is_circuit_open());
        assert!(!Error::transport("down").is_circuit_open());
        assert_eq!(err.to_payload()["error_kind"], "transport");
        assert_eq!(
            err.to_string(),
            "Circuit breaker 'tool:fetch' is OPEN (failed 5 times, waiting 60s before retry)"
        );
    }

    #[test]
    fn test_timeout_message() {
        let err = Error::timeout("echo", Duration::from_millis(1500));
        assert_eq!(err.to_string(), "Operation 'echo' timed out after 1.5s");
    }
}
