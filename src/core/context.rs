//! Explicit context objects threaded through a tool call.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::time::Instant;
use uuid::Uuid;

use super::pool::ResourceManager;

/// Generate a short request identifier.
pub fn new_request_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Process-wide server identity.
#[derive(Debug, Clone)]
pub struct ServerContext {
    pub name: String,
    pub version: String,
    pub started_at: DateTime<Utc>,
    started: Instant,
}

impl ServerContext {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Per-request data carried through the middleware chain.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub correlation_id: String,
    pub user_id: Option<String>,
    pub metadata: Map<String, Value>,
    pub started: Instant,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestContext {
    /// New context with generated ids; the correlation id defaults to the
    /// request id.
    pub fn new() -> Self {
        let request_id = new_request_id();
        Self {
            correlation_id: request_id.clone(),
            request_id,
            user_id: None,
            metadata: Map::new(),
            started: Instant::now(),
        }
    }

    /// Replace the request id. A correlation id that was still defaulted
    /// to the old request id follows it.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        let request_id = request_id.into();
        if self.correlation_id == self.request_id {
            self.correlation_id = request_id.clone();
        }
        self.request_id = request_id;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Data handed to a tool handler.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub tool_name: String,
    pub request_id: String,
    pub correlation_id: String,
    pub started: Instant,
    /// Pools the handler may draw resources from.
    pub resources: Arc<ResourceManager>,
}

impl ToolContext {
    pub fn new(tool_name: impl Into<String>, request: &RequestContext, resources: Arc<ResourceManager>) -> Self {
        Self {
            tool_name: tool_name.into(),
            request_id: request.request_id.clone(),
            correlation_id: request.correlation_id.clone(),
            started: Instant::now(),
            resources,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}
