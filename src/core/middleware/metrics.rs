//! Reports tool calls to the metrics collector.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::timing::elapsed_seconds;
use super::{Middleware, Payload, Request};
use crate::core::error::{Error, Result};
use crate::core::observability::MetricsCollector;

/// Records each call with its latency and outcome.
///
/// Latency comes from the `timing` entry when an inner
/// [`TimingMiddleware`](super::TimingMiddleware) added one, and from the
/// request's own start instant otherwise.
#[derive(Debug)]
pub struct MetricsMiddleware {
    collector: Arc<MetricsCollector>,
}

impl MetricsMiddleware {
    pub fn new(collector: Arc<MetricsCollector>) -> Self {
        Self { collector }
    }

    fn latency(request: &Request, payload: &Payload) -> Duration {
        elapsed_seconds(payload)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .unwrap_or_else(|| request.context.elapsed())
    }
}

#[async_trait]
impl Middleware for MetricsMiddleware {
    fn name(&self) -> &str {
        "metrics"
    }

    async fn process_response(&self, request: &Request, response: Payload) -> Result<Payload> {
        self.collector
            .record_tool_call(&request.method, Self::latency(request, &response), false);
        Ok(response)
    }

    async fn process_error(&self, request: &Request, _error: &Error, payload: Payload) -> Payload {
        self.collector
            .record_tool_call(&request.method, Self::latency(request, &payload), true);
        payload
    }
}
