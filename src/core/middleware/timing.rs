//! Request timing.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::time::Instant;

use super::{Middleware, Payload, Request};
use crate::core::error::{Error, Result};

/// Adds `timing: {elapsed_seconds}` to responses and error payloads,
/// measured from when the request passed this unit.
#[derive(Debug, Default)]
pub struct TimingMiddleware {
    started: Mutex<HashMap<String, Instant>>,
}

impl TimingMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    fn annotate(&self, request: &Request, payload: &mut Payload) {
        if let Some(started) = self.started.lock().remove(request.id()) {
            payload.insert(
                "timing".to_string(),
                json!({ "elapsed_seconds": started.elapsed().as_secs_f64() }),
            );
        }
    }

    /// Requests currently being timed.
    pub fn in_flight(&self) -> usize {
        self.started.lock().len()
    }
}

#[async_trait]
impl Middleware for TimingMiddleware {
    fn name(&self) -> &str {
        "timing"
    }

    async fn process_request(&self, request: Request) -> Result<Request> {
        self.started
            .lock()
            .insert(request.id().to_string(), Instant::now());
        Ok(request)
    }

    async fn process_response(&self, request: &Request, mut response: Payload) -> Result<Payload> {
        self.annotate(request, &mut response);
        Ok(response)
    }

    async fn process_error(&self, request: &Request, _error: &Error, mut payload: Payload) -> Payload {
        self.annotate(request, &mut payload);
        payload
    }

    fn cancel(&self, request_id: &str) {
        self.started.lock().remove(request_id);
    }
}

/// Elapsed seconds recorded by [`TimingMiddleware`], if present.
pub(super) fn elapsed_seconds(payload: &Payload) -> Option<f64> {
    payload
        .get("timing")
        .and_then(|t| t.get("elapsed_seconds"))
        .and_then(Value::as_f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::middleware::{MetricsMiddleware, MiddlewareChain};
    use crate::core::observability::MetricsCollector;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_timing_added_to_response() {
        let timing = TimingMiddleware::new();
        let request = timing
            .process_request(Request::new("echo", json!({})))
            .await
            .unwrap();
        assert_eq!(timing.in_flight(), 1);

        tokio::time::advance(Duration::from_millis(250)).await;
        let response = timing.process_response(&request, Payload::new()).await.unwrap();
        assert_eq!(elapsed_seconds(&response), Some(0.25));
        assert_eq!(timing.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timing_added_to_error_payload() {
        let timing = TimingMiddleware::new();
        let request = timing
            .process_request(Request::new("echo", json!({})))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;

        let err = Error::transport("down");
        let payload = timing.process_error(&request, &err, err.to_payload()).await;
        assert_eq!(elapsed_seconds(&payload), Some(1.0));
        assert_eq!(payload["success"], false);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_requests_are_forgotten() {
        let timing = Arc::new(TimingMiddleware::new());
        let chain = MiddlewareChain::new();
        chain.add(timing.clone());

        for _ in 0..10 {
            let abandoned = tokio::time::timeout(
                Duration::from_millis(100),
                chain.execute(Request::new("slow", json!({})), |_| {
                    std::future::pending::<Result<Payload>>()
                }),
            )
            .await;
            assert!(abandoned.is_err());
        }

        assert_eq!(timing.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timing_survives_reverse_pass_to_metrics() {
        let metrics = Arc::new(MetricsCollector::new());
        let chain = MiddlewareChain::new();
        chain.add(Arc::new(MetricsMiddleware::new(metrics.clone())));
        chain.add(Arc::new(TimingMiddleware::new()));

        let response = chain
            .execute(Request::new("echo", json!({})), |_| async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(Payload::new())
            })
            .await;

        assert_eq!(elapsed_seconds(&response), Some(0.5));
        let stats = metrics.get_tool_metrics("echo").unwrap();
        assert_eq!(stats.call_count, 1);
        assert_eq!(stats.avg_latency, Some(0.5));
    }
}
