//! Per-request tracing.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};

use super::{Middleware, Payload, Request};
use crate::core::error::{Error, Result};
use crate::core::observability::{SpanId, Trace, Tracer};

/// Opens a trace with a root span per request and closes it when the
/// response or error comes back, adding `trace_id` to the payload.
#[derive(Debug)]
pub struct TracingMiddleware {
    tracer: Arc<Tracer>,
    in_flight: Mutex<HashMap<String, (Trace, SpanId)>>,
}

impl TracingMiddleware {
    pub fn new(tracer: Arc<Tracer>) -> Self {
        Self {
            tracer,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Traces opened but not yet finished.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    fn finish(&self, request: &Request, payload: &mut Payload, error: Option<String>) {
        let Some((mut trace, root)) = self.in_flight.lock().remove(request.id()) else {
            return;
        };
        trace.end_span(root, error);
        if trace.is_recording() {
            payload.insert("trace_id".to_string(), Value::String(trace.trace_id.clone()));
        }
        self.tracer.end_trace(trace);
    }
}

#[async_trait]
impl Middleware for TracingMiddleware {
    fn name(&self) -> &str {
        "tracing"
    }

    async fn process_request(&self, request: Request) -> Result<Request> {
        let mut attributes = Map::new();
        attributes.insert("method".to_string(), Value::String(request.method.clone()));
        attributes.insert(
            "correlation_id".to_string(),
            Value::String(request.context.correlation_id.clone()),
        );

        let mut trace = self.tracer.start_trace(Some(request.id()), attributes);
        let root = trace.start_span(format!("tool:{}", request.method), None);
        self.in_flight
            .lock()
            .insert(request.id().to_string(), (trace, root));
        Ok(request)
    }

    async fn process_response(&self, request: &Request, mut response: Payload) -> Result<Payload> {
        self.finish(request, &mut response, None);
        Ok(response)
    }

    async fn process_error(&self, request: &Request, error: &Error, mut payload: Payload) -> Payload {
        self.finish(request, &mut payload, Some(error.to_string()));
        payload
    }

    fn cancel(&self, request_id: &str) {
        let Some((mut trace, root)) = self.in_flight.lock().remove(request_id) else {
            return;
        };
        trace.end_span(root, Some("cancelled".to_string()));
        self.tracer.end_trace(trace);
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::middleware::MiddlewareChain;
    use serde_json::json;

    #[tokio::test]
    async fn test_trace_recorded_and_linked() {
        let tracer = Arc::new(Tracer::new(true));
        let tracing = TracingMiddleware::new(tracer.clone());

        let request = tracing
            .process_request(Request::new("echo", json!({})))
            .await
            .unwrap();
        let response = tracing.process_response(&request, Payload::new()).await.unwrap();

        let trace_id = response["trace_id"].as_str().unwrap();
        let trace = tracer.get_trace(trace_id).unwrap();
        assert_eq!(trace.request_id, request.id());
        assert_eq!(trace.spans[0].name, "tool:echo");
        assert!(trace.spans[0].error.is_none());
    }

    #[tokio::test]
    async fn test_error_recorded_on_root_span() {
        let tracer = Arc::new(Tracer::new(true));
        let tracing = TracingMiddleware::new(tracer.clone());
        let request = tracing
            .process_request(Request::new("fetch", json!({})))
            .await
            .unwrap();

        let err = Error::transport("unreachable");
        let payload = tracing.process_error(&request, &err, err.to_payload()).await;

        let trace = tracer.get_trace(payload["trace_id"].as_str().unwrap()).unwrap();
        assert!(trace.spans[0].error.as_deref().unwrap().contains("unreachable"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_request_closes_its_trace() {
        let tracer = Arc::new(Tracer::new(true));
        let tracing = Arc::new(TracingMiddleware::new(tracer.clone()));
        let chain = MiddlewareChain::new();
        chain.add(tracing.clone());

        let abandoned = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            chain.execute(Request::new("slow", json!({})), |_| {
                std::future::pending::<Result<Payload>>()
            }),
        )
        .await;
        assert!(abandoned.is_err());

        assert_eq!(tracing.in_flight(), 0);
        let traces = tracer.recent_traces(1);
        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].spans[0].error.as_deref(), Some("cancelled"));
    }

    #[tokio::test]
    async fn test_disabled_tracer_adds_nothing() {
        let tracing = TracingMiddleware::new(Arc::new(Tracer::new(false)));
        let request = tracing
            .process_request(Request::new("echo", json!({})))
            .await
            .unwrap();
        let response = tracing.process_response(&request, Payload::new()).await.unwrap();
        assert!(!response.contains_key("trace_id"));
    }
}
