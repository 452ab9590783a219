//! Ordered middleware chain.

use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use super::{Middleware, Payload, Request};
use crate::core::error::{Error, Result};

/// Tells every unit about a request whose future was dropped mid-flight.
struct CancelGuard {
    middlewares: Vec<Arc<dyn Middleware>>,
    request_id: String,
    armed: bool,
}

impl CancelGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        debug!("Request {} cancelled", self.request_id);
        for middleware in &self.middlewares {
            middleware.cancel(&self.request_id);
        }
    }
}

/// Ordered list of middleware units.
#[derive(Default)]
pub struct MiddlewareChain {
    middlewares: RwLock<Vec<Arc<dyn Middleware>>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a unit. Request hooks run in the order units were added.
    pub fn add(&self, middleware: Arc<dyn Middleware>) {
        debug!("Added middleware: {}", middleware.name());
        self.middlewares.write().push(middleware);
    }

    pub fn len(&self) -> usize {
        self.middlewares.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.read().is_empty()
    }

    /// Names of the units in registration order.
    pub fn names(&self) -> Vec<String> {
        self.snapshot().iter().map(|m| m.name().to_string()).collect()
    }

    fn snapshot(&self) -> Vec<Arc<dyn Middleware>> {
        self.middlewares.read().clone()
    }

    /// Run request hooks in registration order. The first rejection stops
    /// the chain.
    pub async fn process_request(&self, mut request: Request) -> Result<Request> {
        for middleware in self.snapshot() {
            match middleware.process_request(request).await {
                Ok(next) => request = next,
                Err(e) => {
                    debug!("Request rejected by {}: {}", middleware.name(), e);
                    return Err(e);
                }
            }
        }
        Ok(request)
    }

    /// Run response hooks in reverse registration order.
    pub async fn process_response(&self, request: &Request, mut response: Payload) -> Result<Payload> {
        for middleware in self.snapshot().iter().rev() {
            response = middleware.process_response(request, response).await?;
        }
        Ok(response)
    }

    /// Build the error payload and pass it through every error hook in
    /// reverse registration order.
    pub async fn process_error(&self, request: &Request, error: &Error) -> Payload {
        let mut payload = error.to_payload();
        for middleware in self.snapshot().iter().rev() {
            payload = middleware.process_error(request, error, payload).await;
        }
        payload
    }

    /// Run a full request through the chain and `handler`.
    ///
    /// Never fails: every error, whether from a middleware or the handler,
    /// comes back as a `success: false` payload. Dropping the returned future
    /// before it completes calls [`Middleware::cancel`] on every unit.
    pub async fn execute<F, Fut>(&self, request: Request, handler: F) -> Payload
    where
        F: FnOnce(Request) -> Fut,
        Fut: Future<Output = Result<Payload>>,
    {
        let guard = CancelGuard {
            middlewares: self.snapshot(),
            request_id: request.id().to_string(),
            armed: true,
        };
        let payload = self.run(request, handler).await;
        guard.disarm();
        payload
    }

    async fn run<F, Fut>(&self, request: Request, handler: F) -> Payload
    where
        F: FnOnce(Request) -> Fut,
        Fut: Future<Output = Result<Payload>>,
    {
        let original = request.clone();
        let request = match self.process_request(request).await {
            Ok(request) => request,
            Err(e) => return self.process_error(&original, &e).await,
        };

        let result = match handler(request.clone()).await {
            Ok(response) => self.process_response(&request, response).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(response) => response,
            Err(e) => {
                warn!("Request {} for '{}' failed: {}", request.id(), request.method, e);
                self.process_error(&request, &e).await
            }
        }
    }
}

impl std::fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareChain")
            .field("middlewares", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{Value, json};

    /// Records every hook invocation into a shared log.
    struct Recorder {
        name: String,
        log: Arc<Mutex<Vec<String>>>,
        reject: bool,
    }

    impl Recorder {
        fn new(name: &str, log: &Arc<Mutex<Vec<String>>>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                log: log.clone(),
                reject: false,
            })
        }

        fn rejecting(name: &str, log: &Arc<Mutex<Vec<String>>>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                log: log.clone(),
                reject: true,
            })
        }
    }

    #[async_trait]
    impl Middleware for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        async fn process_request(&self, request: Request) -> Result<Request> {
            self.log.lock().push(format!("req:{}", self.name));
            if self.reject {
                return Err(Error::validation(format!("{} says no", self.name)));
            }
            Ok(request)
        }

        async fn process_response(&self, _request: &Request, mut response: Payload) -> Result<Payload> {
            self.log.lock().push(format!("resp:{}", self.name));
            response.insert(format!("seen_by_{}", self.name), Value::Bool(true));
            Ok(response)
        }

        async fn process_error(&self, _request: &Request, _error: &Error, mut payload: Payload) -> Payload {
            self.log.lock().push(format!("err:{}", self.name));
            payload.insert(format!("seen_by_{}", self.name), Value::Bool(true));
            payload
        }

        fn cancel(&self, request_id: &str) {
            self.log.lock().push(format!("cancel:{}:{}", self.name, request_id));
        }
    }

    fn ok_payload() -> Payload {
        let mut payload = Payload::new();
        payload.insert("success".into(), Value::Bool(true));
        payload
    }

    #[tokio::test]
    async fn test_reverse_visiting_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = MiddlewareChain::new();
        chain.add(Recorder::new("a", &log));
        chain.add(Recorder::new("b", &log));
        chain.add(Recorder::new("c", &log));

        let response = chain
            .execute(Request::new("echo", json!({})), |_| async { Ok(ok_payload()) })
            .await;

        assert_eq!(
            *log.lock(),
            vec!["req:a", "req:b", "req:c", "resp:c", "resp:b", "resp:a"]
        );
        assert_eq!(response["success"], true);
        assert_eq!(response["seen_by_a"], true);
        assert_eq!(chain.names(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_rejection_stops_request_phase_and_skips_handler() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = MiddlewareChain::new();
        chain.add(Recorder::new("a", &log));
        chain.add(Recorder::rejecting("b", &log));
        chain.add(Recorder::new("c", &log));

        let mut handler_ran = false;
        let payload = chain
            .execute(Request::new("echo", json!({})), |_| {
                handler_ran = true;
                async { Ok(ok_payload()) }
            })
            .await;

        assert!(!handler_ran);
        assert_eq!(*log.lock(), vec!["req:a", "req:b", "err:c", "err:b", "err:a"]);
        assert_eq!(payload["success"], false);
        assert_eq!(payload["error_kind"], "validation");
        assert!(payload["error"].as_str().unwrap().contains("b says no"));
        // Every error hook sees the payload built so far.
        for unit in ["a", "b", "c"] {
            assert_eq!(payload[&format!("seen_by_{unit}")], true);
        }
    }

    #[tokio::test]
    async fn test_handler_error_becomes_payload() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = MiddlewareChain::new();
        chain.add(Recorder::new("a", &log));

        let payload = chain
            .execute(Request::new("fetch", json!({})), |_| async {
                Err(Error::transport("upstream closed the connection"))
            })
            .await;

        assert_eq!(*log.lock(), vec!["req:a", "err:a"]);
        assert_eq!(payload["success"], false);
        assert_eq!(payload["error_kind"], "transport");
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_request_notifies_every_unit() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = MiddlewareChain::new();
        chain.add(Recorder::new("a", &log));
        chain.add(Recorder::new("b", &log));

        let request = Request::new("fetch", json!({}));
        let id = request.id().to_string();
        let abandoned = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            chain.execute(request, |_| std::future::pending::<Result<Payload>>()),
        )
        .await;

        assert!(abandoned.is_err());
        assert_eq!(
            *log.lock(),
            vec![
                "req:a".to_string(),
                "req:b".to_string(),
                format!("cancel:a:{id}"),
                format!("cancel:b:{id}"),
            ]
        );

        // A completed request is never reported as cancelled.
        log.lock().clear();
        chain
            .execute(Request::new("echo", json!({})), |_| async { Ok(ok_payload()) })
            .await;
        assert!(log.lock().iter().all(|entry| !entry.starts_with("cancel")));
    }

    #[tokio::test]
    async fn test_empty_chain_passes_through() {
        let chain = MiddlewareChain::new();
        assert!(chain.is_empty());
        let payload = chain
            .execute(Request::new("echo", json!({"x": 1})), |req| async move {
                let mut p = ok_payload();
                p.insert("echo".into(), req.arguments);
                Ok(p)
            })
            .await;
        assert_eq!(payload["echo"]["x"], 1);
    }
}
