//! Middleware applied uniformly to every tool call.
//!
//! A [`MiddlewareChain`] runs each unit's request hook in registration
//! order, then the handler, then response hooks in reverse order. Any
//! failure is turned into a structured error payload by running the error
//! hooks in reverse order.
//!
//! ## Units
//!
//! - [`RateLimitMiddleware`] - sliding-window request limiting
//! - [`TimingMiddleware`] - adds `timing.elapsed_seconds` to payloads
//! - [`ValidationMiddleware`] - per-method argument validators
//! - [`MetricsMiddleware`] - reports calls to the metrics collector
//! - [`TracingMiddleware`] - one trace per request, adds `trace_id`

mod chain;
mod metrics;
mod rate_limit;
mod timing;
mod trace;
mod validation;

use async_trait::async_trait;
use serde_json::Value;

use super::context::RequestContext;
use super::error::{Error, Result};

pub use chain::MiddlewareChain;
pub use metrics::MetricsMiddleware;
pub use rate_limit::{RateLimitConfig, RateLimitMiddleware};
pub use timing::TimingMiddleware;
pub use trace::TracingMiddleware;
pub use validation::{ValidationMiddleware, Validator, required_fields};

/// Response and error payloads exchanged with callers.
pub type Payload = serde_json::Map<String, Value>;

/// An inbound tool call.
#[derive(Debug, Clone)]
pub struct Request {
    pub context: RequestContext,
    /// Name of the tool being called.
    pub method: String,
    pub arguments: Value,
}

impl Request {
    pub fn new(method: impl Into<String>, arguments: Value) -> Self {
        Self {
            context: RequestContext::new(),
            method: method.into(),
            arguments,
        }
    }

    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    /// Request identifier.
    pub fn id(&self) -> &str {
        &self.context.request_id
    }
}

/// A unit of cross-cutting request processing.
///
/// Every hook has a pass-through default so units only implement the
/// phases they care about. Units keep their own mutable state behind
/// interior locks; the chain shares them across concurrent requests.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Inspect or rewrite a request. Returning an error rejects it.
    async fn process_request(&self, request: Request) -> Result<Request> {
        Ok(request)
    }

    /// Inspect or annotate a successful response.
    async fn process_response(&self, _request: &Request, response: Payload) -> Result<Payload> {
        Ok(response)
    }

    /// Annotate the error payload built so far. Cannot fail.
    async fn process_error(&self, _request: &Request, _error: &Error, payload: Payload) -> Payload {
        payload
    }

    /// Called when a request's future is dropped before its response or
    /// error hooks completed. Units holding per-request state release it here.
    fn cancel(&self, _request_id: &str) {}
}
