//! Request traces with nested spans.
//!
//! Spans are stored flat inside their [`Trace`] and refer to their parent
//! by [`SpanId`], so callers pass parents explicitly instead of relying on
//! ambient task state.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

/// Default number of finished traces kept in memory.
pub const DEFAULT_MAX_TRACES: usize = 1000;

/// Index of a span within its trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SpanId(usize);

/// A timed unit of work inside a trace.
#[derive(Debug, Clone, Serialize)]
pub struct Span {
    pub id: SpanId,
    pub parent: Option<SpanId>,
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub attributes: Map<String, Value>,
    pub error: Option<String>,
    #[serde(skip)]
    started: Instant,
}

/// A request trace.
#[derive(Debug, Clone, Serialize)]
pub struct Trace {
    /// Empty when the tracer was disabled at creation.
    pub trace_id: String,
    pub request_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub attributes: Map<String, Value>,
    pub spans: Vec<Span>,
    #[serde(skip)]
    started: Instant,
}

impl Trace {
    fn new(trace_id: String, request_id: String, attributes: Map<String, Value>) -> Self {
        Self {
            trace_id,
            request_id,
            started_at: Utc::now(),
            ended_at: None,
            duration_seconds: None,
            attributes,
            spans: Vec::new(),
            started: Instant::now(),
        }
    }

    /// Whether this trace is recorded.
    pub fn is_recording(&self) -> bool {
        !self.trace_id.is_empty()
    }

    /// Open a span. `parent` of `None` makes it a root span.
    pub fn start_span(&mut self, name: impl Into<String>, parent: Option<SpanId>) -> SpanId {
        let id = SpanId(self.spans.len());
        let name = name.into();
        debug!("Started span '{}'", name);
        self.spans.push(Span {
            id,
            parent,
            name,
            started_at: Utc::now(),
            ended_at: None,
            duration_seconds: None,
            attributes: Map::new(),
            error: None,
            started: Instant::now(),
        });
        id
    }

    /// Close a span, optionally recording an error. Closing twice is a no-op.
    pub fn end_span(&mut self, id: SpanId, error: Option<String>) {
        let Some(span) = self.spans.get_mut(id.0) else {
            return;
        };
        if span.ended_at.is_some() {
            return;
        }
        let duration = span.started.elapsed().as_secs_f64();
        span.ended_at = Some(Utc::now());
        span.duration_seconds = Some(duration);
        match &error {
            Some(e) => debug!("Ended span '{}' ({:.3}s) with error: {}", span.name, duration, e),
            None => debug!("Ended span '{}' ({:.3}s)", span.name, duration),
        }
        span.error = error;
    }

    /// Attach an attribute to a span.
    pub fn set_span_attribute(&mut self, id: SpanId, key: impl Into<String>, value: Value) {
        if let Some(span) = self.spans.get_mut(id.0) {
            span.attributes.insert(key.into(), value);
        }
    }

    pub fn span(&self, id: SpanId) -> Option<&Span> {
        self.spans.get(id.0)
    }

    /// Direct children of a span, in creation order.
    pub fn children(&self, id: SpanId) -> impl Iterator<Item = &Span> {
        self.spans.iter().filter(move |s| s.parent == Some(id))
    }

    pub fn root_spans(&self) -> impl Iterator<Item = &Span> {
        self.spans.iter().filter(|s| s.parent.is_none())
    }
}

/// Creates traces and keeps the most recent finished ones.
pub struct Tracer {
    enabled: AtomicBool,
    max_traces: usize,
    traces: Mutex<VecDeque<Trace>>,
}

impl Default for Tracer {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Tracer {
    pub fn new(enabled: bool) -> Self {
        Self::with_capacity(enabled, DEFAULT_MAX_TRACES)
    }

    pub fn with_capacity(enabled: bool, max_traces: usize) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            max_traces: max_traces.max(1),
            traces: Mutex::new(VecDeque::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Begin a trace. A short request id is generated when none is given.
    ///
    /// While disabled this returns a non-recording trace with an empty id.
    pub fn start_trace(&self, request_id: Option<&str>, attributes: Map<String, Value>) -> Trace {
        let request_id = request_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string()[..8].to_string());

        if !self.is_enabled() {
            return Trace::new(String::new(), request_id, Map::new());
        }

        let trace_id = Uuid::new_v4().to_string();
        debug!("Started trace {} for request {}", trace_id, request_id);
        Trace::new(trace_id, request_id, attributes)
    }

    /// Finish a trace and store it, evicting the oldest beyond capacity.
    pub fn end_trace(&self, mut trace: Trace) {
        if !trace.is_recording() {
            return;
        }
        let duration = trace.started.elapsed().as_secs_f64();
        trace.ended_at = Some(Utc::now());
        trace.duration_seconds = Some(duration);
        debug!("Ended trace {} (duration: {:.3}s)", trace.trace_id, duration);

        let mut traces = self.traces.lock();
        traces.push_back(trace);
        while traces.len() > self.max_traces {
            traces.pop_front();
        }
    }

    pub fn get_trace(&self, trace_id: &str) -> Option<Trace> {
        self.traces
            .lock()
            .iter()
            .find(|t| t.trace_id == trace_id)
            .cloned()
    }

    /// Up to `limit` most recent traces, newest last.
    pub fn recent_traces(&self, limit: usize) -> Vec<Trace> {
        let traces = self.traces.lock();
        let skip = traces.len().saturating_sub(limit);
        traces.iter().skip(skip).cloned().collect()
    }

    pub fn clear(&self) {
        self.traces.lock().clear();
    }
}

impl std::fmt::Debug for Tracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracer")
            .field("enabled", &self.is_enabled())
            .field("max_traces", &self.max_traces)
            .field("stored", &self.traces.lock().len())
            .finish()
    }
}
