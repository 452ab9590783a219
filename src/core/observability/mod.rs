//! In-process metrics and request tracing.

pub mod metrics;
pub mod tracer;

pub use metrics::{MetricsCollector, MetricsReport, ServerHealth, ToolStats};
pub use tracer::{Span, SpanId, Trace, Tracer};
