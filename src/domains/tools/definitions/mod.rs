//! Tool definitions module.
//!
//! This module exports all available tool definitions.
//! Each tool is defined in its own file for better maintainability.

mod echo;
mod server_metrics;

pub use echo::{EchoParams, EchoTool};
pub use server_metrics::{ServerMetricsParams, ServerMetricsTool};
