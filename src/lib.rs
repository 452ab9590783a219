//! Toolrack MCP Server Library
//!
//! This crate provides the request-processing core of a Model Context
//! Protocol (MCP) tool server, with a modular architecture organized by
//! domains.
//!
//! # Architecture
//!
//! - **core**: Infrastructure shared by every tool call
//!   - middleware chain (rate limiting, timing, validation, metrics, tracing)
//!   - lifecycle manager with priority-ordered startup/shutdown hooks
//!   - resource pools and the resource manager
//!   - circuit breaker, retry with backoff, and the handler pipeline
//! - **domains**: Business logic organized by bounded contexts
//!   - **tools**: MCP tools that can be executed by clients
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use toolrack_mcp_server::core::{
//!     Config, LifecycleManager, McpServer, MetricsCollector, ResourceManager, Tracer,
//! };
//! use toolrack_mcp_server::domains::tools::definitions::EchoTool;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env();
//!     let tracer = Arc::new(Tracer::new(config.monitoring.tracing_enabled));
//!     let server = McpServer::new(
//!         config,
//!         Arc::new(ResourceManager::new()),
//!         Arc::new(MetricsCollector::new()),
//!         tracer,
//!     );
//!     server.register_tool(Arc::new(EchoTool))?;
//!
//!     let lifecycle = LifecycleManager::new();
//!     server.register_lifecycle_hooks(&lifecycle);
//!     lifecycle.startup().await;
//!
//!     let response = server.call_tool("echo", serde_json::json!({"message": "hi"})).await;
//!     println!("{}", serde_json::Value::Object(response));
//!
//!     lifecycle.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod core;
pub mod domains;

// Re-export commonly used types for convenience
pub use core::{Config, Error, McpServer, Result};
