//! Core module containing shared infrastructure components.
//!
//! This module provides the foundational building blocks for the MCP server:
//! configuration, error handling, the middleware chain, lifecycle
//! management, resource pools, resilience policies and observability.

pub mod config;
pub mod context;
pub mod error;
pub mod lifecycle;
pub mod middleware;
pub mod observability;
pub mod pool;
pub mod resilience;
pub mod server;

pub use config::Config;
pub use context::{RequestContext, ServerContext, ToolContext};
pub use error::{Error, ErrorKind, Result};
pub use lifecycle::{HookAction, LifecycleManager};
pub use middleware::{Middleware, MiddlewareChain, Payload, Request};
pub use observability::{MetricsCollector, Tracer};
pub use pool::{ResourceManager, ResourcePool};
pub use resilience::{CircuitBreaker, HandlerPipeline, RetryExecutor};
pub use server::McpServer;
