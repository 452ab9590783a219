//! MCP Server implementation.
//!
//! The server owns the tool registry and routes every tool call through the
//! middleware chain and a per-tool handler pipeline.
//!
//! ## Request Flow
//!
//! 1. `call_tool` builds a [`Request`] with a fresh request context
//! 2. The [`MiddlewareChain`] runs its request hooks (rate limit, validation, ...)
//! 3. The tool's [`HandlerPipeline`] runs the handler under retry, circuit
//!    breaker and timeout
//! 4. Response hooks run in reverse order; failures become error payloads
//!
//! Shared services (resource pools, metrics, tracer) are created by the
//! caller and injected, so tests can build isolated servers.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{info, warn};

use super::config::Config;
use super::context::{RequestContext, ServerContext, ToolContext};
use super::error::{Error, Result};
use super::lifecycle::LifecycleManager;
use super::middleware::{
    MetricsMiddleware, Middleware, MiddlewareChain, Payload, RateLimitMiddleware, Request,
    TimingMiddleware, TracingMiddleware, ValidationMiddleware, required_fields,
};
use super::observability::{MetricsCollector, Tracer};
use super::pool::{ResourceManager, ResourcePool};
use super::resilience::{CircuitBreaker, HandlerPipeline, RetryExecutor};
use crate::domains::tools::{ToolError, ToolHandler, ToolInfo, ToolOutput, ToolRegistry};

/// Lifecycle priority of the resource pool hooks.
pub const RESOURCE_POOLS_PRIORITY: i32 = 20;

/// Lifecycle priority of the metrics hooks.
pub const METRICS_PRIORITY: i32 = 30;

/// The main MCP server.
pub struct McpServer {
    /// Server configuration.
    config: Arc<Config>,
    context: ServerContext,

    tools: ToolRegistry,
    /// One breaker per tool, so a failing tool does not block the others.
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    retry: RetryExecutor,

    chain: MiddlewareChain,
    validation: Option<Arc<ValidationMiddleware>>,

    resources: Arc<ResourceManager>,
    metrics: Arc<MetricsCollector>,
    tracer: Arc<Tracer>,
}

impl McpServer {
    /// Create a new MCP server with the given configuration and services.
    ///
    /// The middleware chain is assembled from `config.middleware` and
    /// `config.monitoring` in this order: metrics, tracing, timing, rate
    /// limit, validation.
    pub fn new(
        config: Config,
        resources: Arc<ResourceManager>,
        metrics: Arc<MetricsCollector>,
        tracer: Arc<Tracer>,
    ) -> Self {
        let config = Arc::new(config);
        let chain = MiddlewareChain::new();

        if config.monitoring.metrics_enabled {
            chain.add(Arc::new(MetricsMiddleware::new(metrics.clone())));
        }
        if config.monitoring.tracing_enabled {
            chain.add(Arc::new(TracingMiddleware::new(tracer.clone())));
        }
        chain.add(Arc::new(TimingMiddleware::new()));
        if config.middleware.rate_limit_enabled {
            chain.add(Arc::new(RateLimitMiddleware::new(
                config.middleware.rate_limit(),
            )));
        }

        let validation = config.middleware.validation_enabled.then(|| {
            let validation = Arc::new(ValidationMiddleware::new());
            chain.add(validation.clone());
            validation
        });

        info!("Middleware chain: {}", chain.names().join(" -> "));

        Self {
            context: ServerContext::new(&config.server.name, &config.server.version),
            retry: RetryExecutor::new(config.resilience.retry()),
            config,
            tools: ToolRegistry::new(),
            breakers: RwLock::new(HashMap::new()),
            chain,
            validation,
            resources,
            metrics,
            tracer,
        }
    }

    /// Get the server name.
    pub fn name(&self) -> &str {
        &self.config.server.name
    }

    /// Get the server version.
    pub fn version(&self) -> &str {
        &self.config.server.version
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn context(&self) -> &ServerContext {
        &self.context
    }

    pub fn resources(&self) -> &Arc<ResourceManager> {
        &self.resources
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn tracer(&self) -> &Arc<Tracer> {
        &self.tracer
    }

    pub fn middleware(&self) -> &MiddlewareChain {
        &self.chain
    }

    /// Append a custom middleware after the built-in ones.
    pub fn add_middleware(&self, middleware: Arc<dyn Middleware>) {
        self.chain.add(middleware);
    }

    /// Register a resource pool using the configured pool defaults.
    pub fn register_pool<T, F>(&self, name: &str, factory: F) -> Result<ResourcePool<T>>
    where
        T: Send + 'static,
        F: Fn() -> anyhow::Result<T> + Send + Sync + 'static,
    {
        let pool = ResourcePool::new(self.config.pools.pool(), factory);
        Ok(self.resources.register_pool(name, pool)?)
    }

    /// Register a tool.
    ///
    /// Fields the tool's schema marks as `required` are enforced by the
    /// validation middleware when it is enabled.
    pub fn register_tool(&self, tool: Arc<dyn ToolHandler>) -> Result<()> {
        let name = tool.name().to_string();
        self.tools.register(tool.clone())?;

        if let Some(validation) = &self.validation {
            let required = tool.required_fields();
            if !required.is_empty() {
                validation.add_validator(name.clone(), required_fields(required));
            }
        }

        let breaker = CircuitBreaker::new(
            format!("tool:{}", name),
            self.config.resilience.circuit_breaker(),
        );
        self.breakers.write().insert(name.clone(), Arc::new(breaker));

        info!("Registered tool: {}", name);
        Ok(())
    }

    /// List all available tools.
    pub fn list_tools(&self) -> Vec<ToolInfo> {
        self.tools.list()
    }

    /// The circuit breaker guarding `tool`, if it is registered.
    pub fn circuit_breaker(&self, tool: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().get(tool).cloned()
    }

    /// Call a tool by name.
    ///
    /// Never fails: errors come back as `success: false` payloads.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Payload {
        self.call_tool_with_context(name, arguments, RequestContext::new())
            .await
    }

    /// Call a tool with a caller-supplied request context.
    pub async fn call_tool_with_context(
        &self,
        name: &str,
        arguments: Value,
        context: RequestContext,
    ) -> Payload {
        // Unknown names are rejected before the chain so they never show
        // up as tracked tools in metrics.
        let (tool, pipeline) = match self.resolve(name) {
            Ok(found) => found,
            Err(e) => {
                warn!("Unknown tool requested: {}", name);
                return e.to_payload();
            }
        };

        let request = Request::new(name, arguments).with_context(context);
        self.chain
            .execute(request, |request| self.dispatch(tool, pipeline, request))
            .await
    }

    fn resolve(&self, name: &str) -> Result<(Arc<dyn ToolHandler>, HandlerPipeline)> {
        let tool = self.tools.get(name)?;
        let breaker = self
            .circuit_breaker(name)
            .ok_or_else(|| Error::from(ToolError::Unguarded(name.to_string())))?;

        // Retry outermost so each attempt gets its own deadline and every
        // timeout counts as a breaker failure.
        let pipeline = HandlerPipeline::new()
            .with_retry(self.retry.clone())
            .with_circuit_breaker(breaker)
            .with_timeout(self.config.resilience.operation_timeout());
        Ok((tool, pipeline))
    }

    async fn dispatch(
        &self,
        tool: Arc<dyn ToolHandler>,
        pipeline: HandlerPipeline,
        request: Request,
    ) -> Result<Payload> {
        let ctx = ToolContext::new(tool.name(), &request.context, self.resources.clone());
        let arguments = request.arguments;

        let operation = move || -> BoxFuture<'static, Result<Value>> {
            let tool = tool.clone();
            let ctx = ctx.clone();
            let arguments = arguments.clone();
            Box::pin(async move { tool.execute(&ctx, arguments).await })
        };

        let result = pipeline.execute(&request.method, &operation).await?;
        Ok(ToolOutput::success(result).into_payload())
    }

    /// Register the server's startup and shutdown hooks.
    ///
    /// Startup: `resource_pools` initializes every pool, then `metrics`
    /// applies the configured enablement. Shutdown runs in reverse:
    /// `metrics_report` logs a final summary, then `resource_pools` closes
    /// every pool.
    pub fn register_lifecycle_hooks(&self, lifecycle: &LifecycleManager) {
        let resources = self.resources.clone();
        lifecycle.on_startup("resource_pools", RESOURCE_POOLS_PRIORITY, move || {
            resources.initialize_all()?;
            Ok(())
        });

        let metrics = self.metrics.clone();
        let metrics_enabled = self.config.monitoring.metrics_enabled;
        lifecycle.on_startup("metrics", METRICS_PRIORITY, move || {
            if metrics_enabled {
                metrics.enable();
                info!("Metrics collection enabled");
            } else {
                metrics.disable();
                info!("Metrics collection disabled");
            }
            Ok(())
        });

        let resources = self.resources.clone();
        lifecycle.on_shutdown_async("resource_pools", RESOURCE_POOLS_PRIORITY, move || {
            let resources = resources.clone();
            async move {
                resources.close_all().await;
                Ok(())
            }
        });

        let metrics = self.metrics.clone();
        lifecycle.on_shutdown("metrics_report", METRICS_PRIORITY, move || {
            let health = metrics.server_health();
            info!(
                "Final metrics: {} calls, {} errors ({:.1}% error rate), {} tools, uptime {:.1}s",
                health.total_tool_calls,
                health.total_tool_errors,
                health.error_rate * 100.0,
                health.tools_tracked,
                health.uptime_seconds
            );
            Ok(())
        });
    }
}

impl std::fmt::Debug for McpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServer")
            .field("name", &self.config.server.name)
            .field("tools", &self.tools.tool_names())
            .field("middleware", &self.chain.names())
            .finish()
    }
}
