//! MCP Server Entry Point
//!
//! This is the main entry point for the MCP server. It initializes logging,
//! loads configuration, wires the shared services together and runs the
//! lifecycle until the process is interrupted.

use std::sync::Arc;

use anyhow::Result;
use tracing::{Level, info};
use tracing_subscriber::{EnvFilter, fmt};

use toolrack_mcp_server::core::{
    Config, LifecycleManager, McpServer, MetricsCollector, ResourceManager, Tracer,
};
use toolrack_mcp_server::domains::tools::definitions::{EchoTool, ServerMetricsTool};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration from environment
    let config = Config::from_env();

    // Initialize logging
    init_logging(&config.logging.level, config.logging.with_timestamps);

    info!("Starting {} v{}", config.server.name, config.server.version);

    // Shared services, created once and injected
    let resources = Arc::new(ResourceManager::new());
    let metrics = Arc::new(MetricsCollector::new());
    let tracer = Arc::new(Tracer::new(config.monitoring.tracing_enabled));

    let server = McpServer::new(config, resources, metrics.clone(), tracer);
    server.register_pool("buffers", || Ok(Vec::<u8>::with_capacity(64 * 1024)))?;
    server.register_tool(Arc::new(EchoTool))?;
    server.register_tool(Arc::new(ServerMetricsTool::new(metrics)))?;

    let lifecycle = LifecycleManager::new();
    server.register_lifecycle_hooks(&lifecycle);
    lifecycle.startup().await;

    let health = lifecycle.health_status();
    info!(
        "Server initialized with {} tools (healthy: {})",
        server.list_tools().len(),
        health.healthy
    );

    tokio::signal::ctrl_c().await?;
    info!("Server shutting down");

    lifecycle.shutdown().await;

    Ok(())
}

/// Initialize the logging subsystem.
///
/// Configures tracing with the specified log level and format.
fn init_logging(level: &str, with_timestamps: bool) {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr);

    if with_timestamps {
        builder.init();
    } else {
        builder.without_time().init();
    }
}
