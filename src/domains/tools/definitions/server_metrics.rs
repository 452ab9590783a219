//! Server metrics tool definition.
//!
//! Exposes the metrics collector and resource pool statistics to clients.

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::instrument;

use crate::core::context::ToolContext;
use crate::core::error::Result;
use crate::core::observability::MetricsCollector;
use crate::domains::tools::{ToolError, ToolHandler, parse_arguments, schema_for_type};

/// Parameters for the server metrics tool.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct ServerMetricsParams {
    /// Only report this tool
    #[serde(default)]
    pub tool: Option<String>,
}

/// Server metrics tool - reports call statistics and pool usage.
#[derive(Debug)]
pub struct ServerMetricsTool {
    metrics: Arc<MetricsCollector>,
}

impl ServerMetricsTool {
    /// Tool name as registered in MCP.
    pub const NAME: &'static str = "server_metrics";

    /// Tool description shown to clients.
    pub const DESCRIPTION: &'static str = "Report server health, per-tool call statistics and resource pool usage. \
         Pass 'tool' to get the statistics of a single tool.";

    pub fn new(metrics: Arc<MetricsCollector>) -> Self {
        Self { metrics }
    }
}

#[async_trait]
impl ToolHandler for ServerMetricsTool {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        Self::DESCRIPTION
    }

    fn input_schema(&self) -> Value {
        schema_for_type::<ServerMetricsParams>()
    }

    #[instrument(skip_all)]
    async fn execute(&self, ctx: &ToolContext, arguments: Value) -> Result<Value> {
        let params: ServerMetricsParams = parse_arguments(arguments)?;
        if let Some(tool) = params.tool {
            let stats = self
                .metrics
                .get_tool_metrics(&tool)
                .ok_or_else(|| {
                    ToolError::invalid_arguments(format!("no metrics recorded for tool '{}'", tool))
                })?;
            return Ok(serde_json::to_value(stats)?);
        }

        Ok(json!({
            "enabled": self.metrics.is_enabled(),
            "metrics": self.metrics.report(),
            "resources": ctx.resources.stats(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::RequestContext;
    use crate::core::error::ErrorKind;
    use crate::core::pool::ResourceManager;
    use std::time::Duration;

    fn ctx() -> ToolContext {
        ToolContext::new(
            ServerMetricsTool::NAME,
            &RequestContext::new(),
            Arc::new(ResourceManager::new()),
        )
    }

    #[tokio::test]
    async fn test_reports_full_snapshot() {
        let metrics = Arc::new(MetricsCollector::new());
        metrics.record_tool_call("echo", Duration::from_millis(10), false);
        let tool = ServerMetricsTool::new(metrics);

        let report = tool.execute(&ctx(), json!({})).await.unwrap();
        assert_eq!(report["metrics"]["server_health"]["total_tool_calls"], 1);
        assert_eq!(report["metrics"]["tool_metrics"]["echo"]["call_count"], 1);
        assert_eq!(report["resources"]["initialized"], false);
    }

    #[tokio::test]
    async fn test_single_tool_lookup() {
        let metrics = Arc::new(MetricsCollector::new());
        metrics.record_tool_call("echo", Duration::from_millis(10), true);
        let tool = ServerMetricsTool::new(metrics);

        let stats = tool.execute(&ctx(), json!({"tool": "echo"})).await.unwrap();
        assert_eq!(stats["error_count"], 1);

        assert!(tool.execute(&ctx(), json!({"tool": "missing"})).await.is_err());
    }

    #[tokio::test]
    async fn test_non_string_tool_argument_is_rejected() {
        let tool = ServerMetricsTool::new(Arc::new(MetricsCollector::new()));

        let err = tool.execute(&ctx(), json!({"tool": 5})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("invalid type"));
    }
}
