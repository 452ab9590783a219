//! Echo tool definition.
//!
//! Returns its arguments unchanged, tagged with the request id. Useful for
//! checking that the middleware chain is wired up.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use crate::core::context::ToolContext;
use crate::core::error::Result;
use crate::domains::tools::{ToolHandler, parse_arguments, schema_for_type};

/// Parameters for the echo tool. Extra fields are echoed back untouched.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct EchoParams {
    /// Text to echo back
    pub message: String,
}

/// Echo tool - returns the arguments it was called with.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoTool;

impl EchoTool {
    /// Tool name as registered in MCP.
    pub const NAME: &'static str = "echo";

    /// Tool description shown to clients.
    pub const DESCRIPTION: &'static str =
        "Echo back the provided message and any additional arguments.";
}

#[async_trait]
impl ToolHandler for EchoTool {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        Self::DESCRIPTION
    }

    fn input_schema(&self) -> Value {
        schema_for_type::<EchoParams>()
    }

    #[instrument(skip_all, fields(request_id = %ctx.request_id))]
    async fn execute(&self, ctx: &ToolContext, arguments: Value) -> Result<Value> {
        let params: EchoParams = parse_arguments(arguments.clone())?;
        debug!("Echoing {} bytes", params.message.len());

        Ok(json!({
            "message": params.message,
            "arguments": arguments,
            "request_id": ctx.request_id,
        }))
    }
}
