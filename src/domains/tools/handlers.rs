//! Tool handler trait and output type.
//!
//! Every tool implements [`ToolHandler`]. The server wraps each call in the
//! middleware chain and the handler pipeline, so handlers only contain the
//! tool's own logic.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::core::context::ToolContext;
use crate::core::error::Result;
use crate::core::middleware::Payload;

use super::error::ToolError;

/// JSON schema of a parameter type, as advertised in `inputSchema`.
pub fn schema_for_type<P: JsonSchema>() -> Value {
    match serde_json::to_value(schemars::schema_for!(P)) {
        Ok(schema) => schema,
        Err(e) => {
            warn!("Failed to serialize tool schema: {}", e);
            serde_json::json!({ "type": "object" })
        }
    }
}

/// Deserialize call arguments into a tool's parameter type.
pub fn parse_arguments<P: DeserializeOwned>(arguments: Value) -> std::result::Result<P, ToolError> {
    Ok(serde_json::from_value(arguments)?)
}

/// Metadata describing a registered tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Output from a successful tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Always true; failures are reported through the error payload.
    pub success: bool,

    /// The result data from the tool.
    pub result: Value,
}

impl ToolOutput {
    /// Create a successful tool output.
    pub fn success(result: Value) -> Self {
        Self {
            success: true,
            result,
        }
    }

    /// Convert into a response payload for the middleware chain.
    pub fn into_payload(self) -> Payload {
        let mut payload = Payload::new();
        payload.insert("success".to_string(), Value::Bool(self.success));
        payload.insert("result".to_string(), self.result);
        payload
    }
}

/// Trait for implementing tool handlers.
///
/// Handlers may be invoked more than once per request when a retry policy
/// is installed, so `execute` should be safe to repeat.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Get the name of this tool.
    fn name(&self) -> &str;

    /// Get the description of this tool.
    fn description(&self) -> &str;

    /// JSON schema of the arguments object, usually
    /// [`schema_for_type`] of the tool's parameter struct.
    ///
    /// Names listed under `required` are checked by the validation
    /// middleware before the handler runs.
    fn input_schema(&self) -> Value {
        serde_json::json!({ "type": "object" })
    }

    /// Execute the tool with the given arguments.
    async fn execute(&self, ctx: &ToolContext, arguments: Value) -> Result<Value>;

    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }

    /// Fields the schema marks as required.
    fn required_fields(&self) -> Vec<String> {
        self.input_schema()
            .get("required")
            .and_then(Value::as_array)
            .map(|fields| {
                fields
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}
