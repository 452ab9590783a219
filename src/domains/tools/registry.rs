//! Tool Registry - central registration and lookup for all tools.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use super::error::ToolError;
use super::handlers::{ToolHandler, ToolInfo};

/// Tool registry - manages all available tools.
///
/// Tools are kept sorted by name so listings are stable.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<BTreeMap<String, Arc<dyn ToolHandler>>>,
}

impl ToolRegistry {
    /// Create an empty tool registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Names must be unique.
    pub fn register(&self, tool: Arc<dyn ToolHandler>) -> Result<(), ToolError> {
        let name = tool.name().to_string();
        let mut tools = self.tools.write();
        if tools.contains_key(&name) {
            warn!("Tool '{}' is already registered", name);
            return Err(ToolError::Duplicate(name));
        }
        debug!("Registered tool '{}'", name);
        tools.insert(name, tool);
        Ok(())
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn ToolHandler>, ToolError> {
        self.tools
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ToolError::unknown(name))
    }

    /// Get all tool names.
    pub fn tool_names(&self) -> Vec<String> {
        self.tools.read().keys().cloned().collect()
    }

    /// Metadata of every registered tool.
    pub fn list(&self) -> Vec<ToolInfo> {
        self.tools.read().values().map(|t| t.info()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tool_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::tools::definitions::EchoTool;

    #[test]
    fn test_registry_register_and_get() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.tool_names(), vec!["echo".to_string()]);
        assert_eq!(registry.get("echo").unwrap().name(), "echo");

        let listed = registry.list();
        assert_eq!(listed[0].name, "echo");
        assert_eq!(listed[0].input_schema["required"][0], "message");
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).unwrap();
        let err = registry.register(Arc::new(EchoTool)).unwrap_err();
        assert!(matches!(err, ToolError::Duplicate(name) if name == "echo"));
    }

    #[test]
    fn test_registry_unknown_tool() {
        let registry = ToolRegistry::new();
        assert!(matches!(registry.get("unknown"), Err(ToolError::Unknown(_))));
    }
}
