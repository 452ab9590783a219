//! Tools domain module.
//!
//! This module handles all tool-related functionality for the MCP server.
//! Tools are executable functions that can be called by MCP clients to perform
//! specific actions or computations.
//!
//! ## Architecture
//!
//! - `definitions/` - Individual tool implementations (one file per tool)
//! - `handlers.rs` - The [`ToolHandler`] trait and output types
//! - `registry.rs` - Central tool registry
//! - `error.rs` - Tool-specific error types
//!
//! ## Adding a New Tool
//!
//! 1. Create a new file in `definitions/` (e.g., `my_tool.rs`)
//! 2. Implement [`ToolHandler`] for it
//! 3. Export in `definitions/mod.rs`
//! 4. Register it with `McpServer::register_tool`

pub mod definitions;
mod error;
mod handlers;
mod registry;

pub use error::ToolError;
pub use handlers::{ToolHandler, ToolInfo, ToolOutput, parse_arguments, schema_for_type};
pub use registry::ToolRegistry;
