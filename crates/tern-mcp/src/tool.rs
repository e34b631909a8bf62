//! Namespaced tool names for MCP-provided tools.

use crate::connection::McpToolInfo;
use tern_types::ToolDefinition;

/// Separator between a server name and a tool name.
///
/// Server names may not contain `__`, so the first occurrence always marks
/// the boundary and the split round-trips.
pub const TOOL_NAME_SEPARATOR: &str = "__";

/// A tool exposed by an MCP server, addressed by its namespaced name.
///
/// Each McpTool represents one tool from one server. The namespaced name
/// follows the pattern `servername__toolname` so tools with the same name on
/// different servers never collide.
#[derive(Debug, Clone)]
pub struct McpTool {
    namespaced_name: String,
    server_name: String,
    original_name: String,
    description: String,
    input_schema: serde_json::Value,
}

impl McpTool {
    /// Wrap a discovered tool under its server's namespace.
    pub fn new(server_name: &str, tool_info: &McpToolInfo) -> Self {
        let namespaced_name = format!(
            "{}{}{}",
            server_name, TOOL_NAME_SEPARATOR, tool_info.name
        );
        Self {
            namespaced_name,
            server_name: server_name.to_string(),
            original_name: tool_info.name.clone(),
            description: tool_info.description.clone(),
            input_schema: tool_info.input_schema.clone(),
        }
    }

    /// The model-facing name, `servername__toolname`.
    pub fn namespaced_name(&self) -> &str {
        &self.namespaced_name
    }

    /// The tool name as the server knows it.
    pub fn original_name(&self) -> &str {
        &self.original_name
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn input_schema(&self) -> &serde_json::Value {
        &self.input_schema
    }

    /// The definition sent to the model API.
    pub fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.namespaced_name.clone(),
            description: format!("[MCP: {}] {}", self.server_name, self.description),
            input_schema: self.input_schema.clone(),
        }
    }
}

/// Split a namespaced tool name into `(server, tool)`.
///
/// Returns `None` when the name carries no separator at all.
pub fn split_namespaced(name: &str) -> Option<(&str, &str)> {
    name.split_once(TOOL_NAME_SEPARATOR)
}
