//! MCP (Model Context Protocol) server manager for Tern.
//!
//! Discovers server configurations from two precedence tiers (user-global and
//! project-local `mcp.json`), spawns and connects to the configured tool
//! providers concurrently, tracks each connection's lifecycle state, and
//! routes namespaced tool calls to the owning connection. Stdio servers are
//! spawned as child processes speaking newline-delimited JSON-RPC 2.0;
//! remote servers are reached over HTTP.

pub mod config;
pub mod connection;
pub mod error;
pub mod jsonrpc;
pub mod manager;
pub mod result;
pub mod tool;
mod transport;

pub use config::{
    ConfigSource, ConfigViolation, DiscoveredConfigs, McpConfigFile, MergedConfig, ServerConfig,
    ValidationReport, discover_configs, discover_configs_at, merge_configs, validate_config,
};
pub use connection::{
    ConnectionState, McpToolContent, McpToolInfo, McpToolResult, ResourceContents,
    ServerConnection,
};
pub use error::{McpError, ServerError};
pub use manager::{LoadResult, McpManager};
pub use tool::{McpTool, TOOL_NAME_SEPARATOR, split_namespaced};
