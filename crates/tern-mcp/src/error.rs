//! Error types for MCP operations.

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use thiserror::Error;

use tern_types::ErrorCode;

/// Errors from MCP server communication.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("MCP server command not found for '{name}': {command}")]
    CommandNotFound { name: String, command: String },

    #[error("Failed to spawn MCP server '{name}': {source}")]
    SpawnFailed {
        name: String,
        source: std::io::Error,
    },

    #[error("JSON-RPC error from '{server}' (code {code}): {message}")]
    JsonRpc {
        server: String,
        code: i64,
        message: String,
    },

    #[error("MCP protocol error: {0}")]
    Protocol(String),

    #[error("MCP request '{method}' timed out after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },

    #[error("MCP request cancelled")]
    Cancelled,

    #[error("MCP server connection closed")]
    ChannelClosed,

    #[error("HTTP transport error: {0}")]
    Http(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    /// The error code this failure maps to when it happens during connection
    /// establishment (spawn, initialize handshake, tool discovery).
    pub fn connect_code(&self) -> ErrorCode {
        match self {
            McpError::CommandNotFound { .. } => ErrorCode::CommandNotFound,
            McpError::SpawnFailed { .. } | McpError::Io(_) => ErrorCode::SpawnFailed,
            McpError::Timeout { .. } => ErrorCode::ConnectTimeout,
            _ => ErrorCode::InitializeFailed,
        }
    }

    /// The error code this failure maps to when it happens during a tool call
    /// on an established connection.
    pub fn call_code(&self) -> ErrorCode {
        match self {
            McpError::Timeout { .. } => ErrorCode::ToolTimeout,
            McpError::ChannelClosed => ErrorCode::Disconnected,
            _ => ErrorCode::ToolExecutionFailed,
        }
    }
}

/// A structured record of a server that failed to load.
///
/// Collected by the manager instead of aborting the load, so one bad server
/// never blocks the others.
#[derive(Debug, Clone)]
pub struct ServerError {
    pub code: ErrorCode,
    pub message: String,
    pub server_name: String,
    pub config_path: PathBuf,
    pub timestamp: DateTime<Utc>,
    pub details: Option<serde_json::Value>,
}

impl ServerError {
    pub fn new(
        code: ErrorCode,
        message: impl Into<String>,
        server_name: impl Into<String>,
        config_path: PathBuf,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            server_name: server_name.into(),
            config_path,
            timestamp: Utc::now(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_not_found_maps_to_connect_code() {
        let err = McpError::CommandNotFound {
            name: "github".to_string(),
            command: "npx".to_string(),
        };
        assert_eq!(err.connect_code(), ErrorCode::CommandNotFound);
    }

    #[test]
    fn timeout_code_depends_on_phase() {
        let err = McpError::Timeout {
            method: "initialize".to_string(),
            timeout_ms: 5000,
        };
        assert_eq!(err.connect_code(), ErrorCode::ConnectTimeout);
        assert_eq!(err.call_code(), ErrorCode::ToolTimeout);
    }

    #[test]
    fn closed_channel_means_disconnected_at_call_time() {
        assert_eq!(McpError::ChannelClosed.call_code(), ErrorCode::Disconnected);
    }

    #[test]
    fn handshake_failures_map_to_initialize_failed() {
        let err = McpError::JsonRpc {
            server: "github".to_string(),
            code: -32600,
            message: "bad request".to_string(),
        };
        assert_eq!(err.connect_code(), ErrorCode::InitializeFailed);
        assert_eq!(err.call_code(), ErrorCode::ToolExecutionFailed);
    }

    #[test]
    fn server_error_carries_context() {
        let err = ServerError::new(
            ErrorCode::SpawnFailed,
            "no such file",
            "github",
            PathBuf::from("/home/u/.config/tern/mcp.json"),
        )
        .with_details(serde_json::json!({"command": "missing-bin"}));
        assert_eq!(err.code, ErrorCode::SpawnFailed);
        assert_eq!(err.server_name, "github");
        assert_eq!(err.details.unwrap()["command"], "missing-bin");
    }
}
