//! Error code taxonomy shared across the MCP subsystem and its consumers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of error codes, grouped by the phase that produces them.
///
/// Configuration codes come from config validation, connection codes from
/// `load_from_config`, and runtime codes from `call_tool`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Configuration
    InvalidConfig,
    MissingCommand,
    InvalidEnvVar,
    // Connection
    CommandNotFound,
    SpawnFailed,
    ConnectTimeout,
    InitializeFailed,
    // Runtime
    ServerCrashed,
    Disconnected,
    ToolNotFound,
    ToolExecutionFailed,
    ToolTimeout,
}

impl ErrorCode {
    /// The wire representation of this code (e.g. `CONNECT_TIMEOUT`).
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidConfig => "INVALID_CONFIG",
            ErrorCode::MissingCommand => "MISSING_COMMAND",
            ErrorCode::InvalidEnvVar => "INVALID_ENV_VAR",
            ErrorCode::CommandNotFound => "COMMAND_NOT_FOUND",
            ErrorCode::SpawnFailed => "SPAWN_FAILED",
            ErrorCode::ConnectTimeout => "CONNECT_TIMEOUT",
            ErrorCode::InitializeFailed => "INITIALIZE_FAILED",
            ErrorCode::ServerCrashed => "SERVER_CRASHED",
            ErrorCode::Disconnected => "DISCONNECTED",
            ErrorCode::ToolNotFound => "TOOL_NOT_FOUND",
            ErrorCode::ToolExecutionFailed => "TOOL_EXECUTION_FAILED",
            ErrorCode::ToolTimeout => "TOOL_TIMEOUT",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
