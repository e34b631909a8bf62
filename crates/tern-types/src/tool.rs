//! Tool-facing types shared between the MCP subsystem and the chat loop.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::ErrorCode;

/// The tool definition sent to the model API (name, description, input schema).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// A tool invocation request produced by the chat loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// The API-assigned tool-use id, echoed back in the result block.
    pub id: String,
    /// The (namespaced) tool name the model asked for.
    pub name: String,
    /// Parsed JSON arguments for the tool.
    pub arguments: serde_json::Value,
}

/// Asks the user to approve an action before it is taken.
///
/// Supplied by the session layer; the MCP subsystem consults it before
/// connecting to project-local servers it has not seen before.
pub trait ApprovalHandler: Send + Sync {
    fn approve(
        &self,
        action: &str,
        details: &str,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + '_>>;
}

/// Context supplied by the session layer to tool-executing subsystems.
#[derive(Clone)]
pub struct ToolContext {
    /// Working directory of the session (project config discovery root).
    pub cwd: PathBuf,
    /// Optional user-approval callback.
    pub approval: Option<Arc<dyn ApprovalHandler>>,
}

impl ToolContext {
    pub fn new(cwd: PathBuf) -> Self {
        Self {
            cwd,
            approval: None,
        }
    }

    pub fn with_approval(mut self, handler: Arc<dyn ApprovalHandler>) -> Self {
        self.approval = Some(handler);
        self
    }
}

impl fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolContext")
            .field("cwd", &self.cwd)
            .field("approval", &self.approval.as_ref().map(|_| "<handler>"))
            .finish()
    }
}

/// A single piece of tool result content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolContent {
    Text {
        text: String,
    },
    Image {
        mime_type: String,
        data: String,
    },
    Resource {
        uri: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
}

/// Structured error attached to a failed tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ToolCallError {
    pub code: ErrorCode,
    pub message: String,
}

/// Measurement and routing metadata attached to every tool call outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallMetadata {
    pub duration_ms: u64,
    pub server_name: String,
    pub tool_name: String,
}

/// Uniform result envelope returned for every tool call, success or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<ToolContent>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolCallError>,
    pub metadata: CallMetadata,
}

impl ToolCallOutcome {
    /// A successful outcome carrying the provider's content.
    pub fn success(content: Vec<ToolContent>, metadata: CallMetadata) -> Self {
        Self {
            success: true,
            content: Some(content),
            error: None,
            metadata,
        }
    }

    /// A failed outcome with a coded error and no content.
    pub fn failure(code: ErrorCode, message: impl Into<String>, metadata: CallMetadata) -> Self {
        Self {
            success: false,
            content: None,
            error: Some(ToolCallError {
                code,
                message: message.into(),
            }),
            metadata,
        }
    }
}
