//! A single MCP server connection and its lifecycle.
//!
//! Handles the MCP protocol handshake (initialize + initialized notification),
//! tool discovery (tools/list), and tool invocation (tools/call), and tracks
//! where in the lifecycle the connection currently is.

use crate::config::{ConfigSource, ServerConfig};
use crate::error::McpError;
use crate::transport::{HttpTransport, StdioTransport, Transport};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::{Arc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// MCP protocol version we support.
const PROTOCOL_VERSION: &str = "2024-11-05";

/// Lifecycle state of a server connection.
///
/// The happy path is `Created -> Connecting -> Initialized -> Operating`.
/// `Failed` and `Closed` are terminal; a connection never leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Created,
    Connecting,
    Initialized,
    Operating,
    Failed,
    Closed,
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Failed | ConnectionState::Closed)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Created => "created",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Initialized => "initialized",
            ConnectionState::Operating => "operating",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Information about a tool exposed by an MCP server.
#[derive(Debug, Clone)]
pub struct McpToolInfo {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Result of calling a tool on an MCP server.
#[derive(Debug, Clone)]
pub struct McpToolResult {
    pub content: Vec<McpToolContent>,
    pub is_error: bool,
}

/// A content item in a tool result, as the server sends it.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum McpToolContent {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Resource {
        resource: ResourceContents,
    },
}

/// The embedded resource body inside a `resource` content item.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceContents {
    pub uri: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default, rename = "mimeType")]
    pub mime_type: Option<String>,
}

/// Deserialization helpers for MCP protocol messages.
#[derive(Deserialize)]
struct ToolsListResult {
    tools: Vec<ToolEntry>,
}

#[derive(Deserialize)]
struct ToolEntry {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default = "default_schema", rename = "inputSchema")]
    input_schema: serde_json::Value,
}

fn default_schema() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

#[derive(Deserialize)]
struct ToolCallResult {
    content: Vec<McpToolContent>,
    #[serde(default, rename = "isError")]
    is_error: bool,
}

/// One live (or failed, or closed) connection to an MCP server.
pub struct ServerConnection {
    name: String,
    config: ServerConfig,
    source: ConfigSource,
    id: Uuid,
    started_at: DateTime<Utc>,
    state: Mutex<ConnectionState>,
    transport: RwLock<Option<Arc<Transport>>>,
    tools: Vec<McpToolInfo>,
}

impl ServerConnection {
    /// Connect to an MCP server: spawn or dial, handshake, discover tools.
    ///
    /// On any failure the connection ends up `Failed` with its transport
    /// released, and the error is returned for the caller to record.
    pub async fn connect(
        name: String,
        config: ServerConfig,
        source: ConfigSource,
    ) -> Result<Self, McpError> {
        let mut conn = Self {
            name,
            config,
            source,
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            state: Mutex::new(ConnectionState::Created),
            transport: RwLock::new(None),
            tools: Vec::new(),
        };

        match conn.establish().await {
            Ok(()) => Ok(conn),
            Err(e) => {
                conn.set_state(ConnectionState::Failed);
                let taken = conn
                    .transport
                    .write()
                    .expect("transport lock poisoned")
                    .take();
                if let Some(transport) = taken {
                    if let Ok(transport) = Arc::try_unwrap(transport) {
                        transport.shutdown().await;
                    }
                }
                Err(e)
            }
        }
    }

    async fn establish(&mut self) -> Result<(), McpError> {
        self.set_state(ConnectionState::Connecting);

        let transport = if self.config.url.is_some() {
            Transport::Http(HttpTransport::connect(&self.name, &self.config)?)
        } else {
            Transport::Stdio(StdioTransport::spawn(&self.name, &self.config)?)
        };
        let transport = Arc::new(transport);
        *self.transport.write().expect("transport lock poisoned") = Some(Arc::clone(&transport));

        // Send `initialize` request
        let init_params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "tern",
                "version": env!("CARGO_PKG_VERSION")
            }
        });

        let resp = transport
            .send_request("initialize", Some(init_params))
            .await?;

        if let Some(err) = resp.error {
            return Err(McpError::JsonRpc {
                server: self.name.clone(),
                code: err.code,
                message: err.message,
            });
        }

        // Send `notifications/initialized`
        transport
            .send_notification("notifications/initialized", None)
            .await?;

        self.set_state(ConnectionState::Initialized);

        // Discover tools via `tools/list`
        let tools_resp = transport.send_request("tools/list", None).await?;

        self.tools = if let Some(result) = tools_resp.result {
            let list: ToolsListResult = serde_json::from_value(result).map_err(|e| {
                McpError::Protocol(format!("Failed to parse tools/list response: {e}"))
            })?;
            list.tools
                .into_iter()
                .map(|t| McpToolInfo {
                    name: t.name,
                    description: t.description.unwrap_or_default(),
                    input_schema: t.input_schema,
                })
                .collect()
        } else if let Some(err) = tools_resp.error {
            return Err(McpError::JsonRpc {
                server: self.name.clone(),
                code: err.code,
                message: err.message,
            });
        } else {
            Vec::new()
        };

        self.set_state(ConnectionState::Operating);
        tracing::info!(
            "MCP server '{}' connected with {} tools",
            self.name,
            self.tools.len()
        );
        Ok(())
    }

    /// Call a tool on this server. Cancellation aborts the wait, not the
    /// server; a cancelled call returns `McpError::Cancelled`.
    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<McpToolResult, McpError> {
        let transport = self
            .transport
            .read()
            .expect("transport lock poisoned")
            .clone()
            .ok_or(McpError::ChannelClosed)?;

        let params = serde_json::json!({
            "name": tool_name,
            "arguments": arguments,
        });

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(McpError::Cancelled),
            resp = transport.send_request("tools/call", Some(params)) => resp,
        };

        let resp = match result {
            Ok(resp) => resp,
            Err(e) => {
                if matches!(&e, McpError::ChannelClosed) {
                    // The process went away under us.
                    self.set_state(ConnectionState::Failed);
                }
                return Err(e);
            }
        };

        if let Some(err) = resp.error {
            return Err(McpError::JsonRpc {
                server: self.name.clone(),
                code: err.code,
                message: err.message,
            });
        }

        let result = resp.result.ok_or_else(|| {
            McpError::Protocol("tools/call response has neither result nor error".to_string())
        })?;

        let call_result: ToolCallResult = serde_json::from_value(result)
            .map_err(|e| McpError::Protocol(format!("Failed to parse tools/call result: {e}")))?;

        Ok(McpToolResult {
            content: call_result.content,
            is_error: call_result.is_error,
        })
    }

    /// Close the connection. Safe to call more than once; a connection that
    /// already reached a terminal state stays where it is.
    pub async fn close(&self) {
        {
            let mut state = self.state.lock().expect("state lock poisoned");
            if !state.is_terminal() {
                *state = ConnectionState::Closed;
            }
        }

        let taken = self
            .transport
            .write()
            .expect("transport lock poisoned")
            .take();
        if let Some(transport) = taken {
            match Arc::try_unwrap(transport) {
                Ok(transport) => transport.shutdown().await,
                // An in-flight call still holds the transport; the child is
                // killed on drop once that call finishes.
                Err(_) => {}
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> ConfigSource {
        self.source
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Tools discovered during the handshake.
    pub fn tools(&self) -> &[McpToolInfo] {
        &self.tools
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().expect("state lock poisoned")
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    fn set_state(&self, next: ConnectionState) {
        *self.state.lock().expect("state lock poisoned") = next;
    }
}
