//! MCP manager — orchestrates multiple MCP server connections.
//!
//! Owns the registry of connections keyed by server name plus a derived
//! index from namespaced tool name to owning server. Servers are loaded
//! concurrently and independently; one server failing to start never blocks
//! the others.

use crate::config::{
    ConfigSource, MergedConfig, discover_configs, is_valid_server_name, merge_configs,
};
use crate::connection::{ConnectionState, ServerConnection};
use crate::error::ServerError;
use crate::result::{error_outcome, provider_outcome};
use crate::tool::{McpTool, split_namespaced};
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tern_types::{ErrorCode, ToolCall, ToolCallOutcome, ToolContext, ToolDefinition};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Outcome of one load pass over a merged config.
#[derive(Default)]
pub struct LoadResult {
    pub servers: Vec<Arc<ServerConnection>>,
    pub errors: Vec<ServerError>,
    pub tool_count: usize,
    pub duration_ms: u64,
}

impl LoadResult {
    /// Human-readable per-server lines for session startup output.
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for server in &self.servers {
            lines.push(format!(
                "MCP server '{}' connected ({} tools)",
                server.name(),
                server.tools().len()
            ));
        }
        for err in &self.errors {
            lines.push(format!(
                "Warning: MCP server '{}' failed to start: {}",
                err.server_name, err.message
            ));
        }
        lines
    }
}

/// Manages connections to multiple MCP servers.
///
/// Both maps are guarded by sync locks that are never held across an await;
/// connection handles are cloned out before any async work.
#[derive(Default)]
pub struct McpManager {
    connections: RwLock<HashMap<String, Arc<ServerConnection>>>,
    tool_index: RwLock<HashMap<String, McpTool>>,
}

impl McpManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discover, merge, and load servers for a session.
    ///
    /// Project-local servers are gated on the context's approval handler
    /// when one is present; a denied server is skipped without being
    /// spawned.
    pub async fn load_for_context(&self, ctx: &ToolContext) -> LoadResult {
        let discovered = discover_configs(&ctx.cwd).await;
        let mut merged = merge_configs(discovered);

        if let Some(approval) = &ctx.approval {
            let project_servers: Vec<String> = merged
                .servers
                .keys()
                .filter(|name| merged.source(name) == ConfigSource::Project)
                .cloned()
                .collect();
            for name in project_servers {
                let details = {
                    let config = &merged.servers[&name];
                    match &config.url {
                        Some(url) => format!("Connect to project MCP server '{name}' at {url}"),
                        None => format!(
                            "Run project MCP server '{name}': {} {}",
                            config.command,
                            config.args.join(" ")
                        ),
                    }
                };
                if !approval.approve("mcp_connect", &details).await {
                    tracing::info!("Project MCP server '{name}' declined by user, skipping");
                    merged.servers.remove(&name);
                }
            }
        }

        self.load_from_config(&merged).await
    }

    /// Start every server in the merged config concurrently, settling all of
    /// them before returning.
    ///
    /// Servers that fail to start are recorded and skipped — the session
    /// continues with whatever servers are available.
    pub async fn load_from_config(&self, config: &MergedConfig) -> LoadResult {
        let started = Instant::now();
        let mut result = LoadResult::default();
        let mut join_set = JoinSet::new();

        for (name, server_config) in &config.servers {
            let source = config.source(name);
            let config_path = config.config_path_for(source).to_path_buf();

            // Reject what can be rejected without spawning anything.
            if !is_valid_server_name(name) {
                result.errors.push(ServerError::new(
                    ErrorCode::InvalidConfig,
                    format!("invalid server name '{name}'"),
                    name.clone(),
                    config_path,
                ));
                continue;
            }
            if server_config.command.is_empty() && server_config.url.is_none() {
                result.errors.push(ServerError::new(
                    ErrorCode::MissingCommand,
                    format!("server '{name}' has no command"),
                    name.clone(),
                    config_path,
                ));
                continue;
            }

            let name = name.clone();
            let server_config = server_config.clone();
            join_set.spawn(async move {
                let connected = ServerConnection::connect(name.clone(), server_config, source).await;
                (name, source, connected)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((name, _, Ok(connection))) => {
                    tracing::info!(
                        "MCP server '{}' started ({} tools)",
                        name,
                        connection.tools().len()
                    );
                    let connection = Arc::new(connection);
                    self.connections
                        .write()
                        .expect("connections lock poisoned")
                        .insert(name, Arc::clone(&connection));
                    result.servers.push(connection);
                }
                Ok((name, source, Err(e))) => {
                    tracing::warn!("Failed to start MCP server '{}': {}", name, e);
                    result.errors.push(ServerError::new(
                        e.connect_code(),
                        e.to_string(),
                        name,
                        config.config_path_for(source).to_path_buf(),
                    ));
                }
                Err(e) => {
                    tracing::warn!("MCP server load task panicked: {e}");
                }
            }
        }

        result.tool_count = self.get_tools().len();
        result.duration_ms = started.elapsed().as_millis() as u64;
        result
    }

    /// All tools from servers currently in the operating state, rebuilding
    /// the name index as a side effect.
    pub fn get_tools(&self) -> Vec<McpTool> {
        let mut tools = Vec::new();
        {
            let connections = self.connections.read().expect("connections lock poisoned");
            for connection in connections.values() {
                if connection.state() != ConnectionState::Operating {
                    continue;
                }
                for info in connection.tools() {
                    tools.push(McpTool::new(connection.name(), info));
                }
            }
        }

        let mut index = self.tool_index.write().expect("tool index lock poisoned");
        index.clear();
        for tool in &tools {
            index.insert(tool.namespaced_name().to_string(), tool.clone());
        }
        tools
    }

    /// Tool definitions for the model API, one per visible tool.
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.get_tools().iter().map(McpTool::to_definition).collect()
    }

    /// Look up a tool by its namespaced name.
    pub fn find_tool(&self, namespaced_name: &str) -> Option<McpTool> {
        if let Some(tool) = self
            .tool_index
            .read()
            .expect("tool index lock poisoned")
            .get(namespaced_name)
        {
            return Some(tool.clone());
        }
        // The index may be stale after a load or a server state change.
        self.get_tools();
        self.tool_index
            .read()
            .expect("tool index lock poisoned")
            .get(namespaced_name)
            .cloned()
    }

    /// Route a namespaced tool call to its owning server.
    ///
    /// Always returns an outcome envelope; routing failures become failed
    /// outcomes rather than panics or transport errors.
    pub async fn call_tool(
        &self,
        namespaced_name: &str,
        arguments: serde_json::Value,
        cancel: &CancellationToken,
    ) -> ToolCallOutcome {
        let started = Instant::now();

        let Some((server_name, tool_name)) = split_namespaced(namespaced_name) else {
            return error_outcome(
                ErrorCode::ToolNotFound,
                format!("invalid tool name format: '{namespaced_name}'"),
                "",
                namespaced_name,
                started,
            );
        };

        let connection = self
            .connections
            .read()
            .expect("connections lock poisoned")
            .get(server_name)
            .cloned();
        let Some(connection) = connection else {
            return error_outcome(
                ErrorCode::ToolNotFound,
                format!("server not found: '{server_name}'"),
                server_name,
                tool_name,
                started,
            );
        };

        let state = connection.state();
        if state != ConnectionState::Operating {
            let code = match state {
                ConnectionState::Failed => ErrorCode::ServerCrashed,
                _ => ErrorCode::Disconnected,
            };
            return error_outcome(
                code,
                format!("server '{server_name}' is {state}"),
                server_name,
                tool_name,
                started,
            );
        }

        if !connection.tools().iter().any(|t| t.name == tool_name) {
            return error_outcome(
                ErrorCode::ToolNotFound,
                format!("tool '{tool_name}' not found on server '{server_name}'"),
                server_name,
                tool_name,
                started,
            );
        }

        match connection.call_tool(tool_name, arguments, cancel).await {
            Ok(result) => provider_outcome(result, server_name, tool_name, started),
            Err(e) => error_outcome(e.call_code(), e.to_string(), server_name, tool_name, started),
        }
    }

    /// Route a chat-loop tool call by its API shape.
    pub async fn dispatch_call(
        &self,
        call: &ToolCall,
        cancel: &CancellationToken,
    ) -> ToolCallOutcome {
        self.call_tool(&call.name, call.arguments.clone(), cancel)
            .await
    }

    /// Current lifecycle state of a named server, if it is registered.
    pub fn server_status(&self, name: &str) -> Option<ConnectionState> {
        self.connections
            .read()
            .expect("connections lock poisoned")
            .get(name)
            .map(|c| c.state())
    }

    /// Connection id of a named server, if it is registered.
    pub fn server_id(&self, name: &str) -> Option<Uuid> {
        self.connections
            .read()
            .expect("connections lock poisoned")
            .get(name)
            .map(|c| c.id())
    }

    /// Per-server `(name, state, tool count)` summary.
    pub fn server_summary(&self) -> Vec<(String, ConnectionState, usize)> {
        self.connections
            .read()
            .expect("connections lock poisoned")
            .values()
            .map(|c| (c.name().to_string(), c.state(), c.tools().len()))
            .collect()
    }

    /// Close every connection and empty the registry. Safe to call more than
    /// once; a second pass finds nothing to do.
    pub async fn cleanup(&self) {
        let connections: Vec<Arc<ServerConnection>> = {
            let mut map = self.connections.write().expect("connections lock poisoned");
            map.drain().map(|(_, c)| c).collect()
        };
        self.tool_index
            .write()
            .expect("tool index lock poisoned")
            .clear();

        join_all(connections.iter().map(|c| c.close())).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DiscoveredConfigs, McpConfigFile, ServerConfig};
    use std::path::PathBuf;

    fn stdio_config(command: &str) -> ServerConfig {
        ServerConfig {
            command: command.to_string(),
            args: Vec::new(),
            env: HashMap::new(),
            timeout_ms: 1000,
            url: None,
            headers: HashMap::new(),
        }
    }

    fn merged_with(servers: Vec<(&str, ServerConfig)>) -> MergedConfig {
        let mut file = McpConfigFile::default();
        for (name, config) in servers {
            file.mcp_servers.insert(name.to_string(), config);
        }
        merge_configs(DiscoveredConfigs {
            global: Some(file),
            project: None,
            global_path: PathBuf::from("/home/u/.config/tern/mcp.json"),
            project_path: PathBuf::from("/work/.tern/mcp.json"),
        })
    }

    #[tokio::test]
    async fn empty_config_loads_no_servers() {
        let manager = McpManager::new();
        let result = manager.load_from_config(&merged_with(vec![])).await;
        assert!(result.servers.is_empty());
        assert!(result.errors.is_empty());
        assert_eq!(result.tool_count, 0);
        assert!(result.duration_ms < 100);
        assert!(manager.get_tools().is_empty());
        manager.cleanup().await;
    }

    #[tokio::test]
    async fn every_failure_is_recorded_independently() {
        let manager = McpManager::new();
        let result = manager
            .load_from_config(&merged_with(vec![
                ("one", stdio_config("nonexistent_command_one")),
                ("two", stdio_config("nonexistent_command_two")),
            ]))
            .await;
        assert_eq!(result.errors.len(), 2);
        assert!(result.servers.is_empty());
        assert_eq!(result.tool_count, 0);
        let mut failed: Vec<&str> = result.errors.iter().map(|e| e.server_name.as_str()).collect();
        failed.sort();
        assert_eq!(failed, vec!["one", "two"]);
        manager.cleanup().await;
    }

    #[tokio::test]
    async fn failed_server_is_recorded_and_skipped() {
        let manager = McpManager::new();
        let result = manager
            .load_from_config(&merged_with(vec![(
                "bad",
                stdio_config("nonexistent_command_xyz123"),
            )]))
            .await;
        assert!(result.servers.is_empty());
        assert_eq!(result.errors.len(), 1);
        let err = &result.errors[0];
        assert_eq!(err.code, ErrorCode::CommandNotFound);
        assert_eq!(err.server_name, "bad");
        assert_eq!(
            err.config_path,
            PathBuf::from("/home/u/.config/tern/mcp.json")
        );
        // The failed server never reaches the registry.
        assert!(manager.server_status("bad").is_none());
        assert!(manager.server_summary().is_empty());
        manager.cleanup().await;
    }

    #[tokio::test]
    async fn invalid_name_is_rejected_without_spawning() {
        let manager = McpManager::new();
        let started = Instant::now();
        let result = manager
            .load_from_config(&merged_with(vec![("a__b", stdio_config("cat"))]))
            .await;
        assert!(result.servers.is_empty());
        assert_eq!(result.errors[0].code, ErrorCode::InvalidConfig);
        assert!(started.elapsed().as_millis() < 100);
        manager.cleanup().await;
    }

    #[tokio::test]
    async fn missing_command_is_rejected_without_spawning() {
        let manager = McpManager::new();
        let result = manager
            .load_from_config(&merged_with(vec![("fs", stdio_config(""))]))
            .await;
        assert_eq!(result.errors[0].code, ErrorCode::MissingCommand);
        manager.cleanup().await;
    }

    #[tokio::test]
    async fn call_without_separator_is_tool_not_found() {
        let manager = McpManager::new();
        let cancel = CancellationToken::new();
        let outcome = manager
            .call_tool("plainname", serde_json::json!({}), &cancel)
            .await;
        assert!(!outcome.success);
        let err = outcome.error.unwrap();
        assert_eq!(err.code, ErrorCode::ToolNotFound);
        assert!(err.message.contains("invalid tool name format"));
        // Rejected before any connection is consulted or created.
        assert!(manager.server_summary().is_empty());
    }

    #[tokio::test]
    async fn call_to_unknown_server_is_tool_not_found() {
        let manager = McpManager::new();
        let cancel = CancellationToken::new();
        let outcome = manager
            .call_tool("ghost__tool", serde_json::json!({}), &cancel)
            .await;
        assert!(!outcome.success);
        let err = outcome.error.unwrap();
        assert_eq!(err.code, ErrorCode::ToolNotFound);
        assert!(err.message.contains("ghost"));
        assert_eq!(outcome.metadata.server_name, "ghost");
        assert_eq!(outcome.metadata.tool_name, "tool");
    }

    #[tokio::test]
    async fn dispatch_routes_by_call_name() {
        let manager = McpManager::new();
        let cancel = CancellationToken::new();
        let call = ToolCall {
            id: "toolu_01".to_string(),
            name: "ghost__tool".to_string(),
            arguments: serde_json::json!({}),
        };
        let outcome = manager.dispatch_call(&call, &cancel).await;
        assert_eq!(outcome.error.unwrap().code, ErrorCode::ToolNotFound);
    }

    #[tokio::test]
    async fn cleanup_is_idempotent() {
        let manager = McpManager::new();
        manager.cleanup().await;
        manager.cleanup().await;
        assert!(manager.server_summary().is_empty());
        assert!(manager.get_tools().is_empty());
    }

    #[tokio::test]
    async fn find_tool_misses_on_empty_manager() {
        let manager = McpManager::new();
        assert!(manager.find_tool("github__list_repos").is_none());
        assert!(manager.tool_definitions().is_empty());
    }

    #[test]
    fn summary_lines_report_errors() {
        let result = LoadResult {
            servers: Vec::new(),
            errors: vec![ServerError::new(
                ErrorCode::CommandNotFound,
                "command not found",
                "bad",
                PathBuf::from("/work/.tern/mcp.json"),
            )],
            tool_count: 0,
            duration_ms: 3,
        };
        let lines = result.summary_lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("Warning: MCP server 'bad' failed to start"));
    }
}
