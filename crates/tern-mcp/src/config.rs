//! Configuration discovery, validation, and merging for MCP servers.
//!
//! Two config tiers are consulted: a user-global `mcp.json` under the Tern
//! config directory and a project-local `.tern/mcp.json` under the session's
//! working directory. Both share the same schema. The project tier wins on
//! name collisions, replacing the global entry wholesale.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::warn;

use tern_types::ErrorCode;

/// Default per-server timeout applied to connection and tool calls.
pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;
/// Smallest timeout a config may specify.
pub const MIN_TIMEOUT_MS: u64 = 1_000;

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_MS
}

/// Configuration for a single MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Command to run (e.g., "npx", "python"). Unused for remote servers.
    #[serde(default)]
    pub command: String,
    /// Arguments to pass to the command.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables to set for the server process.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Timeout for connection and tool calls in milliseconds.
    #[serde(rename = "timeout", default = "default_timeout")]
    pub timeout_ms: u64,
    /// Remote server URL. When set, the server is reached over HTTP instead
    /// of a spawned child process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Extra HTTP headers for remote servers.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
}

/// The on-disk shape of an `mcp.json` file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpConfigFile {
    #[serde(rename = "mcpServers", default)]
    pub mcp_servers: HashMap<String, ServerConfig>,
}

/// Which config tier a server definition came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Global,
    Project,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Global => f.write_str("global"),
            ConfigSource::Project => f.write_str("project"),
        }
    }
}

/// The two config tiers as read from disk, before merging.
#[derive(Debug, Default)]
pub struct DiscoveredConfigs {
    pub global: Option<McpConfigFile>,
    pub project: Option<McpConfigFile>,
    pub global_path: PathBuf,
    pub project_path: PathBuf,
}

/// The merged server set with per-server provenance.
#[derive(Debug, Clone, Default)]
pub struct MergedConfig {
    pub servers: HashMap<String, ServerConfig>,
    sources: HashMap<String, ConfigSource>,
    global_path: PathBuf,
    project_path: PathBuf,
}

impl MergedConfig {
    /// The tier that supplied `name`. Servers only appear in the map after a
    /// merge, so an unknown name defaults to the global tier.
    pub fn source(&self, name: &str) -> ConfigSource {
        self.sources
            .get(name)
            .copied()
            .unwrap_or(ConfigSource::Global)
    }

    /// Path of the config file behind a tier.
    pub fn config_path_for(&self, source: ConfigSource) -> &Path {
        match source {
            ConfigSource::Global => &self.global_path,
            ConfigSource::Project => &self.project_path,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }
}

/// A single validation failure inside a config file.
#[derive(Debug, Clone)]
pub struct ConfigViolation {
    pub code: ErrorCode,
    pub message: String,
}

/// Accumulated validation outcome for one config file.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<ConfigViolation>,
}

impl ValidationReport {
    pub fn messages(&self) -> Vec<String> {
        self.errors.iter().map(|e| e.message.clone()).collect()
    }
}

/// Server names namespace tool names, so they must stay unambiguous under
/// the `__` separator.
pub(crate) fn is_valid_server_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        && !name.contains("__")
}

/// Validate a parsed `mcp.json` document, accumulating every violation
/// rather than stopping at the first.
pub fn validate_config(value: &serde_json::Value) -> ValidationReport {
    let mut errors = Vec::new();

    let servers = match value.get("mcpServers") {
        None => {
            errors.push(ConfigViolation {
                code: ErrorCode::InvalidConfig,
                message: "missing \"mcpServers\" object".to_string(),
            });
            return ValidationReport {
                valid: false,
                errors,
            };
        }
        Some(v) => match v.as_object() {
            Some(map) => map,
            None => {
                errors.push(ConfigViolation {
                    code: ErrorCode::InvalidConfig,
                    message: "\"mcpServers\" must be an object".to_string(),
                });
                return ValidationReport {
                    valid: false,
                    errors,
                };
            }
        },
    };

    for (name, entry) in servers {
        if !is_valid_server_name(name) {
            errors.push(ConfigViolation {
                code: ErrorCode::InvalidConfig,
                message: format!(
                    "invalid server name '{name}': use letters, digits, '_' or '-', without '__'"
                ),
            });
        }

        let Some(server) = entry.as_object() else {
            errors.push(ConfigViolation {
                code: ErrorCode::InvalidConfig,
                message: format!("server '{name}' must be an object"),
            });
            continue;
        };

        let url = server.get("url");
        if let Some(url) = url {
            match url.as_str() {
                Some(u) if u.starts_with("http://") || u.starts_with("https://") => {}
                _ => errors.push(ConfigViolation {
                    code: ErrorCode::InvalidConfig,
                    message: format!("server '{name}' url must be an http(s) URL"),
                }),
            }
        }

        match server.get("command") {
            Some(cmd) => match cmd.as_str() {
                Some(c) if !c.is_empty() => {}
                Some(_) => errors.push(ConfigViolation {
                    code: ErrorCode::MissingCommand,
                    message: format!("server '{name}' has an empty command"),
                }),
                None => errors.push(ConfigViolation {
                    code: ErrorCode::InvalidConfig,
                    message: format!("server '{name}' command must be a string"),
                }),
            },
            None if url.is_none() => errors.push(ConfigViolation {
                code: ErrorCode::MissingCommand,
                message: format!("server '{name}' has no command"),
            }),
            None => {}
        }

        if let Some(args) = server.get("args") {
            let all_strings = args
                .as_array()
                .is_some_and(|a| a.iter().all(|v| v.is_string()));
            if !all_strings {
                errors.push(ConfigViolation {
                    code: ErrorCode::InvalidConfig,
                    message: format!("server '{name}' args must be an array of strings"),
                });
            }
        }

        if let Some(env) = server.get("env") {
            match env.as_object() {
                Some(map) => {
                    for (key, val) in map {
                        if !val.is_string() {
                            errors.push(ConfigViolation {
                                code: ErrorCode::InvalidEnvVar,
                                message: format!(
                                    "env var '{key}' for server '{name}' must be a string"
                                ),
                            });
                        }
                    }
                }
                None => errors.push(ConfigViolation {
                    code: ErrorCode::InvalidEnvVar,
                    message: format!("server '{name}' env must be an object"),
                }),
            }
        }

        if let Some(timeout) = server.get("timeout") {
            match timeout.as_u64() {
                Some(t) if t >= MIN_TIMEOUT_MS => {}
                Some(t) => errors.push(ConfigViolation {
                    code: ErrorCode::InvalidConfig,
                    message: format!(
                        "server '{name}' timeout {t}ms is below the {MIN_TIMEOUT_MS}ms minimum"
                    ),
                }),
                None => errors.push(ConfigViolation {
                    code: ErrorCode::InvalidConfig,
                    message: format!("server '{name}' timeout must be a number"),
                }),
            }
        }

        if let Some(headers) = server.get("headers") {
            let all_strings = headers
                .as_object()
                .is_some_and(|m| m.values().all(|v| v.is_string()));
            if !all_strings {
                errors.push(ConfigViolation {
                    code: ErrorCode::InvalidConfig,
                    message: format!("server '{name}' headers must be an object of strings"),
                });
            }
        }
    }

    ValidationReport {
        valid: errors.is_empty(),
        errors,
    }
}

/// Path of the user-global config file.
///
/// `TERN_CONFIG_DIR` overrides the platform config directory, mostly for
/// tests and sandboxed installs.
pub fn global_config_path() -> PathBuf {
    if let Ok(dir) = std::env::var("TERN_CONFIG_DIR") {
        return PathBuf::from(dir).join("mcp.json");
    }
    dirs_next::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tern")
        .join("mcp.json")
}

/// Path of the project-local config file under a working directory.
pub fn project_config_path(working_dir: &Path) -> PathBuf {
    working_dir.join(".tern").join("mcp.json")
}

/// Read both config tiers for a session rooted at `working_dir`.
pub async fn discover_configs(working_dir: &Path) -> DiscoveredConfigs {
    discover_configs_at(global_config_path(), project_config_path(working_dir)).await
}

/// Read both config tiers from explicit paths.
///
/// A missing file is normal and yields `None` silently; an unreadable or
/// invalid file is logged and also yields `None`, so one bad tier never
/// takes down the other.
pub async fn discover_configs_at(
    global_path: PathBuf,
    project_path: PathBuf,
) -> DiscoveredConfigs {
    let (global, project) = tokio::join!(
        load_config_file(&global_path),
        load_config_file(&project_path)
    );
    DiscoveredConfigs {
        global,
        project,
        global_path,
        project_path,
    }
}

async fn load_config_file(path: &Path) -> Option<McpConfigFile> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("Failed to read MCP config {}: {}", path.display(), e);
            return None;
        }
    };

    let value: serde_json::Value = match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(e) => {
            warn!("Ignoring malformed MCP config {}: {}", path.display(), e);
            return None;
        }
    };

    let report = validate_config(&value);
    if !report.valid {
        for message in report.messages() {
            warn!("Invalid MCP config {}: {}", path.display(), message);
        }
        return None;
    }

    match serde_json::from_value(value) {
        Ok(file) => Some(file),
        Err(e) => {
            warn!("Ignoring malformed MCP config {}: {}", path.display(), e);
            None
        }
    }
}

/// Merge the two tiers into one server map. Project entries replace global
/// entries of the same name in full; fields are never mixed across tiers.
pub fn merge_configs(discovered: DiscoveredConfigs) -> MergedConfig {
    let mut servers = HashMap::new();
    let mut sources = HashMap::new();

    if let Some(global) = discovered.global {
        for (name, config) in global.mcp_servers {
            sources.insert(name.clone(), ConfigSource::Global);
            servers.insert(name, config);
        }
    }
    if let Some(project) = discovered.project {
        for (name, config) in project.mcp_servers {
            sources.insert(name.clone(), ConfigSource::Project);
            servers.insert(name, config);
        }
    }

    MergedConfig {
        servers,
        sources,
        global_path: discovered.global_path,
        project_path: discovered.project_path,
    }
}
