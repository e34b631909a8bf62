//! Transports for MCP server communication.
//!
//! Stdio servers are spawned as child processes and spoken to over
//! stdin/stdout with newline-delimited JSON-RPC messages. Remote servers are
//! reached by POSTing each message to their configured URL.

use crate::config::ServerConfig;
use crate::error::McpError;
use crate::jsonrpc::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;

/// Either transport behind one request/notification surface.
pub enum Transport {
    Stdio(StdioTransport),
    Http(HttpTransport),
}

impl Transport {
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, McpError> {
        match self {
            Transport::Stdio(t) => t.send_request(method, params).await,
            Transport::Http(t) => t.send_request(method, params).await,
        }
    }

    pub async fn send_notification(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        match self {
            Transport::Stdio(t) => t.send_notification(method, params).await,
            Transport::Http(t) => t.send_notification(method, params).await,
        }
    }

    pub async fn shutdown(self) {
        match self {
            Transport::Stdio(t) => t.shutdown().await,
            Transport::Http(_) => {}
        }
    }
}

/// Async stdio transport for communicating with an MCP server process.
pub struct StdioTransport {
    next_id: AtomicU64,
    write_tx: mpsc::Sender<String>,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>,
    reader_handle: JoinHandle<()>,
    writer_handle: JoinHandle<()>,
    child: Arc<Mutex<Child>>,
    timeout_ms: u64,
}

impl StdioTransport {
    /// Spawn a child process and start background reader/writer tasks.
    pub fn spawn(name: &str, config: &ServerConfig) -> Result<Self, McpError> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                McpError::CommandNotFound {
                    name: name.to_string(),
                    command: config.command.clone(),
                }
            } else {
                McpError::SpawnFailed {
                    name: name.to_string(),
                    source: e,
                }
            }
        })?;

        let stdin = child.stdin.take().expect("stdin was piped");
        let stdout = child.stdout.take().expect("stdout was piped");

        let pending: Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>> =
            Arc::new(Mutex::new(HashMap::new()));

        // Writer task: drains channel and writes to child stdin
        let (write_tx, mut write_rx) = mpsc::channel::<String>(64);
        let writer_handle = tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(msg) = write_rx.recv().await {
                if stdin.write_all(msg.as_bytes()).await.is_err() {
                    break;
                }
                if stdin.write_all(b"\n").await.is_err() {
                    break;
                }
                if stdin.flush().await.is_err() {
                    break;
                }
            }
        });

        // Reader task: reads lines from stdout, parses JSON-RPC, dispatches
        let pending_for_reader = Arc::clone(&pending);
        let server_name = name.to_string();
        let reader_handle = tokio::spawn(async move {
            let reader = BufReader::new(stdout);
            let mut lines = reader.lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                let resp: JsonRpcResponse = match serde_json::from_str(&line) {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!("Unparseable response from '{server_name}': {e}: {line}");
                        continue;
                    }
                };
                if let Some(id) = resp.id {
                    let mut pending = pending_for_reader.lock().await;
                    if let Some(tx) = pending.remove(&id) {
                        let _ = tx.send(resp);
                    }
                }
                // Notifications from server (no id) are currently ignored
            }
        });

        Ok(Self {
            next_id: AtomicU64::new(1),
            write_tx,
            pending,
            reader_handle,
            writer_handle,
            child: Arc::new(Mutex::new(child)),
            timeout_ms: config.timeout_ms,
        })
    }

    /// Send a JSON-RPC request and wait for the response.
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(id, method, params);
        let serialized = serde_json::to_string(&request)?;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(id, tx);
        }

        self.write_tx
            .send(serialized)
            .await
            .map_err(|_| McpError::ChannelClosed)?;

        match tokio::time::timeout(std::time::Duration::from_millis(self.timeout_ms), rx).await {
            Ok(Ok(resp)) => Ok(resp),
            // The reader task dropped the sender, so the process is gone.
            Ok(Err(_)) => Err(McpError::ChannelClosed),
            Err(_) => {
                // Clean up pending entry on timeout
                let mut pending = self.pending.lock().await;
                pending.remove(&id);
                Err(McpError::Timeout {
                    method: method.to_string(),
                    timeout_ms: self.timeout_ms,
                })
            }
        }
    }

    /// Send a JSON-RPC notification (fire-and-forget, no response expected).
    pub async fn send_notification(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        let notification = JsonRpcNotification::new(method, params);
        let serialized = serde_json::to_string(&notification)?;

        self.write_tx
            .send(serialized)
            .await
            .map_err(|_| McpError::ChannelClosed)?;

        Ok(())
    }

    /// Shut down the transport: drop the write channel, wait briefly, then kill.
    pub async fn shutdown(self) {
        // Drop write channel to send EOF to child stdin
        drop(self.write_tx);

        let child = self.child;

        // Give the child 5 seconds to exit gracefully
        let graceful = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            let mut child = child.lock().await;
            let _ = child.wait().await;
        })
        .await;

        if graceful.is_err() {
            // Force kill if it didn't exit
            let mut child = child.lock().await;
            let _ = child.kill().await;
        }

        self.reader_handle.abort();
        self.writer_handle.abort();
    }
}

/// HTTP transport for remote MCP servers.
pub struct HttpTransport {
    next_id: AtomicU64,
    http: reqwest::Client,
    url: String,
    headers: HeaderMap,
    timeout_ms: u64,
}

impl HttpTransport {
    /// Build a client for a remote server URL.
    pub fn connect(name: &str, config: &ServerConfig) -> Result<Self, McpError> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| McpError::Protocol(format!("server '{name}' has no url")))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        for (key, value) in &config.headers {
            let header_name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| McpError::Http(format!("invalid header '{key}': {e}")))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|e| McpError::Http(format!("invalid value for header '{key}': {e}")))?;
            headers.insert(header_name, header_value);
        }

        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| McpError::Http(e.to_string()))?;

        Ok(Self {
            next_id: AtomicU64::new(1),
            http,
            url,
            headers,
            timeout_ms: config.timeout_ms,
        })
    }

    fn map_error(&self, method: &str, e: reqwest::Error) -> McpError {
        if e.is_timeout() {
            McpError::Timeout {
                method: method.to_string(),
                timeout_ms: self.timeout_ms,
            }
        } else {
            McpError::Http(e.to_string())
        }
    }

    /// POST a JSON-RPC request and parse the response body.
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(id, method, params);

        let response = self
            .http
            .post(&self.url)
            .headers(self.headers.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_error(method, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(McpError::Http(format!(
                "server returned HTTP {status} for '{method}'"
            )));
        }

        response
            .json::<JsonRpcResponse>()
            .await
            .map_err(|e| self.map_error(method, e))
    }

    /// POST a JSON-RPC notification; the response body is discarded.
    pub async fn send_notification(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        let notification = JsonRpcNotification::new(method, params);
        self.http
            .post(&self.url)
            .headers(self.headers.clone())
            .json(&notification)
            .send()
            .await
            .map_err(|e| self.map_error(method, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stdio_config(command: &str, args: &[&str], timeout_ms: u64) -> ServerConfig {
        ServerConfig {
            command: command.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            env: HashMap::new(),
            timeout_ms,
            url: None,
            headers: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn spawn_echo_process() {
        // Use `cat` as a simple echo process
        let transport = StdioTransport::spawn("echo", &stdio_config("cat", &[], 5000));
        assert!(transport.is_ok());
        let transport = transport.unwrap();
        transport.shutdown().await;
    }

    #[tokio::test]
    async fn spawn_nonexistent_command_is_classified() {
        let result = StdioTransport::spawn(
            "ghost",
            &stdio_config("this_command_does_not_exist_xyz123", &[], 5000),
        );
        match result {
            Err(McpError::CommandNotFound { name, command }) => {
                assert_eq!(name, "ghost");
                assert_eq!(command, "this_command_does_not_exist_xyz123");
            }
            Err(other) => panic!("Expected CommandNotFound, got: {other:?}"),
            Ok(_) => panic!("Expected error, got Ok"),
        }
    }

    #[tokio::test]
    async fn request_response_roundtrip_with_mock() {
        // Create a mock MCP server using a bash script that echoes JSON-RPC responses
        let script = r#"while IFS= read -r line; do id=$(echo "$line" | python3 -c "import sys,json; print(json.loads(sys.stdin.read())['id'])"); echo "{\"jsonrpc\":\"2.0\",\"id\":$id,\"result\":{\"ok\":true}}"; done"#;
        let transport = StdioTransport::spawn("mock", &stdio_config("bash", &["-c", script], 5000));

        if transport.is_err() {
            // Skip test if bash/python3 not available
            return;
        }
        let transport = transport.unwrap();

        let resp = transport
            .send_request("test/method", Some(serde_json::json!({})))
            .await;
        assert!(resp.is_ok());
        let resp = resp.unwrap();
        assert_eq!(resp.result.unwrap()["ok"], true);

        transport.shutdown().await;
    }

    #[tokio::test]
    async fn notification_does_not_block() {
        let transport = StdioTransport::spawn("echo", &stdio_config("cat", &[], 5000)).unwrap();

        let result = transport
            .send_notification("notifications/initialized", None)
            .await;
        assert!(result.is_ok());

        transport.shutdown().await;
    }

    #[tokio::test]
    async fn timeout_fires_on_unresponsive_server() {
        // `sleep` never writes to stdout, so requests will time out
        let transport =
            StdioTransport::spawn("slow", &stdio_config("sleep", &["10"], 1000)).unwrap();

        let result = transport
            .send_request("test/method", Some(serde_json::json!({})))
            .await;
        assert!(result.is_err());
        match result.unwrap_err() {
            McpError::Timeout { method, timeout_ms } => {
                assert_eq!(method, "test/method");
                assert_eq!(timeout_ms, 1000);
            }
            other => panic!("Expected Timeout, got: {other:?}"),
        }

        transport.shutdown().await;
    }

    #[test]
    fn http_connect_rejects_bad_header_name() {
        let mut config = stdio_config("", &[], 5000);
        config.url = Some("https://mcp.example.com/rpc".to_string());
        config
            .headers
            .insert("bad header".to_string(), "v".to_string());
        match HttpTransport::connect("remote", &config) {
            Err(McpError::Http(msg)) => assert!(msg.contains("bad header")),
            other => panic!("Expected Http error, got: {:?}", other.is_ok()),
        }
    }

    #[test]
    fn http_connect_requires_url() {
        let config = stdio_config("", &[], 5000);
        assert!(matches!(
            HttpTransport::connect("remote", &config),
            Err(McpError::Protocol(_))
        ));
    }
}
