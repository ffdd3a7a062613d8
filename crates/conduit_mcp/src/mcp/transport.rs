//! MCP Transport Abstraction
//!
//! Supported transports:
//! - **Stdio**: a child process speaking newline-delimited JSON-RPC on
//!   stdin/stdout
//! - **Http**: JSON-RPC bodies POSTed to a remote endpoint
//!
//! Both take `&self` for every request, so one connection can serve several
//! callers at once. The [`TransportEnum`] wraps both for polymorphic use.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use reqwest::Client as HttpClient;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::mcp::error::McpError;
use crate::mcp::protocol::{JsonRpcRequest, JsonRpcResponse};

/// How long a stdio server gets to exit on its own after stdin is closed.
const EXIT_GRACE: Duration = Duration::from_secs(2);

type PendingMap = Arc<StdMutex<HashMap<u64, oneshot::Sender<Result<JsonValue, McpError>>>>>;

/// Transport type configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    /// Local process via stdin/stdout
    #[default]
    Stdio,
    /// Remote endpoint over HTTP
    #[serde(alias = "sse")]
    Http,
}

impl std::fmt::Display for TransportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportType::Stdio => write!(f, "stdio"),
            TransportType::Http => write!(f, "http"),
        }
    }
}

/// Enum wrapper for transport implementations.
pub enum TransportEnum {
    Stdio(StdioTransport),
    Http(HttpTransport),
}

impl TransportEnum {
    /// Sends a request and decodes its result as `T`.
    pub async fn send_request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<JsonValue>,
    ) -> Result<T, McpError> {
        let raw = match self {
            TransportEnum::Stdio(t) => t.request(method, params).await?,
            TransportEnum::Http(t) => t.request(method, params).await?,
        };
        Ok(serde_json::from_value(raw)?)
    }

    /// Sends a notification.
    pub async fn send_notification(&self, method: &str, params: Option<JsonValue>) -> Result<(), McpError> {
        match self {
            TransportEnum::Stdio(t) => t.notify(method, params).await,
            TransportEnum::Http(t) => t.notify(method, params).await,
        }
    }

    /// Closes the transport. Idempotent.
    pub async fn close(&self) -> Result<(), McpError> {
        match self {
            TransportEnum::Stdio(t) => t.close().await,
            TransportEnum::Http(t) => t.close().await,
        }
    }

    pub fn is_closed(&self) -> bool {
        match self {
            TransportEnum::Stdio(t) => t.is_closed(),
            TransportEnum::Http(t) => t.is_closed(),
        }
    }

    /// Resolves once the transport is closed, from either side.
    pub async fn closed(&self) {
        match self {
            TransportEnum::Stdio(t) => t.closed().await,
            TransportEnum::Http(t) => t.closed().await,
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, TransportEnum::Http(_))
    }
}

fn rpc_error(error: crate::mcp::protocol::JsonRpcErrorObject) -> McpError {
    McpError::JsonRpc {
        code: error.code,
        message: error.message,
    }
}

fn lock_pending(
    pending: &PendingMap,
) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<Result<JsonValue, McpError>>>> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Removes a pending entry when the waiting caller goes away early
/// (timeout or cancellation), so late responses are dropped cleanly.
struct PendingSlot {
    pending: PendingMap,
    id: u64,
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        lock_pending(&self.pending).remove(&self.id);
    }
}

// =============================================================================
// Stdio
// =============================================================================

/// Stdio-based transport for local MCP server processes.
///
/// A background reader task owns stdout and routes each response to the
/// caller waiting on its request id.
pub struct StdioTransport {
    server_id: String,
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<ChildStdin>>,
    pending: PendingMap,
    next_id: AtomicU64,
    closed: Arc<watch::Sender<bool>>,
    reader: StdMutex<Option<JoinHandle<()>>>,
}

impl StdioTransport {
    /// Spawns the server process and starts the reader task.
    ///
    /// The child is killed when the transport is dropped, so abandoning a
    /// half-finished connect never leaks a process.
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        working_dir: Option<&Path>,
        server_id: &str,
    ) -> Result<Self, McpError> {
        info!("[MCP:{}] Starting server process: {} {:?}", server_id, command, args);

        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| McpError::StartFailed(format!("Failed to start '{}': {}", command, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::StartFailed("Could not capture stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::StartFailed("Could not capture stdout".to_string()))?;

        let pending: PendingMap = Arc::new(StdMutex::new(HashMap::new()));
        let closed = Arc::new(watch::Sender::new(false));
        let reader = tokio::spawn(read_loop(
            server_id.to_string(),
            stdout,
            pending.clone(),
            closed.clone(),
        ));

        Ok(Self {
            server_id: server_id.to_string(),
            child: Mutex::new(Some(child)),
            stdin: Mutex::new(Some(stdin)),
            pending,
            next_id: AtomicU64::new(1),
            closed,
            reader: StdMutex::new(Some(reader)),
        })
    }

    async fn write_line(&self, line: &str) -> Result<(), McpError> {
        let mut stdin = self.stdin.lock().await;
        let pipe = stdin
            .as_mut()
            .ok_or_else(|| McpError::Closed(format!("server '{}' is shut down", self.server_id)))?;

        let written = async {
            pipe.write_all(line.as_bytes()).await?;
            pipe.write_all(b"\n").await?;
            pipe.flush().await
        }
        .await;

        written.map_err(|e| {
            self.closed.send_replace(true);
            McpError::Closed(format!("write to '{}' failed: {}", self.server_id, e))
        })
    }

    /// Sends a request and waits for the matching response.
    pub async fn request(&self, method: &str, params: Option<JsonValue>) -> Result<JsonValue, McpError> {
        if self.is_closed() {
            return Err(McpError::Closed(format!("server '{}' exited", self.server_id)));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest::new(id, method, params);
        let line = serde_json::to_string(&request)?;

        let (tx, rx) = oneshot::channel();
        lock_pending(&self.pending).insert(id, tx);
        let _slot = PendingSlot {
            pending: self.pending.clone(),
            id,
        };
        // The reader may have drained the map between the check above and
        // the insert.
        if self.is_closed() {
            return Err(McpError::Closed(format!("server '{}' exited", self.server_id)));
        }

        debug!("[MCP:{}] Sending: {}", self.server_id, line);
        self.write_line(&line).await?;

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(McpError::Closed(format!(
                "server '{}' exited before answering '{}'",
                self.server_id, method
            ))),
        }
    }

    /// Sends a notification (no response expected).
    pub async fn notify(&self, method: &str, params: Option<JsonValue>) -> Result<(), McpError> {
        let line = serde_json::to_string(&JsonRpcRequest::notification(method, params))?;
        debug!("[MCP:{}] Notify: {}", self.server_id, line);
        self.write_line(&line).await
    }

    /// Closes stdin, gives the process a moment to exit, then kills it.
    pub async fn close(&self) -> Result<(), McpError> {
        self.closed.send_replace(true);
        drop(self.stdin.lock().await.take());

        let Some(mut child) = self.child.lock().await.take() else {
            return Ok(());
        };

        match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
            Ok(Ok(status)) => debug!("[MCP:{}] Process exited: {}", self.server_id, status),
            Ok(Err(e)) => warn!("[MCP:{}] Waiting for process failed: {}", self.server_id, e),
            Err(_) => {
                child.kill().await?;
                debug!("[MCP:{}] Process killed", self.server_id);
            }
        }

        if let Some(reader) = self.reader.lock().unwrap_or_else(|p| p.into_inner()).take() {
            reader.abort();
        }
        fail_pending(&self.pending, "transport closed");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves when the process exits or the transport is closed.
    pub async fn closed(&self) {
        wait_closed(&self.closed).await
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.lock().unwrap_or_else(|p| p.into_inner()).take() {
            reader.abort();
        }
    }
}

async fn wait_closed(closed: &watch::Sender<bool>) {
    let mut rx = closed.subscribe();
    // The sender outlives this borrow, so the only way out is `true`.
    let _ = rx.wait_for(|closed| *closed).await;
}

fn fail_pending(pending: &PendingMap, reason: &str) -> usize {
    let drained: Vec<_> = lock_pending(pending).drain().collect();
    let count = drained.len();
    for (_, tx) in drained {
        let _ = tx.send(Err(McpError::Closed(reason.to_string())));
    }
    count
}

async fn read_loop(server_id: String, stdout: ChildStdout, pending: PendingMap, closed: Arc<watch::Sender<bool>>) {
    let mut lines = BufReader::new(stdout).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("[MCP:{}] Read failed: {}", server_id, e);
                break;
            }
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let message: JsonValue = match serde_json::from_str(trimmed) {
            Ok(value) => value,
            Err(_) => {
                debug!("[MCP:{}] Skipping non-JSON output: {}", server_id, trimmed);
                continue;
            }
        };

        if message.get("method").is_some() {
            debug!("[MCP:{}] Ignoring server message: {}", server_id, trimmed);
            continue;
        }

        debug!("[MCP:{}] Received: {}", server_id, trimmed);
        dispatch(&server_id, &pending, message);
    }

    closed.send_replace(true);
    let failed = fail_pending(&pending, "server process exited");
    if failed > 0 {
        warn!("[MCP:{}] Failed {} pending requests: process exited", server_id, failed);
    } else {
        debug!("[MCP:{}] Output stream closed", server_id);
    }
}

fn dispatch(server_id: &str, pending: &PendingMap, message: JsonValue) {
    let response: JsonRpcResponse<JsonValue> = match serde_json::from_value(message) {
        Ok(response) => response,
        Err(e) => {
            debug!("[MCP:{}] Malformed response: {}", server_id, e);
            return;
        }
    };

    let Some(id) = response.id else {
        debug!("[MCP:{}] Response without id dropped", server_id);
        return;
    };

    let Some(tx) = lock_pending(pending).remove(&id) else {
        debug!("[MCP:{}] No caller waiting for response {}", server_id, id);
        return;
    };

    if tx.send(response.into_result().map_err(rpc_error)).is_err() {
        debug!("[MCP:{}] Response receiver dropped for request {}", server_id, id);
    }
}

// =============================================================================
// Http
// =============================================================================

/// HTTP transport for remote MCP servers.
///
/// Answers may come back as a plain JSON body or as a short event stream
/// whose `data:` lines carry the response.
pub struct HttpTransport {
    http_client: HttpClient,
    url: String,
    headers: reqwest::header::HeaderMap,
    next_id: AtomicU64,
    server_id: String,
    session_id: StdMutex<Option<String>>,
    closed: watch::Sender<bool>,
}

const SESSION_HEADER: &str = "mcp-session-id";

impl HttpTransport {
    pub fn new(url: &str, headers: reqwest::header::HeaderMap, server_id: &str) -> Self {
        Self {
            http_client: HttpClient::new(),
            url: url.trim_end_matches('/').to_string(),
            headers,
            next_id: AtomicU64::new(1),
            server_id: server_id.to_string(),
            session_id: StdMutex::new(None),
            closed: watch::Sender::new(false),
        }
    }

    fn session(&self) -> Option<String> {
        self.session_id.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn build_request(&self) -> reqwest::RequestBuilder {
        let mut builder = self
            .http_client
            .post(&self.url)
            .headers(self.headers.clone())
            .header("Accept", "application/json, text/event-stream");
        if let Some(session) = self.session() {
            builder = builder.header(SESSION_HEADER, session);
        }
        builder
    }

    async fn post(&self, body: &JsonValue) -> Result<(String, String), McpError> {
        if self.is_closed() {
            return Err(McpError::Closed(format!("server '{}' is shut down", self.server_id)));
        }

        debug!("[MCP:{}] HTTP POST to: {}", self.server_id, self.url);

        let response = self
            .build_request()
            .json(body)
            .send()
            .await
            .map_err(|e| McpError::Protocol(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(McpError::AuthFailed(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(McpError::Protocol(format!("HTTP error {}: {}", status, error_text)));
        }

        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.lock().unwrap_or_else(|p| p.into_inner()) = Some(session.to_string());
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let text = response
            .text()
            .await
            .map_err(|e| McpError::Protocol(format!("Failed to read response: {}", e)))?;

        debug!("[MCP:{}] Response: {}", self.server_id, text);
        Ok((content_type, text))
    }

    pub async fn request(&self, method: &str, params: Option<JsonValue>) -> Result<JsonValue, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = serde_json::to_value(JsonRpcRequest::new(id, method, params))?;
        let (content_type, text) = self.post(&request).await?;

        let response = if content_type.starts_with("text/event-stream") {
            find_event_response(&text, id)?
        } else {
            serde_json::from_str::<JsonRpcResponse<JsonValue>>(&text)
                .map_err(|e| McpError::Protocol(format!("Invalid JSON response: {}", e)))?
        };

        response.into_result().map_err(rpc_error)
    }

    pub async fn notify(&self, method: &str, params: Option<JsonValue>) -> Result<(), McpError> {
        let notification = serde_json::to_value(JsonRpcRequest::notification(method, params))?;
        self.post(&notification).await?;
        Ok(())
    }

    pub async fn close(&self) -> Result<(), McpError> {
        self.closed.send_replace(true);
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// HTTP has no connection to lose; this only resolves after [`close`](Self::close).
    pub async fn closed(&self) {
        wait_closed(&self.closed).await
    }
}

/// Picks the response for `id` out of an event-stream body.
fn find_event_response(body: &str, id: u64) -> Result<JsonRpcResponse<JsonValue>, McpError> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .filter_map(|data| serde_json::from_str::<JsonRpcResponse<JsonValue>>(data.trim()).ok())
        .find(|response| response.id == Some(id))
        .ok_or_else(|| McpError::Protocol(format!("No response for request {} in event stream", id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_type_serialization() {
        assert_eq!(serde_json::to_string(&TransportType::Stdio).unwrap(), "\"stdio\"");
        assert_eq!(serde_json::to_string(&TransportType::Http).unwrap(), "\"http\"");

        let legacy: TransportType = serde_json::from_str("\"sse\"").unwrap();
        assert_eq!(legacy, TransportType::Http);
    }

    #[test]
    fn test_find_event_response() {
        let body = "event: message\n\
                    data: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/progress\"}\n\n\
                    event: message\n\
                    data: {\"jsonrpc\":\"2.0\",\"id\":7,\"result\":{\"ok\":true}}\n\n";
        let response = find_event_response(body, 7).unwrap();
        assert_eq!(response.into_result().unwrap()["ok"], true);

        assert!(find_event_response(body, 8).is_err());
    }

    #[test]
    fn test_dispatch_routes_by_id() {
        let pending: PendingMap = Arc::new(StdMutex::new(HashMap::new()));
        let (tx1, mut rx1) = oneshot::channel();
        let (tx2, mut rx2) = oneshot::channel();
        lock_pending(&pending).insert(1, tx1);
        lock_pending(&pending).insert(2, tx2);

        dispatch(
            "test",
            &pending,
            serde_json::json!({"jsonrpc": "2.0", "id": 2, "error": {"code": -32601, "message": "nope"}}),
        );
        dispatch(
            "test",
            &pending,
            serde_json::json!({"jsonrpc": "2.0", "id": 1, "result": {"tools": []}}),
        );

        assert!(rx1.try_recv().unwrap().is_ok());
        match rx2.try_recv().unwrap() {
            Err(McpError::JsonRpc { code, .. }) => assert_eq!(code, -32601),
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
        assert!(lock_pending(&pending).is_empty());
    }

    #[test]
    fn test_fail_pending_reports_closed() {
        let pending: PendingMap = Arc::new(StdMutex::new(HashMap::new()));
        let (tx, mut rx) = oneshot::channel();
        lock_pending(&pending).insert(9, tx);

        assert_eq!(fail_pending(&pending, "server process exited"), 1);
        assert!(matches!(rx.try_recv().unwrap(), Err(McpError::Closed(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdio_eof_fails_requests() {
        // `true` exits immediately without reading stdin.
        let transport = StdioTransport::spawn("true", &[], &HashMap::new(), None, "eof").unwrap();
        let err = transport.request("tools/list", None).await.unwrap_err();
        assert!(err.is_connection_lost());
        transport.close().await.unwrap();
        assert!(transport.is_closed());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdio_exit_resolves_closed() {
        let transport = StdioTransport::spawn("true", &[], &HashMap::new(), None, "exits").unwrap();
        tokio::time::timeout(Duration::from_secs(5), transport.closed())
            .await
            .expect("exit should be noticed without a request");
        assert!(transport.is_closed());
    }

    #[tokio::test]
    async fn test_http_closed_waits_for_close() {
        let transport = HttpTransport::new("http://localhost:1", Default::default(), "remote");
        assert!(!transport.is_closed());
        transport.close().await.unwrap();
        transport.closed().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdio_skips_noise_and_answers() {
        let script = r#"read line; echo "starting up"; echo '{"jsonrpc":"2.0","id":1,"result":{"pong":true}}'; sleep 1"#;
        let transport = StdioTransport::spawn(
            "sh",
            &["-c".to_string(), script.to_string()],
            &HashMap::new(),
            None,
            "echo",
        )
        .unwrap();

        let result = transport.request("ping", None).await.unwrap();
        assert_eq!(result["pong"], true);
        transport.close().await.unwrap();
    }
}
