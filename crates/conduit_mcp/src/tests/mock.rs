//! In-memory stand-ins for MCP servers.
//!
//! Servers are picked by id:
//! - `broken`: open always fails
//! - `hang`: open never finishes
//! - `dropout`: opens, then loses the connection while listing tools
//! - anything else opens and serves `files`-style tools and resources
//!
//! Every open and close is appended to a shared log as
//! `open:<id>#<n>` / `close:<id>#<n>`, where `n` counts opens per id, and
//! every tool call as `call:<id>#<n>:<tool>`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value as JsonValue, json};
use tokio::sync::{Notify, watch};

use crate::classifier::ToolClassifier;
use crate::mcp::client::{Connector, McpConnection};
use crate::mcp::config::{McpServerConfig, McpServersConfig};
use crate::mcp::error::{McpError, McpResult};
use crate::mcp::protocol::{CallToolResult, Content, ReadResourceResult, Resource, ResourceContents, Tool};
use crate::router::ToolRouter;
use crate::supervisor::Supervisor;

pub(crate) type EventLog = Arc<StdMutex<Vec<String>>>;

pub(crate) fn entries(log: &EventLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

#[derive(Default)]
pub(crate) struct MockConnector {
    pub opens: AtomicUsize,
    pub closes: Arc<AtomicUsize>,
    pub log: EventLog,
    serials: StdMutex<HashMap<String, usize>>,
    /// Signalled whenever an open starts.
    pub opening: Arc<Notify>,
    /// When set, opens wait for a permit before finishing.
    gate: StdMutex<Option<Arc<Notify>>>,
    /// When set, connections fail closes after recording them.
    pub failing_close: AtomicBool,
    /// Closed flag of the newest connection per id.
    newest: StdMutex<HashMap<String, Arc<watch::Sender<bool>>>>,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes every following open wait until the returned gate is notified.
    pub fn hold_opens(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Simulates the server going away on its own: the newest connection
    /// for `id` closes without `close` being called.
    pub fn kill(&self, id: &str) {
        self.record(format!("exit:{}", id));
        if let Some(closed) = self.newest.lock().unwrap().get(id) {
            closed.send_replace(true);
        }
    }

    fn record(&self, line: String) {
        self.log.lock().unwrap().push(line);
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, config: &McpServerConfig) -> McpResult<Box<dyn McpConnection>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let serial = {
            let mut serials = self.serials.lock().unwrap();
            let serial = serials.entry(config.id.clone()).or_insert(0);
            *serial += 1;
            *serial
        };
        self.record(format!("open:{}#{}", config.id, serial));
        self.opening.notify_one();

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        match config.id.as_str() {
            "broken" => Err(McpError::StartFailed("spawn refused".to_string())),
            "hang" => std::future::pending().await,
            id => {
                let closed = Arc::new(watch::Sender::new(false));
                self.newest.lock().unwrap().insert(id.to_string(), closed.clone());
                Ok(Box::new(MockConnection {
                    label: format!("{}#{}", id, serial),
                    drops_on_list: id == "dropout",
                    closed,
                    closes: self.closes.clone(),
                    log: self.log.clone(),
                    fail_close: self.failing_close.load(Ordering::SeqCst),
                }))
            }
        }
    }
}

pub(crate) struct MockConnection {
    label: String,
    drops_on_list: bool,
    closed: Arc<watch::Sender<bool>>,
    closes: Arc<AtomicUsize>,
    log: EventLog,
    fail_close: bool,
}

impl MockConnection {
    fn check_open(&self) -> McpResult<()> {
        if *self.closed.borrow() {
            return Err(McpError::Closed(format!("{} is closed", self.label)));
        }
        Ok(())
    }
}

#[async_trait]
impl McpConnection for MockConnection {
    async fn list_tools(&self) -> McpResult<Vec<Tool>> {
        self.check_open()?;
        if self.drops_on_list {
            self.closed.send_replace(true);
            return Err(McpError::Closed("server process exited".to_string()));
        }
        Ok(vec![
            Tool::simple("read_file", "Read a file"),
            Tool::simple("write_file", "Write a file"),
            Tool::simple("deleteAll", "Delete everything"),
        ])
    }

    async fn list_resources(&self) -> McpResult<Vec<Resource>> {
        self.check_open()?;
        Ok(vec![
            Resource::new("file:///notes.md", "notes").with_mime_type("text/markdown"),
            Resource::new("file:///todo.txt", "todo"),
        ])
    }

    async fn read_resource(&self, uri: &str) -> McpResult<ReadResourceResult> {
        self.check_open()?;
        if uri == "file:///missing" {
            return Err(McpError::JsonRpc {
                code: -32002,
                message: "Resource not found".to_string(),
            });
        }
        Ok(ReadResourceResult {
            contents: vec![ResourceContents::text(uri, format!("contents of {}", uri))],
        })
    }

    async fn call_tool(&self, name: &str, arguments: JsonValue) -> McpResult<CallToolResult> {
        self.check_open()?;
        self.log.lock().unwrap().push(format!("call:{}:{}", self.label, name));
        match name {
            "crash" => {
                self.closed.send_replace(true);
                Err(McpError::Closed("server process exited".to_string()))
            }
            "fail" => Err(McpError::JsonRpc {
                code: -32603,
                message: "internal failure".to_string(),
            }),
            "refuse" => Ok(CallToolResult::error("permission denied")),
            "slow" => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(CallToolResult::text("late"))
            }
            "pause" => {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(CallToolResult::text(format!("paused on {}", self.label)))
            }
            _ => Ok(CallToolResult {
                content: vec![Content::text(format!(
                    "{} ran on {}",
                    name, self.label
                ))],
                structured_content: Some(json!({ "arguments": arguments })),
                is_error: None,
            }),
        }
    }

    async fn close(&self) -> McpResult<()> {
        self.closed.send_replace(true);
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.log.lock().unwrap().push(format!("close:{}", self.label));
        if self.fail_close {
            return Err(McpError::Protocol("close refused".to_string()));
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

/// Registry with `files`, `other`, `broken`, `dropout` and `hang` (1s
/// connect timeout). Only `files` and `other` auto-start.
pub(crate) fn registry() -> Arc<McpServersConfig> {
    let mut config = McpServersConfig::new();
    config
        .add_server(McpServerConfig::new("files", "files-server"))
        .add_server(McpServerConfig::new("other", "other-server"))
        .add_server(McpServerConfig::new("broken", "broken-server").with_auto_start(false))
        .add_server(McpServerConfig::new("dropout", "dropout-server").with_auto_start(false))
        .add_server(
            McpServerConfig::new("hang", "hang-server")
                .with_connect_timeout(1)
                .with_call_timeout(1)
                .with_auto_start(false),
        );
    Arc::new(config)
}

pub(crate) fn supervisor(connector: &Arc<MockConnector>) -> Arc<Supervisor> {
    Arc::new(Supervisor::new(registry(), connector.clone()))
}

pub(crate) fn router(connector: &Arc<MockConnector>) -> ToolRouter {
    ToolRouter::new(supervisor(connector), test_classifier())
}

/// Built-in table plus `deleteAll` as a write tool.
pub(crate) fn test_classifier() -> ToolClassifier {
    ToolClassifier::new().with_policy(
        "deleteAll",
        conduit_core::ToolPolicy::write("Deleting everything", "Everything deleted", "Delete failed"),
    )
}
