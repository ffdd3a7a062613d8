//! MCP Client Implementation
//!
//! [`McpClient`] speaks to one server over stdio or HTTP. The rest of the
//! crate only sees it through the [`McpConnection`] trait, and creates it
//! through a [`Connector`], so tests can substitute both.

use std::collections::HashSet;
use std::sync::OnceLock;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use crate::mcp::config::McpServerConfig;
use crate::mcp::error::{McpError, McpResult};
use crate::mcp::protocol::{
    CallToolRequest, CallToolResult, ClientCapabilities, Implementation, InitializeParams,
    InitializeResult, ListResourcesResult, ListToolsResult, PaginatedRequest, ReadResourceRequest,
    ReadResourceResult, Resource, Tool,
};
use crate::mcp::transport::{HttpTransport, StdioTransport, TransportEnum, TransportType};

/// One live connection to an MCP server.
///
/// Every method may be slow and every method may fail. Implementations must
/// allow concurrent calls through a shared reference.
#[async_trait]
pub trait McpConnection: Send + Sync {
    async fn list_tools(&self) -> McpResult<Vec<Tool>>;

    async fn list_resources(&self) -> McpResult<Vec<Resource>>;

    async fn read_resource(&self, uri: &str) -> McpResult<ReadResourceResult>;

    async fn call_tool(&self, name: &str, arguments: JsonValue) -> McpResult<CallToolResult>;

    /// Shuts the connection down. Calling it twice is harmless.
    async fn close(&self) -> McpResult<()>;

    /// True once the connection can no longer serve requests.
    fn is_closed(&self) -> bool;

    /// Resolves once [`is_closed`](Self::is_closed) turns true, whether
    /// the server went away or [`close`](Self::close) was called.
    async fn closed(&self);
}

/// Opens connections from configuration.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Returns a ready-to-use (initialized) connection.
    async fn open(&self, config: &McpServerConfig) -> McpResult<Box<dyn McpConnection>>;
}

/// The production [`Connector`]: spawns or dials the server and performs the
/// `initialize` handshake.
#[derive(Debug, Default, Clone, Copy)]
pub struct McpConnector;

#[async_trait]
impl Connector for McpConnector {
    async fn open(&self, config: &McpServerConfig) -> McpResult<Box<dyn McpConnection>> {
        let client = McpClient::connect(config).await?;
        if let Err(e) = client.initialize().await {
            if let Err(close_err) = client.shutdown().await {
                debug!("[MCP:{}] Cleanup after failed handshake: {}", config.id, close_err);
            }
            return Err(e);
        }
        Ok(Box::new(client))
    }
}

/// MCP client for communicating with an MCP server.
///
/// # Example
///
/// ```ignore
/// use conduit_mcp::mcp::{McpClient, McpServerConfig};
///
/// let config = McpServerConfig::new("files", "files-server");
/// let client = McpClient::connect(&config).await?;
/// let info = client.initialize().await?;
/// println!("Connected to: {}", info.server_info.name);
///
/// for tool in client.list_tools().await? {
///     println!("{}", tool.name);
/// }
/// client.shutdown().await?;
/// # Ok::<(), conduit_mcp::mcp::McpError>(())
/// ```
pub struct McpClient {
    transport: TransportEnum,
    server_id: String,
    server_info: OnceLock<InitializeResult>,
}

impl McpClient {
    /// Opens the transport described by `config`. No protocol traffic yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be started, the auth header
    /// cannot be built, or the config names neither `url` nor `command`.
    pub async fn connect(config: &McpServerConfig) -> Result<Self, McpError> {
        info!("Connecting to MCP server: {} ({})", config.display_name(), config.id);

        config
            .validate()
            .map_err(|e| McpError::Config(e.to_string()))?;

        let transport = match (config.effective_transport(), &config.url) {
            (TransportType::Http, Some(url)) => Self::create_http_transport(config, url)?,
            (TransportType::Stdio, _) if !config.command.is_empty() => {
                Self::create_stdio_transport(config)?
            }
            _ => {
                return Err(McpError::Config(
                    "Either 'url' or 'command' must be specified".to_string(),
                ));
            }
        };

        Ok(Self {
            transport,
            server_id: config.id.clone(),
            server_info: OnceLock::new(),
        })
    }

    fn create_http_transport(config: &McpServerConfig, url: &str) -> Result<TransportEnum, McpError> {
        info!("[MCP:{}] Connecting to remote server: {}", config.id, url);

        let mut headers = reqwest::header::HeaderMap::new();

        if let Some(auth) = &config.auth {
            let header_value = auth
                .header_value()
                .map_err(|e| McpError::AuthFailed(e.to_string()))?;

            let header_name = reqwest::header::HeaderName::try_from(auth.header_name())
                .map_err(|e| McpError::Config(format!("Invalid header name: {}", e)))?;
            let header_value = reqwest::header::HeaderValue::try_from(&header_value)
                .map_err(|e| McpError::Config(format!("Invalid header value: {}", e)))?;

            headers.insert(header_name, header_value);
        }

        Ok(TransportEnum::Http(HttpTransport::new(url, headers, &config.id)))
    }

    fn create_stdio_transport(config: &McpServerConfig) -> Result<TransportEnum, McpError> {
        info!("[MCP:{}] Starting local server: {}", config.id, config.command);

        let transport = StdioTransport::spawn(
            &config.command,
            &config.args,
            &config.env,
            config.working_dir.as_deref(),
            &config.id,
        )?;

        Ok(TransportEnum::Stdio(transport))
    }

    /// Performs the `initialize` handshake and sends `notifications/initialized`.
    pub async fn initialize(&self) -> Result<InitializeResult, McpError> {
        let capabilities = ClientCapabilities::default();
        let client_info = Implementation::new("conduit", env!("CARGO_PKG_VERSION"));
        let params = InitializeParams::new(capabilities, client_info);

        let result: InitializeResult = self
            .transport
            .send_request("initialize", Some(serde_json::to_value(params)?))
            .await?;

        info!(
            "[MCP:{}] Initialized: {} v{} (protocol {})",
            self.server_id, result.server_info.name, result.server_info.version, result.protocol_version
        );

        self.transport
            .send_notification("notifications/initialized", None)
            .await?;

        let _ = self.server_info.set(result.clone());
        Ok(result)
    }

    fn ensure_initialized(&self) -> Result<(), McpError> {
        if self.server_info.get().is_none() {
            return Err(McpError::Protocol("Server not initialized".to_string()));
        }
        Ok(())
    }

    /// Calls a list method repeatedly until the server stops returning a
    /// cursor. A repeated cursor is a protocol error.
    async fn paginate<P, T>(
        &self,
        method: &str,
        split: impl Fn(P) -> (Vec<T>, Option<String>),
    ) -> Result<Vec<T>, McpError>
    where
        P: DeserializeOwned,
    {
        self.ensure_initialized()?;

        let mut items = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen = HashSet::new();

        loop {
            let params = cursor
                .clone()
                .map(|c| serde_json::to_value(PaginatedRequest { cursor: Some(c) }))
                .transpose()?;
            let page: P = self.transport.send_request(method, params).await?;
            let (mut batch, next) = split(page);
            items.append(&mut batch);

            match next {
                Some(next) if !seen.insert(next.clone()) => {
                    return Err(McpError::Protocol(format!("{} returned repeated cursor", method)));
                }
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Ok(items)
    }

    /// Lists all tools available on the server.
    pub async fn list_tools(&self) -> Result<Vec<Tool>, McpError> {
        let tools = self
            .paginate("tools/list", |page: ListToolsResult| (page.tools, page.next_cursor))
            .await?;
        debug!("[MCP:{}] Found {} tools", self.server_id, tools.len());
        Ok(tools)
    }

    /// Lists all resources the server advertises.
    pub async fn list_resources(&self) -> Result<Vec<Resource>, McpError> {
        self.ensure_initialized()?;
        let supported = self
            .server_info
            .get()
            .map(|info| info.capabilities.supports_resources())
            .unwrap_or(false);
        if !supported {
            debug!("[MCP:{}] Server does not offer resources", self.server_id);
            return Ok(Vec::new());
        }

        let resources = self
            .paginate("resources/list", |page: ListResourcesResult| {
                (page.resources, page.next_cursor)
            })
            .await?;
        debug!("[MCP:{}] Found {} resources", self.server_id, resources.len());
        Ok(resources)
    }

    pub async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult, McpError> {
        self.ensure_initialized()?;

        let request = ReadResourceRequest { uri: uri.to_string() };
        self.transport
            .send_request("resources/read", Some(serde_json::to_value(request)?))
            .await
    }

    /// Calls a tool on the server.
    ///
    /// A tool that reports `isError` still yields `Ok`; the flag is part of
    /// the result.
    pub async fn call_tool(&self, name: &str, arguments: JsonValue) -> Result<CallToolResult, McpError> {
        self.ensure_initialized()?;

        let request = CallToolRequest::with_arguments(name, arguments);
        let result: CallToolResult = self
            .transport
            .send_request("tools/call", Some(serde_json::to_value(request)?))
            .await?;

        if result.is_error() {
            warn!(
                "[MCP:{}] Tool '{}' returned error: {}",
                self.server_id,
                name,
                result.joined_text()
            );
        }

        Ok(result)
    }

    /// Shuts the transport down.
    pub async fn shutdown(&self) -> Result<(), McpError> {
        info!("[MCP:{}] Shutting down", self.server_id);
        self.transport.close().await
    }

    pub fn server_info(&self) -> Option<&InitializeResult> {
        self.server_info.get()
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn is_remote(&self) -> bool {
        self.transport.is_remote()
    }
}

#[async_trait]
impl McpConnection for McpClient {
    async fn list_tools(&self) -> McpResult<Vec<Tool>> {
        McpClient::list_tools(self).await
    }

    async fn list_resources(&self) -> McpResult<Vec<Resource>> {
        McpClient::list_resources(self).await
    }

    async fn read_resource(&self, uri: &str) -> McpResult<ReadResourceResult> {
        McpClient::read_resource(self, uri).await
    }

    async fn call_tool(&self, name: &str, arguments: JsonValue) -> McpResult<CallToolResult> {
        McpClient::call_tool(self, name, arguments).await
    }

    async fn close(&self) -> McpResult<()> {
        self.shutdown().await
    }

    fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }

    async fn closed(&self) {
        self.transport.closed().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_is_local() {
        let config = McpServerConfig::new("test", "test-server");
        assert!(config.is_local());
        assert!(!config.is_remote());
    }

    #[test]
    fn test_config_is_remote() {
        let config = McpServerConfig::remote("test", "https://api.example.com/mcp");
        assert!(config.is_remote());
        assert!(!config.is_local());
    }

    #[tokio::test]
    async fn test_connect_rejects_empty_config() {
        let config = McpServerConfig::new("empty", "");
        let err = McpClient::connect(&config).await.err().unwrap();
        assert!(matches!(err, McpError::Config(_)));
    }

    #[tokio::test]
    async fn test_connect_reports_missing_binary() {
        let config = McpServerConfig::new("ghost", "conduit-no-such-binary-4711");
        let err = McpConnector.open(&config).await.err().unwrap();
        assert!(matches!(err, McpError::StartFailed(_)));
    }

    #[tokio::test]
    async fn test_remote_requires_initialize() {
        let config = McpServerConfig::remote("remote", "http://127.0.0.1:9");
        let client = McpClient::connect(&config).await.unwrap();
        assert!(client.is_remote());
        let err = client.list_tools().await.unwrap_err();
        assert!(err.to_string().contains("not initialized"));
    }
}
