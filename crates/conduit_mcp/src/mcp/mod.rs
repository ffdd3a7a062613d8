//! Model Context Protocol (MCP) client support.
//!
//! # Transports
//!
//! - **stdio**: Local MCP server processes via stdin/stdout
//! - **http**: Remote MCP servers via HTTP POST
//!
//! # Architecture
//!
//! - **protocol**: JSON-RPC types for MCP communication
//! - **transport**: Transport abstraction (stdio, HTTP)
//! - **config**: Server registry and persistence
//! - **client**: Connection trait, connector and the concrete client
//! - **error**: Error types for MCP operations

pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod transport;

pub use client::{Connector, McpClient, McpConnection, McpConnector};
pub use config::{
    ConfigError, FileRegistry, McpAuthConfig, McpServerConfig, McpServersConfig, PolicyConfig,
    ServerRegistry, default_config_path,
};
pub use error::{McpError, McpResult};
pub use protocol::{
    CallToolResult, Content, Implementation, InitializeResult, ReadResourceResult, Resource,
    ResourceContents, ServerCapabilities, Tool,
};
pub use transport::{HttpTransport, StdioTransport, TransportEnum, TransportType};
