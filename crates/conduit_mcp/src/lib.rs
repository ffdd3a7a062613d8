//! Supervision of MCP server connections and routing of tool calls.
//!
//! - [`supervisor::Supervisor`] turns registry entries into live, queryable
//!   connections.
//! - [`router::ToolRouter`] gates and routes tool and resource calls.
//! - [`notifier::ChangeNotifier`] fans state changes out to observers.
//! - [`classifier`] decides which tools may run unattended.
//! - [`mcp`] holds the protocol client and the server registry.

pub mod classifier;
pub mod error;
pub mod mcp;
pub mod notifier;
pub mod router;
pub mod supervisor;

#[cfg(test)]
mod tests;

pub use classifier::{ToolClassifier, classify};
pub use error::{RouterError, SupervisorError};
pub use mcp::{
    ConfigError, Connector, FileRegistry, McpConnection, McpConnector, McpError, McpServerConfig,
    McpServersConfig, ServerRegistry,
};
pub use notifier::{ChangeNotifier, StateSubscription, SubscriptionHandle};
pub use router::{RouterConfig, ToolRouter, UnclassifiedPolicy};
pub use supervisor::Supervisor;
