use thiserror::Error;

/// Failures talking to one MCP server.
#[derive(Error, Debug)]
pub enum McpError {
    #[error("Failed to start MCP server: {0}")]
    StartFailed(String),

    #[error("JSON-RPC error [{code}]: {message}")]
    JsonRpc { code: i32, message: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// The server went away: process exited, pipe closed or the transport was
    /// already shut down.
    #[error("Connection closed: {0}")]
    Closed(String),

    #[error("Request '{method}' timed out after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    /// Whether the connection that produced this error is unusable.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, McpError::Closed(_))
    }
}

/// Result type alias for MCP operations
pub type McpResult<T> = Result<T, McpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_rpc_display() {
        let err = McpError::JsonRpc {
            code: -32601,
            message: "Method not found".to_string(),
        };
        assert_eq!(err.to_string(), "JSON-RPC error [-32601]: Method not found");
    }

    #[test]
    fn test_connection_lost() {
        assert!(McpError::Closed("eof".into()).is_connection_lost());
        assert!(!McpError::Protocol("bad".into()).is_connection_lost());
    }
}
