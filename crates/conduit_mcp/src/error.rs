use thiserror::Error;

/// Failures of supervisor operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SupervisorError {
    /// The registry has no server with this id.
    #[error("No server configured with id '{0}'")]
    ConfigNotFound(String),

    /// The registry itself could not be read.
    #[error("Server registry unavailable: {0}")]
    Registry(String),

    /// Opening (or talking to) the server failed. Also recorded as the
    /// entry's `last_error`.
    #[error("Server '{id}' failed: {message}")]
    TransportError { id: String, message: String },

    /// The entry exists but is not `running`.
    #[error("Server '{0}' is not running")]
    NotRunning(String),

    /// The supervisor has never seen this id.
    #[error("Server '{0}' has never been connected")]
    NotFound(String),

    /// A disconnect arrived while this connect was still in flight.
    #[error("Connect to '{0}' was cancelled")]
    Cancelled(String),
}

impl SupervisorError {
    pub fn transport(id: impl Into<String>, message: impl Into<String>) -> Self {
        SupervisorError::TransportError {
            id: id.into(),
            message: message.into(),
        }
    }
}

/// Failures the router reports instead of a tool result.
///
/// These are caller mistakes or routing conditions. A tool that ran and
/// failed is a `ToolInvocationResult` with `success: false`, not an error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouterError {
    #[error("Unknown server '{0}'")]
    UnknownServer(String),

    #[error("Server '{0}' is not running")]
    NotRunning(String),

    #[error("Invalid invocation: {0}")]
    InvalidInvocation(String),

    #[error("Server registry unavailable: {0}")]
    Registry(String),
}

impl From<conduit_core::CoreError> for RouterError {
    fn from(err: conduit_core::CoreError) -> Self {
        match err {
            conduit_core::CoreError::InvalidInvocation(msg) => RouterError::InvalidInvocation(msg),
            other => RouterError::InvalidInvocation(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_server() {
        assert_eq!(
            SupervisorError::transport("broken", "spawn failed").to_string(),
            "Server 'broken' failed: spawn failed"
        );
        assert_eq!(RouterError::NotRunning("files".into()).to_string(), "Server 'files' is not running");
        assert_eq!(RouterError::UnknownServer("x".into()).to_string(), "Unknown server 'x'");
    }

    #[test]
    fn test_core_error_maps_to_invalid_invocation() {
        let core = conduit_core::CoreError::InvalidInvocation("tool name is empty".into());
        assert_eq!(
            RouterError::from(core),
            RouterError::InvalidInvocation("tool name is empty".into())
        );
    }
}
