use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of one server connection.
///
/// `absent` is not represented: an identifier that was never connected simply
/// has no snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connecting,
    Running,
    Stopping,
    Stopped,
    Error,
}

impl ConnectionStatus {
    /// Whether a fresh connect attempt should be made from this status.
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionStatus::Stopped | ConnectionStatus::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Running => "running",
            ConnectionStatus::Stopping => "stopping",
            ConnectionStatus::Stopped => "stopped",
            ConnectionStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a server is reached, echoed from its configuration.
///
/// Environment variables and credentials are deliberately left out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportDescriptor {
    Stdio { command: String, args: Vec<String> },
    Http { url: String },
}

impl TransportDescriptor {
    pub fn stdio(command: impl Into<String>, args: Vec<String>) -> Self {
        Self::Stdio {
            command: command.into(),
            args,
        }
    }

    pub fn http(url: impl Into<String>) -> Self {
        Self::Http { url: url.into() }
    }

    /// Short human-readable target: the command line or the URL.
    pub fn target(&self) -> String {
        match self {
            TransportDescriptor::Stdio { command, args } if args.is_empty() => command.clone(),
            TransportDescriptor::Stdio { command, args } => {
                format!("{} {}", command, args.join(" "))
            }
            TransportDescriptor::Http { url } => url.clone(),
        }
    }
}

/// Externally visible state of one connection.
///
/// This is the redacted view of the supervisor's internal record: it never
/// carries the client handle, so it can be cloned, serialized and sent to any
/// observer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSnapshot {
    pub id: String,
    pub status: ConnectionStatus,
    pub transport: TransportDescriptor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,
    /// Number of tools the server advertised when it came up.
    #[serde(default)]
    pub tool_count: usize,
    pub updated_at: DateTime<Utc>,
}

impl ConnectionSnapshot {
    pub fn new(id: impl Into<String>, transport: TransportDescriptor) -> Self {
        Self {
            id: id.into(),
            status: ConnectionStatus::Connecting,
            transport,
            last_error: None,
            connected_at: None,
            tool_count: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn with_status(mut self, status: ConnectionStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_running(&self) -> bool {
        self.status == ConnectionStatus::Running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&ConnectionStatus::Running).unwrap();
        assert_eq!(json, r#""running""#);

        let status: ConnectionStatus = serde_json::from_str(r#""stopping""#).unwrap();
        assert_eq!(status, ConnectionStatus::Stopping);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(ConnectionStatus::Stopped.is_terminal());
        assert!(ConnectionStatus::Error.is_terminal());
        assert!(!ConnectionStatus::Connecting.is_terminal());
        assert!(!ConnectionStatus::Running.is_terminal());
        assert!(!ConnectionStatus::Stopping.is_terminal());
    }

    #[test]
    fn test_transport_target() {
        let stdio = TransportDescriptor::stdio("npx", vec!["-y".into(), "server-files".into()]);
        assert_eq!(stdio.target(), "npx -y server-files");

        let bare = TransportDescriptor::stdio("files-server", Vec::new());
        assert_eq!(bare.target(), "files-server");

        let http = TransportDescriptor::http("https://mcp.example.com");
        assert_eq!(http.target(), "https://mcp.example.com");
    }

    #[test]
    fn test_snapshot_defaults() {
        let snapshot = ConnectionSnapshot::new("files", TransportDescriptor::http("http://x"));
        assert_eq!(snapshot.status, ConnectionStatus::Connecting);
        assert!(snapshot.last_error.is_none());
        assert!(snapshot.connected_at.is_none());
        assert!(!snapshot.is_running());
        assert!(snapshot.with_status(ConnectionStatus::Running).is_running());
    }

    #[test]
    fn test_snapshot_json_omits_empty_fields() {
        let snapshot = ConnectionSnapshot::new("files", TransportDescriptor::stdio("srv", vec![]));
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["id"], "files");
        assert_eq!(json["status"], "connecting");
        assert_eq!(json["transport"]["type"], "stdio");
        assert!(json.get("last_error").is_none());
        assert!(json.get("connected_at").is_none());

        let back: ConnectionSnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(back, snapshot);
    }
}
