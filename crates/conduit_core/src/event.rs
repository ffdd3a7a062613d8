use serde::{Deserialize, Serialize};

use crate::connection::{ConnectionSnapshot, ConnectionStatus};

/// A change published to state subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateEvent {
    /// One identifier moved to a new status.
    Changed { snapshot: ConnectionSnapshot },

    /// Full state of every known identifier. Sent when a subscriber fell
    /// behind and its queued deltas were dropped.
    Resync { states: Vec<ConnectionSnapshot> },
}

impl StateEvent {
    pub fn changed(snapshot: ConnectionSnapshot) -> Self {
        StateEvent::Changed { snapshot }
    }

    pub fn resync(states: Vec<ConnectionSnapshot>) -> Self {
        StateEvent::Resync { states }
    }

    /// Status carried for `id`, if this event mentions it.
    pub fn status_of(&self, id: &str) -> Option<ConnectionStatus> {
        match self {
            StateEvent::Changed { snapshot } if snapshot.id == id => Some(snapshot.status),
            StateEvent::Changed { .. } => None,
            StateEvent::Resync { states } => {
                states.iter().find(|s| s.id == id).map(|s| s.status)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::TransportDescriptor;

    fn snapshot(id: &str, status: ConnectionStatus) -> ConnectionSnapshot {
        ConnectionSnapshot::new(id, TransportDescriptor::stdio("srv", vec![])).with_status(status)
    }

    #[test]
    fn test_changed_serialization() {
        let event = StateEvent::changed(snapshot("files", ConnectionStatus::Running));
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"changed""#));
        assert!(json.contains(r#""status":"running""#));
    }

    #[test]
    fn test_resync_serialization() {
        let event = StateEvent::resync(vec![
            snapshot("a", ConnectionStatus::Running),
            snapshot("b", ConnectionStatus::Error),
        ]);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"resync""#));
        assert!(json.contains(r#""id":"b""#));
    }

    #[test]
    fn test_status_of() {
        let event = StateEvent::changed(snapshot("files", ConnectionStatus::Stopped));
        assert_eq!(event.status_of("files"), Some(ConnectionStatus::Stopped));
        assert_eq!(event.status_of("other"), None);

        let resync = StateEvent::resync(vec![snapshot("b", ConnectionStatus::Error)]);
        assert_eq!(resync.status_of("b"), Some(ConnectionStatus::Error));
        assert_eq!(resync.status_of("files"), None);
    }
}
