//! End-to-end flows through supervisor and router together.

use conduit_core::{ConnectionStatus, ToolInvocation, ToolKind, ToolOutcome};

use super::mock::{self, MockConnector, entries};
use crate::error::{RouterError, SupervisorError};

#[tokio::test]
async fn test_files_lifecycle() {
    let connector = MockConnector::new();
    let router = mock::router(&connector);
    let supervisor = router.supervisor().clone();

    let running = supervisor.connect("files", false).await.unwrap();
    assert_eq!(running.status, ConnectionStatus::Running);

    let resources = router.list_resources("files").await.unwrap();
    assert!(resources.success);
    let uris: Vec<_> = resources
        .data
        .unwrap()
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["uri"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(uris, vec!["file:///notes.md", "file:///todo.txt"]);

    let stopped = supervisor.disconnect("files").await.unwrap();
    assert_eq!(stopped.status, ConnectionStatus::Stopped);

    let err = router
        .invoke("files", ToolInvocation::new("read"))
        .await
        .unwrap_err();
    assert_eq!(err, RouterError::NotRunning("files".into()));
}

#[tokio::test]
async fn test_broken_server_is_retried() {
    let connector = MockConnector::new();
    let supervisor = mock::supervisor(&connector);

    let first = supervisor.connect("broken", false).await.unwrap_err();
    assert!(matches!(first, SupervisorError::TransportError { .. }));
    let state = supervisor.get_state("broken").await.unwrap();
    assert_eq!(state.status, ConnectionStatus::Error);
    assert!(state.last_error.is_some());
    let first_update = state.updated_at;

    let mut events = supervisor.subscribe();
    supervisor.connect("broken", false).await.unwrap_err();
    assert_eq!(connector.open_count(), 2);
    assert_eq!(entries(&connector.log), vec!["open:broken#1", "open:broken#2"]);

    // The retry went through connecting again.
    assert_eq!(events.try_recv().unwrap().status_of("broken"), Some(ConnectionStatus::Connecting));
    assert_eq!(events.try_recv().unwrap().status_of("broken"), Some(ConnectionStatus::Error));
    assert!(supervisor.get_state("broken").await.unwrap().updated_at >= first_update);
}

#[tokio::test]
async fn test_delete_all_needs_approval() {
    let connector = MockConnector::new();
    let router = mock::router(&connector);
    router.supervisor().connect("files", false).await.unwrap();

    for _ in 0..2 {
        let outcome = router
            .invoke("files", ToolInvocation::new("deleteAll"))
            .await
            .unwrap();
        let ToolOutcome::ApprovalRequired(request) = outcome else {
            panic!("deleteAll ran without approval");
        };
        assert_eq!(request.kind, Some(ToolKind::Write));
        assert_eq!(request.running_label.as_deref(), Some("Deleting everything"));
    }
    assert!(!entries(&connector.log).iter().any(|l| l.starts_with("call:")));

    let outcome = router
        .invoke("files", ToolInvocation::new("deleteAll").approve())
        .await
        .unwrap();
    let result = outcome.into_result().unwrap();
    assert!(result.success);
    assert_eq!(result.message.as_deref(), Some("Everything deleted"));
    assert_eq!(
        entries(&connector.log),
        vec!["open:files#1", "call:files#1:deleteAll"]
    );
}
