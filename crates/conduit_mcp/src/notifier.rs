//! Fan-out of connection state changes.
//!
//! Two channels back every notifier: a `watch` holding the full state map,
//! so anyone can read the current picture at any time, and a `broadcast` of
//! per-identifier deltas. Each delta carries a sequence number; subscribers
//! drop anything older than what they have already seen for that id, which
//! keeps per-id order intact even across a resync.

use std::collections::{BTreeMap, HashMap};

use conduit_core::{ConnectionSnapshot, StateEvent};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::debug;

/// Events buffered per subscriber before it is considered lagging.
pub const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
struct Published {
    seq: u64,
    snapshot: ConnectionSnapshot,
}

type StateMap = BTreeMap<String, Published>;

pub struct ChangeNotifier {
    events: broadcast::Sender<Published>,
    states: watch::Sender<StateMap>,
    seq: std::sync::atomic::AtomicU64,
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ChangeNotifier {
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        let (states, _) = watch::channel(StateMap::new());
        Self {
            events,
            states,
            seq: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Records `snapshot` as the newest state of its id and tells everyone.
    ///
    /// Callers publish changes for one id in the order they happened.
    pub(crate) fn publish(&self, snapshot: ConnectionSnapshot) {
        let seq = self.seq.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
        let published = Published { seq, snapshot };

        self.states.send_modify(|map| {
            map.insert(published.snapshot.id.clone(), published.clone());
        });

        debug!(
            server = %published.snapshot.id,
            status = %published.snapshot.status,
            seq,
            "state published"
        );
        // No receivers is fine.
        let _ = self.events.send(published);
    }

    /// Current state of every known id, ordered by id.
    pub fn snapshot(&self) -> Vec<ConnectionSnapshot> {
        self.states.borrow().values().map(|p| p.snapshot.clone()).collect()
    }

    pub fn subscribe(&self) -> StateSubscription {
        StateSubscription {
            events: self.events.subscribe(),
            states: self.states.subscribe(),
            seen: HashMap::new(),
        }
    }

    /// Runs `callback` for every event on a background task. The first call
    /// receives a [`StateEvent::Resync`] with the current states.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn subscribe_fn<F>(&self, mut callback: F) -> SubscriptionHandle
    where
        F: FnMut(StateEvent) + Send + 'static,
    {
        let mut subscription = self.subscribe();
        let initial = subscription.resync();
        let task = tokio::spawn(async move {
            callback(initial);
            while let Some(event) = subscription.recv().await {
                callback(event);
            }
        });
        SubscriptionHandle { task: Some(task) }
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }
}

/// A pull-based subscription.
pub struct StateSubscription {
    events: broadcast::Receiver<Published>,
    states: watch::Receiver<StateMap>,
    seen: HashMap<String, u64>,
}

impl StateSubscription {
    /// Current state of every known id, without waiting for a change.
    pub fn snapshot(&self) -> Vec<ConnectionSnapshot> {
        self.states.borrow().values().map(|p| p.snapshot.clone()).collect()
    }

    /// Full state as an event, marking everything in it as seen.
    fn resync(&mut self) -> StateEvent {
        let states = self.states.borrow().clone();
        for (id, published) in &states {
            let seen = self.seen.entry(id.clone()).or_insert(0);
            *seen = (*seen).max(published.seq);
        }
        StateEvent::resync(states.into_values().map(|p| p.snapshot).collect())
    }

    fn accept(&mut self, published: Published) -> Option<StateEvent> {
        let seen = self.seen.entry(published.snapshot.id.clone()).or_insert(0);
        if published.seq <= *seen {
            return None;
        }
        *seen = published.seq;
        Some(StateEvent::changed(published.snapshot))
    }

    /// Waits for the next change. Returns `None` once the notifier is gone.
    ///
    /// A subscriber that fell too far behind gets one
    /// [`StateEvent::Resync`] instead of the deltas it missed.
    pub async fn recv(&mut self) -> Option<StateEvent> {
        loop {
            match self.events.recv().await {
                Ok(published) => {
                    if let Some(event) = self.accept(published) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    debug!(missed, "subscriber lagged, resyncing");
                    return Some(self.resync());
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next change if one is already queued.
    pub fn try_recv(&mut self) -> Option<StateEvent> {
        loop {
            match self.events.try_recv() {
                Ok(published) => {
                    if let Some(event) = self.accept(published) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => return Some(self.resync()),
                Err(_) => return None,
            }
        }
    }
}

/// Keeps a callback subscription alive. Dropping it unsubscribes.
pub struct SubscriptionHandle {
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    pub fn unsubscribe(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::{ConnectionStatus, TransportDescriptor};

    fn snap(id: &str, status: ConnectionStatus) -> ConnectionSnapshot {
        ConnectionSnapshot::new(id, TransportDescriptor::stdio("srv", vec![])).with_status(status)
    }

    #[test]
    fn test_snapshot_without_subscribers() {
        let notifier = ChangeNotifier::default();
        notifier.publish(snap("b", ConnectionStatus::Running));
        notifier.publish(snap("a", ConnectionStatus::Connecting));
        notifier.publish(snap("a", ConnectionStatus::Error));

        let states = notifier.snapshot();
        assert_eq!(states.len(), 2);
        assert_eq!(states[0].id, "a");
        assert_eq!(states[0].status, ConnectionStatus::Error);
        assert_eq!(notifier.subscriber_count(), 0);
    }

    #[test]
    fn test_try_recv_in_order() {
        let notifier = ChangeNotifier::default();
        let mut sub = notifier.subscribe();
        notifier.publish(snap("a", ConnectionStatus::Connecting));
        notifier.publish(snap("a", ConnectionStatus::Running));

        assert_eq!(sub.try_recv().unwrap().status_of("a"), Some(ConnectionStatus::Connecting));
        assert_eq!(sub.try_recv().unwrap().status_of("a"), Some(ConnectionStatus::Running));
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn test_lagging_subscriber_resyncs_without_stale_events() {
        let notifier = ChangeNotifier::new(2);
        let mut sub = notifier.subscribe();
        notifier.publish(snap("a", ConnectionStatus::Connecting));
        notifier.publish(snap("a", ConnectionStatus::Running));
        notifier.publish(snap("a", ConnectionStatus::Stopping));
        notifier.publish(snap("a", ConnectionStatus::Stopped));

        match sub.try_recv().unwrap() {
            StateEvent::Resync { states } => {
                assert_eq!(states.len(), 1);
                assert_eq!(states[0].status, ConnectionStatus::Stopped);
            }
            other => panic!("expected resync, got {:?}", other),
        }
        // The retained deltas are older than the resync and must not surface.
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn test_late_subscriber_reads_current_state() {
        let notifier = ChangeNotifier::default();
        notifier.publish(snap("files", ConnectionStatus::Running));

        let sub = notifier.subscribe();
        assert_eq!(sub.snapshot()[0].status, ConnectionStatus::Running);
    }

    #[tokio::test]
    async fn test_recv_ends_when_notifier_dropped() {
        let notifier = ChangeNotifier::default();
        let mut sub = notifier.subscribe();
        notifier.publish(snap("a", ConnectionStatus::Running));
        drop(notifier);

        assert!(sub.recv().await.is_some());
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_callback_subscription_and_unsubscribe() {
        let notifier = ChangeNotifier::default();
        notifier.publish(snap("a", ConnectionStatus::Running));

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = notifier.subscribe_fn(move |event| {
            let _ = tx.send(event);
        });

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, StateEvent::Resync { ref states } if states.len() == 1));

        notifier.publish(snap("a", ConnectionStatus::Stopping));
        let next = rx.recv().await.unwrap();
        assert_eq!(next.status_of("a"), Some(ConnectionStatus::Stopping));

        handle.unsubscribe();
        tokio::task::yield_now().await;
        notifier.publish(snap("a", ConnectionStatus::Stopped));
        // The task is gone, so the sender it owned is dropped.
        assert!(rx.recv().await.is_none());
    }
}
