//! Connection Supervisor
//!
//! Owns the map from server id to connection state and the only live handle
//! to each server. Operations on one id are serialized through a per-id
//! async mutex; different ids never wait for each other.
//!
//! Concurrent `connect` calls for the same id collapse: each caller notes the
//! attempt counter before queueing on the id's lock, and a caller that finds
//! the counter moved on while it waited adopts that attempt's outcome
//! instead of opening a second connection.
//!
//! A `disconnect` racing an in-flight connect cancels it through the
//! attempt's [`CancellationToken`]. The open future is dropped (for stdio
//! servers that kills the child); a client that finished opening before the
//! cancellation was seen is closed and the entry ends `stopped`.
//!
//! Every running client has a watcher task waiting on
//! [`McpConnection::closed`]. A server that goes away while idle moves its
//! entry to `error` without anyone having to call it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex, Weak};

use chrono::Utc;
use conduit_core::{ConnectionSnapshot, ConnectionStatus, TransportDescriptor};
use conduit_observability::{record_error, server_span};
use futures::future::join_all;
use tokio::sync::{Mutex, RwLock};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, warn};

use crate::error::SupervisorError;
use crate::mcp::client::{Connector, McpConnection, McpConnector};
use crate::mcp::config::{ConfigError, McpServerConfig, ServerRegistry};
use crate::mcp::error::McpResult;
use crate::mcp::protocol::Tool;
use crate::notifier::{ChangeNotifier, StateSubscription, SubscriptionHandle};

/// The live handle plus a gate that closes before the handle does.
///
/// Calls hold the read side for their whole duration; retiring the client
/// takes the write side, so it waits for in-flight calls and every later
/// call sees the gate shut.
struct LiveClient {
    connection: Arc<dyn McpConnection>,
    open: RwLock<bool>,
    watcher: StdMutex<Option<AbortHandle>>,
}

/// What the exit watcher reports as `last_error`.
const EXITED: &str = "server process exited";

impl LiveClient {
    fn new(connection: Arc<dyn McpConnection>) -> Self {
        Self {
            connection,
            open: RwLock::new(true),
            watcher: StdMutex::new(None),
        }
    }

    fn is_alive(&self) -> bool {
        !self.connection.is_closed()
    }

    fn watcher(&self) -> std::sync::MutexGuard<'_, Option<AbortHandle>> {
        self.watcher.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Starts a task that reports the connection to `shared` once it
    /// closes. The task holds no strong reference to the client or the
    /// supervisor.
    fn watch(self: &Arc<Self>, id: &str, shared: Weak<Shared>) {
        let connection = self.connection.clone();
        let client = Arc::downgrade(self);
        let id = id.to_string();

        // Hold the slot so the task cannot disarm itself before it is armed.
        let mut slot = self.watcher();
        let task = tokio::spawn(async move {
            connection.closed().await;
            if let Some(client) = client.upgrade() {
                client.watcher().take();
            }
            if let Some(shared) = shared.upgrade() {
                if shared.mark_crashed(&id, &connection, EXITED).await {
                    debug!(server = %id, "exit noticed while idle");
                }
            }
        });
        *slot = Some(task.abort_handle());
    }

    fn stop_watching(&self) {
        if let Some(watcher) = self.watcher().take() {
            watcher.abort();
        }
    }
}

impl Drop for LiveClient {
    fn drop(&mut self) {
        self.stop_watching();
    }
}

/// Internal record. Only `snapshot` ever leaves the supervisor.
struct Entry {
    snapshot: ConnectionSnapshot,
    client: Option<Arc<LiveClient>>,
    tools: Vec<Tool>,
    attempts: u64,
    cancel: Option<CancellationToken>,
}

impl Entry {
    fn new(id: &str, transport: TransportDescriptor) -> Self {
        Self {
            snapshot: ConnectionSnapshot::new(id, transport),
            client: None,
            tools: Vec::new(),
            attempts: 0,
            cancel: None,
        }
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        self.snapshot.status = status;
        self.snapshot.updated_at = Utc::now();
    }
}

enum OpenOutcome {
    Opened(Box<dyn McpConnection>, Vec<Tool>),
    Failed(String),
    Cancelled,
}

/// State the exit watchers reach without owning the supervisor.
struct Shared {
    entries: RwLock<HashMap<String, Entry>>,
    notifier: ChangeNotifier,
}

impl Shared {
    fn publish(&self, entry: &Entry) {
        self.notifier.publish(entry.snapshot.clone());
    }

    async fn mark_crashed(&self, id: &str, connection: &Arc<dyn McpConnection>, message: &str) -> bool {
        let stale = {
            let mut entries = self.entries.write().await;
            let Some(entry) = entries.get_mut(id) else {
                return false;
            };
            let holds = entry
                .client
                .as_ref()
                .is_some_and(|live| Arc::ptr_eq(&live.connection, connection));
            if !holds {
                return false;
            }
            entry.snapshot.last_error = Some(message.to_string());
            entry.tools.clear();
            entry.set_status(ConnectionStatus::Error);
            self.publish(entry);
            entry.client.take()
        };

        warn!(server = %id, error = %message, "server connection lost");
        if let Some(live) = stale {
            retire(id, live).await;
        }
        true
    }
}

pub struct Supervisor {
    registry: Arc<dyn ServerRegistry>,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Supervisor {
    pub fn new(registry: Arc<dyn ServerRegistry>, connector: Arc<dyn Connector>) -> Self {
        Self {
            registry,
            connector,
            shared: Arc::new(Shared {
                entries: RwLock::new(HashMap::new()),
                notifier: ChangeNotifier::default(),
            }),
            locks: StdMutex::new(HashMap::new()),
        }
    }

    /// Supervisor that opens real MCP connections.
    pub fn with_mcp(registry: Arc<dyn ServerRegistry>) -> Self {
        Self::new(registry, Arc::new(McpConnector))
    }

    /// Configuration for `id`, as the registry has it right now.
    pub fn config(&self, id: &str) -> Result<McpServerConfig, SupervisorError> {
        self.registry.read(id).map_err(|e| match e {
            ConfigError::NotFound(id) => SupervisorError::ConfigNotFound(id),
            other => SupervisorError::Registry(other.to_string()),
        })
    }

    fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        locks.entry(id.to_string()).or_default().clone()
    }

    /// Attempts this caller counts as "before me". An attempt still in
    /// flight is not, so a caller arriving mid-connect adopts its outcome.
    async fn attempts_of(&self, id: &str) -> u64 {
        self.shared.entries.read().await.get(id).map_or(0, |e| match e.snapshot.status {
            ConnectionStatus::Connecting => e.attempts.saturating_sub(1),
            _ => e.attempts,
        })
    }

    fn publish(&self, entry: &Entry) {
        self.shared.publish(entry);
    }

    #[cfg(test)]
    pub(crate) fn tracked_locks(&self) -> usize {
        self.locks.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// Brings `id` to `running`.
    ///
    /// A running entry is returned as-is unless `force` is set, in which case
    /// the old client is closed before a new one is opened. Entries in
    /// `error` or `stopped` are retried.
    pub async fn connect(&self, id: &str, force: bool) -> Result<ConnectionSnapshot, SupervisorError> {
        self.connect_serialized(id, force)
            .instrument(server_span!(id, "connect"))
            .await
    }

    async fn connect_serialized(&self, id: &str, force: bool) -> Result<ConnectionSnapshot, SupervisorError> {
        // Unknown ids never get a lock.
        let config = self.config(id)?;
        let observed = self.attempts_of(id).await;
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let previous = {
            let mut entries = self.shared.entries.write().await;
            match entries.get_mut(id) {
                Some(entry) => {
                    if entry.attempts != observed {
                        // Someone else connected while we waited; share it.
                        match entry.snapshot.status {
                            ConnectionStatus::Running => return Ok(entry.snapshot.clone()),
                            ConnectionStatus::Error => {
                                let message = entry.snapshot.last_error.clone().unwrap_or_default();
                                return Err(SupervisorError::transport(id, message));
                            }
                            _ => {}
                        }
                    }

                    let alive = entry.client.as_ref().is_some_and(|c| c.is_alive());
                    match entry.snapshot.status {
                        ConnectionStatus::Running if alive && !force => {
                            debug!(server = %id, "already running");
                            return Ok(entry.snapshot.clone());
                        }
                        ConnectionStatus::Running => {
                            if !alive {
                                info!(server = %id, "client went away, reconnecting");
                            }
                            entry.set_status(ConnectionStatus::Stopping);
                            self.publish(entry);
                            entry.client.take()
                        }
                        status if status.is_terminal() => {
                            debug!(server = %id, %status, "retrying");
                            None
                        }
                        _ => None,
                    }
                }
                None => None,
            }
        };

        if let Some(old) = previous {
            retire(id, old).await;
            let mut entries = self.shared.entries.write().await;
            if let Some(entry) = entries.get_mut(id) {
                entry.tools.clear();
                entry.set_status(ConnectionStatus::Stopped);
                self.publish(entry);
            }
        }

        let token = CancellationToken::new();
        {
            let mut entries = self.shared.entries.write().await;
            let entry = entries
                .entry(id.to_string())
                .or_insert_with(|| Entry::new(id, config.descriptor()));
            entry.attempts += 1;
            entry.cancel = Some(token.clone());
            entry.tools.clear();
            entry.snapshot.transport = config.descriptor();
            entry.snapshot.last_error = None;
            entry.snapshot.connected_at = None;
            entry.snapshot.tool_count = 0;
            entry.set_status(ConnectionStatus::Connecting);
            self.publish(entry);
        }
        info!(server = %id, target = %config.descriptor().target(), "connecting");

        let outcome = self.open(&config, &token).await;
        self.commit(id, &token, outcome).await
    }

    async fn open_and_list(&self, config: &McpServerConfig) -> McpResult<(Box<dyn McpConnection>, Vec<Tool>)> {
        let connection = self.connector.open(config).await?;
        match connection.list_tools().await {
            Ok(tools) => Ok((connection, tools)),
            Err(e) if e.is_connection_lost() => {
                if let Err(close_err) = connection.close().await {
                    warn!(server = %config.id, error = %close_err, "close failed");
                }
                Err(e)
            }
            Err(e) => {
                warn!(server = %config.id, error = %e, "listing tools failed");
                Ok((connection, Vec::new()))
            }
        }
    }

    async fn open(&self, config: &McpServerConfig, token: &CancellationToken) -> OpenOutcome {
        let timeout = config.connect_timeout();
        let attempt = self.open_and_list(config);

        tokio::select! {
            biased;
            _ = token.cancelled() => OpenOutcome::Cancelled,
            result = tokio::time::timeout(timeout, attempt) => match result {
                Ok(Ok((connection, tools))) => OpenOutcome::Opened(connection, tools),
                Ok(Err(e)) => OpenOutcome::Failed(e.to_string()),
                Err(_) => OpenOutcome::Failed(format!(
                    "connect timed out after {}s",
                    timeout.as_secs_f64()
                )),
            },
        }
    }

    async fn commit(
        &self,
        id: &str,
        token: &CancellationToken,
        outcome: OpenOutcome,
    ) -> Result<ConnectionSnapshot, SupervisorError> {
        let mut entries = self.shared.entries.write().await;
        let Some(entry) = entries.get_mut(id) else {
            return Err(SupervisorError::NotFound(id.to_string()));
        };
        entry.cancel = None;

        match outcome {
            OpenOutcome::Opened(connection, tools) if !token.is_cancelled() => {
                entry.snapshot.tool_count = tools.len();
                entry.snapshot.connected_at = Some(Utc::now());
                entry.tools = tools;
                let live = Arc::new(LiveClient::new(Arc::from(connection)));
                live.watch(id, Arc::downgrade(&self.shared));
                entry.client = Some(live);
                entry.set_status(ConnectionStatus::Running);
                self.publish(entry);
                info!(server = %id, tools = entry.snapshot.tool_count, "running");
                Ok(entry.snapshot.clone())
            }
            OpenOutcome::Opened(connection, _) => {
                entry.set_status(ConnectionStatus::Stopping);
                self.publish(entry);
                drop(entries);

                debug!(server = %id, "connect finished after cancel, closing");
                if let Err(e) = connection.close().await {
                    warn!(server = %id, error = %e, "close failed");
                }

                let mut entries = self.shared.entries.write().await;
                if let Some(entry) = entries.get_mut(id) {
                    entry.set_status(ConnectionStatus::Stopped);
                    self.publish(entry);
                }
                Err(SupervisorError::Cancelled(id.to_string()))
            }
            OpenOutcome::Failed(_) | OpenOutcome::Cancelled if token.is_cancelled() => {
                entry.set_status(ConnectionStatus::Stopped);
                self.publish(entry);
                info!(server = %id, "connect cancelled");
                Err(SupervisorError::Cancelled(id.to_string()))
            }
            OpenOutcome::Failed(message) => {
                entry.snapshot.last_error = Some(message.clone());
                entry.set_status(ConnectionStatus::Error);
                self.publish(entry);
                let err = SupervisorError::transport(id, message);
                record_error(&err);
                Err(err)
            }
            OpenOutcome::Cancelled => {
                entry.set_status(ConnectionStatus::Stopped);
                self.publish(entry);
                Err(SupervisorError::Cancelled(id.to_string()))
            }
        }
    }

    /// Stops `id` and keeps its record in `stopped`.
    ///
    /// Returns `None` when there was nothing to stop. Close failures are
    /// logged, never returned.
    pub async fn disconnect(&self, id: &str) -> Option<ConnectionSnapshot> {
        self.disconnect_serialized(id)
            .instrument(server_span!(id, "disconnect"))
            .await
    }

    async fn disconnect_serialized(&self, id: &str) -> Option<ConnectionSnapshot> {
        {
            let entries = self.shared.entries.read().await;
            let entry = entries.get(id)?;
            if entry.snapshot.status == ConnectionStatus::Stopped {
                return None;
            }
            if let Some(token) = &entry.cancel {
                debug!(server = %id, "cancelling in-flight connect");
                token.cancel();
            }
        }

        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let client = {
            let mut entries = self.shared.entries.write().await;
            let entry = entries.get_mut(id)?;
            if entry.snapshot.status == ConnectionStatus::Stopped {
                return Some(entry.snapshot.clone());
            }
            entry.set_status(ConnectionStatus::Stopping);
            self.publish(entry);
            entry.client.take()
        };

        if let Some(client) = client {
            retire(id, client).await;
        }

        let mut entries = self.shared.entries.write().await;
        let entry = entries.get_mut(id)?;
        entry.tools.clear();
        entry.set_status(ConnectionStatus::Stopped);
        self.publish(entry);
        info!(server = %id, "stopped");
        Some(entry.snapshot.clone())
    }

    /// Runs `f` against the live client of `id`.
    ///
    /// The client cannot be retired while `f` runs. Whatever `f` returns is
    /// passed through untouched.
    pub(crate) async fn with_client<F, Fut, T>(&self, id: &str, f: F) -> Result<T, SupervisorError>
    where
        F: FnOnce(Arc<dyn McpConnection>) -> Fut,
        Fut: Future<Output = T>,
    {
        let live = {
            let entries = self.shared.entries.read().await;
            let entry = entries
                .get(id)
                .ok_or_else(|| SupervisorError::NotFound(id.to_string()))?;
            if entry.snapshot.status != ConnectionStatus::Running {
                return Err(SupervisorError::NotRunning(id.to_string()));
            }
            entry
                .client
                .clone()
                .ok_or_else(|| SupervisorError::NotRunning(id.to_string()))?
        };

        let open = live.open.read().await;
        if !*open {
            return Err(SupervisorError::NotRunning(id.to_string()));
        }
        let result = f(live.connection.clone()).await;
        drop(open);
        Ok(result)
    }

    /// Records that `connection` died under a caller.
    ///
    /// Only acts if `id` still holds that exact connection; the entry moves
    /// to `error` and the dead handle is closed. Returns whether it acted.
    pub(crate) async fn mark_crashed(
        &self,
        id: &str,
        connection: &Arc<dyn McpConnection>,
        message: &str,
    ) -> bool {
        self.shared.mark_crashed(id, connection, message).await
    }

    pub async fn get_state(&self, id: &str) -> Option<ConnectionSnapshot> {
        self.shared.entries.read().await.get(id).map(|e| e.snapshot.clone())
    }

    /// Every known entry, ordered by id.
    pub async fn list_states(&self) -> Vec<ConnectionSnapshot> {
        let entries = self.shared.entries.read().await;
        let mut states: Vec<_> = entries.values().map(|e| e.snapshot.clone()).collect();
        states.sort_by(|a, b| a.id.cmp(&b.id));
        states
    }

    /// Tools the server listed when it came up.
    pub async fn tools(&self, id: &str) -> Result<Vec<Tool>, SupervisorError> {
        let entries = self.shared.entries.read().await;
        let entry = entries
            .get(id)
            .ok_or_else(|| SupervisorError::NotFound(id.to_string()))?;
        if entry.snapshot.status != ConnectionStatus::Running {
            return Err(SupervisorError::NotRunning(id.to_string()));
        }
        Ok(entry.tools.clone())
    }

    /// Connects every `auto_start` server concurrently.
    pub async fn connect_all_auto_start(
        &self,
    ) -> Result<Vec<(String, Result<ConnectionSnapshot, SupervisorError>)>, SupervisorError> {
        let servers = self
            .registry
            .auto_start()
            .map_err(|e| SupervisorError::Registry(e.to_string()))?;

        let attempts = servers.iter().map(|server| async move {
            let outcome = self.connect(&server.id, false).await;
            (server.id.clone(), outcome)
        });
        Ok(join_all(attempts).await)
    }

    /// Disconnects everything that is not already stopped.
    pub async fn shutdown_all(&self) -> Vec<ConnectionSnapshot> {
        let ids: Vec<String> = {
            let entries = self.shared.entries.read().await;
            entries
                .values()
                .filter(|e| e.snapshot.status != ConnectionStatus::Stopped)
                .map(|e| e.snapshot.id.clone())
                .collect()
        };
        info!(count = ids.len(), "shutting down servers");

        join_all(ids.iter().map(|id| self.disconnect(id)))
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    pub fn subscribe(&self) -> StateSubscription {
        self.shared.notifier.subscribe()
    }

    /// Callback subscription; see [`ChangeNotifier::subscribe_fn`].
    pub fn subscribe_fn<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: FnMut(conduit_core::StateEvent) + Send + 'static,
    {
        self.shared.notifier.subscribe_fn(callback)
    }

    pub fn notifier(&self) -> &ChangeNotifier {
        &self.shared.notifier
    }
}

/// Shuts the gate, then closes. Close failures are only logged.
async fn retire(id: &str, live: Arc<LiveClient>) {
    live.stop_watching();
    {
        let mut open = live.open.write().await;
        *open = false;
    }
    match live.connection.close().await {
        Ok(()) => debug!(server = %id, "client closed"),
        Err(e) => warn!(server = %id, error = %e, "close failed"),
    }
}
