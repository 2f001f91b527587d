//! In-memory map from application id to live real-time connections.
//!
//! Every connection owns a bounded outbound queue. The directory only hands out
//! cloned senders; a slow connection fills its own queue and never blocks the
//! dispatcher or other connections.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use super::events::StatusEvent;
use crate::config::NotificationConfig;
use crate::workflows::enrollment::ApplicationId;

/// Identifier of one real-time connection, unique for the directory's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Why an event could not be queued for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryFailure {
    #[error("outbound queue is full")]
    QueueFull,
    #[error("connection is gone")]
    Disconnected,
}

/// Sending half of a connection, as stored in the directory.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    sender: mpsc::Sender<StatusEvent>,
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue an event without waiting for the client.
    pub fn try_deliver(&self, event: StatusEvent) -> Result<(), DeliveryFailure> {
        self.sender.try_send(event).map_err(|err| match err {
            TrySendError::Full(_) => DeliveryFailure::QueueFull,
            TrySendError::Closed(_) => DeliveryFailure::Disconnected,
        })
    }
}

/// Result of a `register` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Added,
    AlreadyRegistered,
    Moved { from: ApplicationId },
    Closed,
}

#[derive(Debug, Default)]
struct DirectoryState {
    closed: bool,
    entries: HashMap<ApplicationId, HashMap<ConnectionId, ConnectionHandle>>,
    owners: HashMap<ConnectionId, ApplicationId>,
}

impl DirectoryState {
    fn detach(&mut self, connection: ConnectionId) -> Option<ApplicationId> {
        let application_id = self.owners.remove(&connection)?;
        if let Some(handles) = self.entries.get_mut(&application_id) {
            handles.remove(&connection);
            if handles.is_empty() {
                self.entries.remove(&application_id);
            }
        }
        Some(application_id)
    }
}

pub struct ClientDirectory {
    state: Mutex<DirectoryState>,
    next_connection: AtomicU64,
    buffer: usize,
    shutdown: watch::Sender<bool>,
}

impl ClientDirectory {
    pub fn new(config: NotificationConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            state: Mutex::new(DirectoryState::default()),
            next_connection: AtomicU64::new(1),
            buffer: config.connection_buffer.max(1),
            shutdown,
        }
    }

    /// Open the receiving side for a new connection. Nothing is delivered
    /// until the handle is registered under an application id.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let id = ConnectionId(self.next_connection.fetch_add(1, Ordering::Relaxed));
        let (sender, events) = mpsc::channel(self.buffer);
        Subscription {
            handle: ConnectionHandle { id, sender },
            events,
            closed: self.shutdown.subscribe(),
            directory: Arc::downgrade(self),
        }
    }

    /// Add `handle` to the set for `application_id`. A connection belongs to at
    /// most one application id; registering under another id moves it.
    pub fn register(&self, application_id: ApplicationId, handle: &ConnectionHandle) -> Registration {
        let mut state = self.lock();
        if state.closed {
            return Registration::Closed;
        }

        let outcome = match state.owners.get(&handle.id).copied() {
            Some(current) if current == application_id => return Registration::AlreadyRegistered,
            Some(previous) => {
                state.detach(handle.id);
                Registration::Moved { from: previous }
            }
            None => Registration::Added,
        };

        state.owners.insert(handle.id, application_id);
        state
            .entries
            .entry(application_id)
            .or_default()
            .insert(handle.id, handle.clone());

        debug!(application_id = %application_id, connection = %handle.id, ?outcome, "connection registered");
        outcome
    }

    /// Remove a connection from whichever entry holds it, dropping the entry
    /// once it is empty. Returns the application id it was registered under.
    pub fn deregister(&self, connection: ConnectionId) -> Option<ApplicationId> {
        let removed = self.lock().detach(connection);
        if let Some(application_id) = removed {
            debug!(application_id = %application_id, connection = %connection, "connection deregistered");
        }
        removed
    }

    /// Snapshot of the handles registered for `application_id`.
    pub fn lookup(&self, application_id: ApplicationId) -> Vec<ConnectionHandle> {
        let state = self.lock();
        let mut handles: Vec<ConnectionHandle> = state
            .entries
            .get(&application_id)
            .map(|handles| handles.values().cloned().collect())
            .unwrap_or_default();
        handles.sort_by_key(ConnectionHandle::id);
        handles
    }

    pub fn connections_for(&self, application_id: ApplicationId) -> usize {
        self.lock()
            .entries
            .get(&application_id)
            .map_or(0, HashMap::len)
    }

    pub fn entry_count(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn connection_count(&self) -> usize {
        self.lock().owners.len()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Tear down: forget every registration and end all open subscriptions.
    pub fn shutdown(&self) {
        {
            let mut state = self.lock();
            state.closed = true;
            state.entries.clear();
            state.owners.clear();
        }
        self.shutdown.send_replace(true);
        debug!("client directory shut down");
    }

    fn lock(&self) -> MutexGuard<'_, DirectoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ClientDirectory {
    fn default() -> Self {
        Self::new(NotificationConfig::default())
    }
}

/// Receiving side of one connection. Dropping it deregisters the connection.
pub struct Subscription {
    handle: ConnectionHandle,
    events: mpsc::Receiver<StatusEvent>,
    closed: watch::Receiver<bool>,
    directory: Weak<ClientDirectory>,
}

impl Subscription {
    pub fn id(&self) -> ConnectionId {
        self.handle.id
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    pub fn register(&self, application_id: ApplicationId) -> Registration {
        match self.directory.upgrade() {
            Some(directory) => directory.register(application_id, &self.handle),
            None => Registration::Closed,
        }
    }

    pub fn deregister(&self) -> Option<ApplicationId> {
        self.directory
            .upgrade()
            .and_then(|directory| directory.deregister(self.handle.id))
    }

    /// Wait for the next event; `None` once the directory shuts down.
    pub async fn next_event(&mut self) -> Option<StatusEvent> {
        if *self.closed.borrow() {
            return None;
        }

        tokio::select! {
            event = self.events.recv() => event,
            _ = self.closed.changed() => None,
        }
    }

    /// Non-blocking poll of the queue.
    pub fn try_next(&mut self) -> Option<StatusEvent> {
        self.events.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(directory) = self.directory.upgrade() {
            directory.deregister(self.handle.id);
        }
    }
}
