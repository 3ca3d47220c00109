//! Local fan-out registry.
//!
//! Same-process delivery of per-poll updates for when the message bus is
//! unreachable. Each subscriber connection registers a [`ClientHandle`]: a
//! bounded queue drained by that connection's bridge.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Identifier of one subscriber connection.
pub type ConnectionId = Uuid;

/// Sending side of one subscriber connection's queue.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    id: ConnectionId,
    sender: mpsc::Sender<Arc<str>>,
}

impl ClientHandle {
    /// Create a handle and the receiver its bridge drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Arc<str>>) {
        let (sender, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id: Uuid::new_v4(),
            sender,
        };
        (handle, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

/// Mapping from poll id to the connections watching it.
///
/// One mutex guards the whole map and is held for every register,
/// unregister and delivery pass. A poll with no connections has no key.
#[derive(Debug, Default)]
pub struct LocalFanoutRegistry {
    entries: Mutex<HashMap<String, Vec<ClientHandle>>>,
}

impl LocalFanoutRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<ClientHandle>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add `handle` to `poll_id`. Returns `false` if it was already present.
    pub fn register(&self, poll_id: &str, handle: ClientHandle) -> bool {
        let mut entries = self.lock();
        let handles = entries.entry(poll_id.to_string()).or_default();
        if handles.iter().any(|h| h.id == handle.id) {
            return false;
        }
        debug!(poll_id = %poll_id, connection_id = %handle.id, "Connection registered for local fan-out");
        handles.push(handle);
        true
    }

    /// Like [`register`](Self::register), but unregisters when the returned guard drops.
    pub fn register_guarded(self: &Arc<Self>, poll_id: &str, handle: ClientHandle) -> FanoutRegistration {
        let connection_id = handle.id;
        self.register(poll_id, handle);
        FanoutRegistration {
            registry: Arc::clone(self),
            poll_id: poll_id.to_string(),
            connection_id,
        }
    }

    /// Remove a connection from `poll_id`. Returns `false` if it was not present.
    pub fn unregister(&self, poll_id: &str, connection_id: ConnectionId) -> bool {
        let mut entries = self.lock();
        Self::remove_locked(&mut entries, poll_id, connection_id)
    }

    fn remove_locked(
        entries: &mut HashMap<String, Vec<ClientHandle>>,
        poll_id: &str,
        connection_id: ConnectionId,
    ) -> bool {
        let Some(handles) = entries.get_mut(poll_id) else {
            return false;
        };
        let before = handles.len();
        handles.retain(|h| h.id != connection_id);
        let removed = handles.len() != before;

        if handles.is_empty() {
            entries.remove(poll_id);
            debug!(poll_id = %poll_id, "Poll has no more local connections, removed");
        }
        if removed {
            debug!(poll_id = %poll_id, connection_id = %connection_id, "Connection unregistered from local fan-out");
        }
        removed
    }

    /// Queue `payload` on every connection registered for `poll_id`.
    ///
    /// A connection whose queue is closed or full is unregistered; the others
    /// still receive the message. Returns how many connections accepted it.
    pub fn deliver(&self, poll_id: &str, payload: &str) -> usize {
        let mut entries = self.lock();
        let Some(handles) = entries.get(poll_id) else {
            return 0;
        };

        let payload: Arc<str> = Arc::from(payload);
        let mut delivered = 0;
        let mut failed = Vec::new();

        for handle in handles {
            match handle.sender.try_send(Arc::clone(&payload)) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(
                        poll_id = %poll_id,
                        connection_id = %handle.id,
                        error = %e,
                        "Failed to deliver to local connection, dropping it"
                    );
                    failed.push(handle.id);
                }
            }
        }

        for connection_id in failed {
            Self::remove_locked(&mut entries, poll_id, connection_id);
        }

        debug!(poll_id = %poll_id, delivered, "Delivered via local fan-out");
        delivered
    }

    pub fn contains(&self, poll_id: &str, connection_id: ConnectionId) -> bool {
        self.lock()
            .get(poll_id)
            .is_some_and(|handles| handles.iter().any(|h| h.id == connection_id))
    }

    /// Number of connections registered for `poll_id`.
    pub fn connection_count(&self, poll_id: &str) -> usize {
        self.lock().get(poll_id).map(Vec::len).unwrap_or(0)
    }

    /// Whether `poll_id` is a key of the map.
    pub fn has_poll(&self, poll_id: &str) -> bool {
        self.lock().contains_key(poll_id)
    }

    /// Number of polls with at least one connection.
    pub fn poll_count(&self) -> usize {
        self.lock().len()
    }
}

/// Registration that removes itself from the registry when dropped.
#[derive(Debug)]
pub struct FanoutRegistration {
    registry: Arc<LocalFanoutRegistry>,
    poll_id: String,
    connection_id: ConnectionId,
}

impl FanoutRegistration {
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }
}

impl Drop for FanoutRegistration {
    fn drop(&mut self) {
        self.registry.unregister(&self.poll_id, self.connection_id);
    }
}
