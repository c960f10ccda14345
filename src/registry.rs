//! Bookkeeping of live client connections
//!
//! The registry is owned by a server instance and shared with its connection
//! tasks. Membership is held through a [`Registration`] guard which removes
//! the entry when dropped, so an entry can never outlive its socket.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// ConnectionId identifies one accepted client socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// ConnectionEntry is what the registry knows about a member
#[derive(Debug, Clone)]
pub struct ConnectionEntry {
    pub peer_addr: Option<SocketAddr>,
    pub registered_at: Instant,
}

/// ConnectionRegistry is the set of connections that reached the command stage
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    live: Mutex<HashMap<ConnectionId, ConnectionEntry>>,
}

impl ConnectionRegistry {
    /// new is a constructor for a shareable registry
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// next_id hands out a fresh identifier. Identifiers are never reused
    pub fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// register adds a connection; it stays a member until the guard is dropped
    pub fn register(
        self: &Arc<Self>,
        id: ConnectionId,
        peer_addr: Option<SocketAddr>,
    ) -> Registration {
        self.lock().insert(
            id,
            ConnectionEntry {
                peer_addr,
                registered_at: Instant::now(),
            },
        );

        Registration {
            id,
            registry: Arc::clone(self),
        }
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<ConnectionEntry> {
        self.lock().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// ids returns the current members in ascending order
    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.lock().keys().copied().collect();
        ids.sort();
        ids
    }

    fn remove(&self, id: ConnectionId) {
        self.lock().remove(&id);
    }

    // Entries are plain data, a panic elsewhere cannot leave them half-written
    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, ConnectionEntry>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Registration keeps a connection in the registry while alive
pub struct Registration {
    id: ConnectionId,
    registry: Arc<ConnectionRegistry>,
}

impl Registration {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration").field("id", &self.id).finish()
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}
