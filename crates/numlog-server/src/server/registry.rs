//! Live connection registry.
//!
//! Every accepted connection is registered before it is queued for a worker,
//! and deregistered when the [`Registration`] guard it carries is dropped:
//! after the worker loop exits, after a queued connection is discarded during
//! shutdown, or on unwinding. The registry never owns the socket itself. It
//! owns a per-connection [`CancellationToken`] that the worker selects on, so
//! [`ConnectionRegistry::close_all`] can force every live connection closed.

use parking_lot::Mutex;
use portable_atomic::{AtomicU64, Ordering};
use std::{collections::HashMap, net::SocketAddr, sync::Arc};
use tokio_util::sync::CancellationToken;

/// Identifier assigned to each accepted connection, unique per server run.
pub type ConnectionId = u64;

#[derive(Debug)]
struct Entry {
    peer: SocketAddr,
    close: CancellationToken,
}

#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<ConnectionId, Entry>>,
    next_id: AtomicU64,
    // Parent of every per-connection token; cancelled by `close_all` so
    // connections registered afterwards start out closed.
    root: CancellationToken,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            root: CancellationToken::new(),
        }
    }

    /// Registers a connection from `peer`.
    ///
    /// The returned guard removes the entry on drop and exposes the token that
    /// is cancelled when the connection must close.
    pub fn register(self: &Arc<Self>, peer: SocketAddr) -> Registration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let close = self.root.child_token();

        self.connections.lock().insert(
            id,
            Entry {
                peer,
                close: close.clone(),
            },
        );

        Registration {
            id,
            peer,
            close,
            registry: Arc::clone(self),
        }
    }

    /// Signals every registered connection to close and returns how many were
    /// live. Idempotent.
    pub fn close_all(&self) -> usize {
        self.root.cancel();

        let connections = self.connections.lock();
        for (id, entry) in connections.iter() {
            tracing::trace!("Closing connection {id} from {}", entry.peer);
            entry.close.cancel();
        }
        connections.len()
    }

    /// Number of connections currently registered, queued or in service.
    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn deregister(&self, id: ConnectionId) {
        self.connections.lock().remove(&id);
    }
}

/// Proof of registration for one connection. Dropping it deregisters the
/// connection.
#[derive(Debug)]
pub struct Registration {
    id: ConnectionId,
    peer: SocketAddr,
    close: CancellationToken,
    registry: Arc<ConnectionRegistry>,
}

impl Registration {
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    pub const fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Token cancelled when this connection is forced closed.
    pub const fn close_token(&self) -> &CancellationToken {
        &self.close
    }

    pub fn is_closed(&self) -> bool {
        self.close.is_cancelled()
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.deregister(self.id);
    }
}
