//! Server-wide termination.
//!
//! The [`ShutdownCoordinator`] is triggered either by a client sending the
//! `terminate` command or by a process signal. The first call to
//! [`initiate`](ShutdownCoordinator::initiate) fans out to every component;
//! later calls are no-ops.
//!
//! ## Sequence
//!
//! 1. Cancel the shared shutdown token. The accept loop stops accepting, the
//!    worker pool refuses new work, and the stats reporter's timer stops.
//! 2. Close every connection in the [`ConnectionRegistry`]. Each worker blocked
//!    on a read observes the close and exits; queued connections are closed
//!    when the pool drains.
//!
//! Awaiting the drain (worker acknowledgements, log flush) is the job of
//! [`NumberServer::run`](crate::server::service::NumberServer::run), not of the
//! coordinator, so `initiate` never blocks and is safe to call from inside a
//! connection worker.

use crate::server::registry::ConnectionRegistry;
use core::fmt;
use portable_atomic::{AtomicBool, Ordering};
use std::{
    net::SocketAddr,
    sync::{Arc, OnceLock},
};
use tokio_util::sync::CancellationToken;

/// What started the shutdown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownReason {
    /// A client sent the `terminate` command.
    ClientCommand { peer: SocketAddr },
    /// SIGINT or SIGTERM.
    Signal,
    /// Programmatic request through a
    /// [`ServerHandle`](crate::server::service::ServerHandle).
    Requested,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientCommand { peer } => write!(f, "terminate command from {peer}"),
            Self::Signal => write!(f, "process signal"),
            Self::Requested => write!(f, "shutdown requested"),
        }
    }
}

#[derive(Debug)]
pub struct ShutdownCoordinator {
    started: AtomicBool,
    reason: OnceLock<ShutdownReason>,
    token: CancellationToken,
    registry: Arc<ConnectionRegistry>,
}

impl ShutdownCoordinator {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            started: AtomicBool::new(false),
            reason: OnceLock::new(),
            token: CancellationToken::new(),
            registry,
        }
    }

    /// Begins shutdown. Returns `true` for the call that actually started it.
    pub fn initiate(&self, reason: ShutdownReason) -> bool {
        if self.started.swap(true, Ordering::AcqRel) {
            tracing::debug!("Shutdown already in progress, ignoring {reason}");
            return false;
        }
        let _ = self.reason.set(reason);

        tracing::info!("Shutdown initiated by {reason}");

        // === Phase 1: Stop accepting, stop pool intake, stop the stats timer ===
        self.token.cancel();

        // === Phase 2: Force-close live connections ===
        let closed = self.registry.close_all();
        tracing::info!("Terminating {closed} client connections");

        true
    }

    pub fn is_shutting_down(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.get().copied()
    }

    /// Token cancelled once shutdown begins.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Resolves once shutdown has begun.
    pub async fn wait(&self) {
        self.token.cancelled().await;
    }
}
