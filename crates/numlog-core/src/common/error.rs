//! Error types for the numlog server.
//!
//! This module defines the central `Error` enum, which captures every
//! recoverable failure the engine can report. Malformed client input is *not*
//! an error: it is classified as [`Input::Invalid`](crate::types::Input) and
//! handled as ordinary control flow.
//!
//! ## Error Cases
//! - `LogOpen`: The token log could not be created or truncated at startup.
//! - `LogWrite`: Appending a token to the log failed. The token stays recorded
//!   as seen.
//! - `Bind`: The listening socket could not be bound.
//! - `Io`: Any other socket or filesystem failure.
//! - `ChannelError`: An internal communication failure between tasks or
//!   workers.
//! - `ServiceShutdown`: Work arrived while the service was shutting down.

use std::{io, net::SocketAddr, path::PathBuf};

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the numlog engine.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The log file could not be opened (or truncated) at startup.
    #[error("Failed to open log {}: {source}", path.display())]
    LogOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A single append to the log failed.
    #[error("Failed to append to log {}: {source}", path.display())]
    LogWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The listener could not be bound to the requested address.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Any other I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Internal channel send/receive failure (e.g., closed channel).
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,
}

impl Error {
    /// Returns `true` for the append failure kind, which callers treat as
    /// recoverable and per-token.
    pub const fn is_log_write(&self) -> bool {
        matches!(self, Self::LogWrite { .. })
    }
}
