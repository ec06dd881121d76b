//! Server facade and control handle.
//!
//! This module wires the registry, dedup store, log appender, worker pool,
//! stats reporter, and shutdown coordinator into one runnable server.
//!
//! ## Structure
//!
//! - [`handler`] - [`NumberServer`] (bind and run) and [`ServerHandle`]
//!   (observe and stop a running server).

pub mod handler;

pub use handler::{NumberServer, ServerHandle};
