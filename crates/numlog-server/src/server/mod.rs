//! Networking engine for the number-log server.
//!
//! ## Structure
//!
//! - [`accept`] - accept loop feeding the worker pool.
//! - [`config`] - CLI/env configuration and the fixed constants.
//! - [`connection`] - per-connection read loop and line processing.
//! - [`pool`] - fixed-size worker pool over a FIFO queue.
//! - [`registry`] - live connection registry for forced closes.
//! - [`service`] - [`NumberServer`](service::NumberServer) facade and handle.
//! - [`shutdown`] - server-wide termination.
//! - [`stats`] - periodic ingest report.
//! - [`telemetry`] - tracing subscriber and optional OpenTelemetry export.

pub mod accept;
pub mod config;
pub mod connection;
pub mod pool;
pub mod registry;
pub mod service;
pub mod shutdown;
pub mod stats;
pub mod telemetry;
