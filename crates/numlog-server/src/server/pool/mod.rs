//! Bounded worker pool for connection processing.
//!
//! A fixed set of workers pulls [`WorkRequest`]s from one unbounded FIFO
//! queue. At most `num_workers` connections are read from at any instant; any
//! further accepted connections wait in the queue, open but unread, until a
//! worker frees up.
//!
//! ## Structure
//!
//! - [`manager`] - [`WorkerPool`](manager::WorkerPool): spawning, submission
//!   and coordinated shutdown.
//! - [`worker`] - the loop each worker task runs.
//! - [`request`] - the messages carried by the queue.

pub mod manager;
pub mod request;
pub mod worker;

pub use request::WorkRequest;
