//! Fixed-size worker pool fed by an unbounded FIFO queue.
//!
//! This module defines the [`WorkerPool`] struct, which owns the queue of
//! accepted connections and the worker tasks that service them. Admission
//! control is about *processing*, not connections: submitting never blocks and
//! never rejects while the pool is running, but only `num_workers` connections
//! are read from at once.
//!
//! Shutdown is coordinated through a shared [`CancellationToken`]: once it is
//! cancelled, [`WorkerPool::submit`] refuses work and in-flight connections
//! are closed by their workers. Workers that miss the shutdown timeout are
//! aborted. An abort never splits a first-seen token from its log record:
//! the append runs on its own task (see
//! [`process_line`](crate::server::connection::process_line)) and finishes
//! regardless.

use crate::server::{
    connection::{Connection, ConnectionContext},
    pool::{
        request::WorkRequest,
        worker::{SharedQueue, worker_loop},
    },
};
use core::time::Duration;
use numlog_core::Error;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::timeout,
};
use tokio_util::sync::CancellationToken;

/// A bounded set of asynchronous workers servicing [`Connection`]s.
pub struct WorkerPool {
    queue: mpsc::UnboundedSender<WorkRequest>,
    receiver: SharedQueue,
    workers: Mutex<Vec<JoinHandle<()>>>,
    num_workers: usize,
    shutdown_token: CancellationToken,
    shutdown_timeout: Duration,
}

impl WorkerPool {
    /// Spawns `num_workers` worker tasks sharing one queue.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(
        num_workers: usize,
        ctx: &ConnectionContext,
        shutdown_token: CancellationToken,
        shutdown_timeout: Duration,
    ) -> Self {
        let (queue, rx) = mpsc::unbounded_channel();
        let receiver: SharedQueue = Arc::new(tokio::sync::Mutex::new(rx));

        let workers = (0..num_workers)
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    Arc::clone(&receiver),
                    ctx.clone(),
                ))
            })
            .collect();

        Self {
            queue,
            receiver,
            workers: Mutex::new(workers),
            num_workers,
            shutdown_token,
            shutdown_timeout,
        }
    }

    pub const fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Queues `conn` for the next free worker.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The service is shutting down (`shutdown_token` was cancelled). The
    ///   connection is dropped, which closes it.
    /// - The queue is closed.
    pub fn submit(&self, conn: Connection) -> Result<(), Error> {
        if self.shutdown_token.is_cancelled() {
            return Err(Error::ServiceShutdown);
        }

        self.queue
            .send(WorkRequest::Serve(conn))
            .map_err(|_| Error::ChannelError {
                context: "Worker queue closed".to_string(),
            })
    }

    /// Gracefully shuts down all workers in the pool.
    ///
    /// - Cancels the shared [`CancellationToken`] to prevent new work and close
    ///   in-flight connections.
    /// - Queues one [`WorkRequest::Shutdown`] per worker behind any pending
    ///   connections.
    /// - Waits (up to `shutdown_timeout`) for shutdown acknowledgements.
    /// - Closes the queue, dropping (and so closing) any connection that never
    ///   reached a worker, and aborts workers that did not stop in time.
    pub async fn shutdown(&self) -> Result<(), Error> {
        // === Phase 0: Stop accepting new work ===
        tracing::info!("Refusing new connections");
        self.shutdown_token.cancel();

        // === Phase 1: Notify workers to shut down ===
        tracing::debug!("Notifying all workers to shut down");
        let mut shutdown_handles = Vec::with_capacity(self.num_workers);

        for i in 0..self.num_workers {
            let (tx, rx) = oneshot::channel();
            if let Err(e) = self.queue.send(WorkRequest::Shutdown { response: tx }) {
                tracing::error!("Failed to send shutdown to worker {i}: {e}");
            } else {
                shutdown_handles.push((i, rx));
            }
        }

        // === Phase 2: Wait for acknowledgements ===
        tracing::debug!(
            "Waiting up to {:?} for worker shutdown acknowledgements",
            self.shutdown_timeout
        );

        let shutdown_timeout = self.shutdown_timeout;
        let timeout_futures = shutdown_handles.into_iter().map(|(i, rx)| async move {
            match timeout(shutdown_timeout, rx).await {
                Ok(Ok(())) => {
                    tracing::trace!("Worker shutdown {i} acknowledged");
                }
                Ok(Err(e)) => {
                    tracing::error!("Worker shutdown {i} returned error: {e}");
                }
                Err(_) => {
                    tracing::warn!("Worker shutdown {i} timed out");
                }
            }
        });

        futures::future::join_all(timeout_futures).await;

        // === Phase 3: Drop anything still queued ===
        if let Ok(mut rx) = self.receiver.try_lock() {
            rx.close();
            let mut dropped = 0_usize;
            while let Ok(request) = rx.try_recv() {
                if let WorkRequest::Serve(conn) = request {
                    tracing::trace!("Closing queued connection {}", conn.id());
                    dropped += 1;
                }
            }
            if dropped > 0 {
                tracing::debug!("Closed {dropped} connections that were never serviced");
            }
        }

        // === Phase 4: Abort stragglers ===
        for handle in self.workers.lock().drain(..) {
            if !handle.is_finished() {
                tracing::warn!("Aborting worker that did not stop in time");
                handle.abort();
            }
        }

        tracing::info!("Worker pool shutdown complete");

        Ok(())
    }
}
