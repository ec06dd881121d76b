use crate::server::{
    connection::{ConnectionContext, handle_connection},
    pool::request::WorkRequest,
};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};

/// The pool's FIFO queue, shared by every worker.
pub type SharedQueue = Arc<Mutex<mpsc::UnboundedReceiver<WorkRequest>>>;

/// Worker task responsible for processing [`WorkRequest`] messages.
///
/// Each worker services one connection at a time, to completion, then goes
/// back to the queue. Idle workers wait on the queue lock; tokio's mutex is
/// fair, so queued connections are handed out in arrival order.
///
/// # Request Types
///
/// - [`WorkRequest::Serve`] - runs [`handle_connection`] until the connection
///   closes.
/// - [`WorkRequest::Shutdown`] - acknowledges and stops the worker.
///
/// The loop also ends if the queue is closed.
pub async fn worker_loop(worker_id: usize, queue: SharedQueue, ctx: ConnectionContext) {
    tracing::trace!("Worker {worker_id} started");

    loop {
        let work = queue.lock().await.recv().await;

        match work {
            Some(WorkRequest::Serve(conn)) => {
                let reason = handle_connection(conn, &ctx).await;
                tracing::trace!("Worker {worker_id} is free again ({reason})");
            }
            Some(WorkRequest::Shutdown { response }) => {
                tracing::debug!("Worker {worker_id} received shutdown signal");

                if response.send(()).is_err() {
                    tracing::error!("Worker {worker_id} failed to acknowledge shutdown");
                }
                break;
            }
            None => {
                tracing::debug!("Worker {worker_id} queue closed");
                break;
            }
        }
    }

    tracing::trace!("Worker {worker_id} stopped");
}
