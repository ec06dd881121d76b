use crate::server::connection::Connection;
use tokio::sync::oneshot;

/// Messages consumed by pool workers, in FIFO order.
#[derive(Debug)]
pub enum WorkRequest {
    /// Service an accepted connection until it closes.
    Serve(Connection),
    /// Stop after acknowledging on `response`. One is sent per worker.
    Shutdown { response: oneshot::Sender<()> },
}
