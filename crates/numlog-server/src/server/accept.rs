use crate::server::{
    connection::Connection, pool::manager::WorkerPool, registry::ConnectionRegistry,
    telemetry::increment_connections_accepted,
};
use core::time::Duration;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Pause after a failed `accept` before trying again, so a persistent error
/// (e.g. file descriptor exhaustion) does not spin the loop.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Accepts connections until `shutdown` is cancelled, registering each one
/// and handing it to `pool`.
///
/// Accepting never waits for a free worker. The listener is dropped when this
/// returns, so later connection attempts are refused by the OS.
pub async fn accept_loop(
    listener: TcpListener,
    registry: Arc<ConnectionRegistry>,
    pool: Arc<WorkerPool>,
    shutdown: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                increment_connections_accepted();
                let conn = Connection::new(stream, registry.register(peer));
                tracing::debug!("Accepted connection {} from {peer}", conn.id());

                if let Err(e) = pool.submit(conn) {
                    tracing::debug!("Dropping connection from {peer}: {e}");
                }
            }
            Err(e) => {
                tracing::warn!("Failed to accept connection: {e}");
                tokio::select! {
                    biased;
                    () = shutdown.cancelled() => break,
                    () = tokio::time::sleep(ACCEPT_RETRY_DELAY) => {}
                }
            }
        }
    }

    drop(listener);
    tracing::info!("Stopped accepting connections");
}
