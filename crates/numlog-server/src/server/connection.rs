//! Per-connection read loop.
//!
//! A worker drives one [`Connection`] at a time through
//! [`handle_connection`]: read a complete line, classify it, and either store
//! it, count it as a duplicate, shut the server down, or close the connection.
//! The server never writes to the client; the only thing a client can observe
//! is its connection closing.
//!
//! ```text
//! READING --token, first seen--> append to log --> READING
//! READING --token, duplicate---> count ----------> READING
//! READING --invalid line-------> CLOSED
//! READING --"terminate"--------> shutdown -------> CLOSED
//! READING --EOF / error / forced close-----------> CLOSED
//! ```
//!
//! A line only exists once its `\n` arrives. Bytes without a terminator are
//! buffered and never processed; if the stream ends first they are dropped.
//! The one exception is size: no valid line is longer than a token, so once
//! more than [`MAX_LINE_BYTES`] arrive without a terminator the input is
//! treated as invalid and the connection is closed instead of buffering
//! without bound.
//!
//! First-seen tokens are appended on a task of their own. Aborting the worker
//! (a shutdown timeout) while it waits for the write does not cancel the
//! write, so a token that made it into the store still reaches the log unless
//! the write itself fails.

use crate::server::{
    registry::{ConnectionId, Registration},
    shutdown::{ShutdownCoordinator, ShutdownReason},
    telemetry::{
        decrement_connections_active, increment_connections_active, increment_inputs_rejected,
        increment_log_write_errors, increment_tokens_duplicate, increment_tokens_unique,
        record_append_duration,
    },
};
use core::fmt;
use numlog_core::{
    DedupStore, LogAppender, Observation,
    types::{Input, MAX_LINE_BYTES, Token, TokenError, strip_terminator},
};
use std::{io, net::SocketAddr, sync::Arc, time::Instant};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
};

/// An accepted, registered client connection waiting for (or in) service.
///
/// Dropping it closes the socket and removes it from the registry.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    registration: Registration,
}

impl Connection {
    pub const fn new(stream: TcpStream, registration: Registration) -> Self {
        Self {
            stream,
            registration,
        }
    }

    pub const fn id(&self) -> ConnectionId {
        self.registration.id()
    }

    pub const fn peer(&self) -> SocketAddr {
        self.registration.peer()
    }
}

/// Shared state every worker needs to process lines.
#[derive(Clone, Debug)]
pub struct ConnectionContext {
    pub store: Arc<DedupStore>,
    pub appender: Arc<LogAppender>,
    pub shutdown: Arc<ShutdownCoordinator>,
}

/// Why a connection reached `CLOSED`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// The client closed its side, possibly mid-line.
    EndOfStream,
    /// The client sent a line that is neither a token nor `terminate`.
    Invalid(TokenError),
    /// The client sent `terminate`.
    Terminate,
    /// The shutdown coordinator closed the connection.
    ForcedClose,
    /// Reading from the socket failed.
    ReadError(io::ErrorKind),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EndOfStream => write!(f, "end of stream"),
            Self::Invalid(reason) => write!(f, "invalid input: {reason}"),
            Self::Terminate => write!(f, "terminate command"),
            Self::ForcedClose => write!(f, "closed by shutdown"),
            Self::ReadError(kind) => write!(f, "read error: {kind}"),
        }
    }
}

/// Result of processing one complete line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LineOutcome {
    /// First sighting, appended to the log.
    Stored,
    /// First sighting, but the append failed. The token still counts as seen.
    AppendFailed,
    /// Already seen; the duplicate counter was bumped.
    Duplicate,
    /// Stop reading and close the connection.
    Close(CloseReason),
}

/// Processes one terminator-stripped line received from `peer`.
pub async fn process_line(ctx: &ConnectionContext, line: &[u8], peer: SocketAddr) -> LineOutcome {
    match Input::classify_bytes(line) {
        Input::Terminate => {
            ctx.shutdown.initiate(ShutdownReason::ClientCommand { peer });
            LineOutcome::Close(CloseReason::Terminate)
        }
        Input::Invalid(reason) => {
            increment_inputs_rejected();
            LineOutcome::Close(CloseReason::Invalid(reason))
        }
        Input::Token(token) => {
            // Last gate before the store. An `initiate` racing past it still
            // gets this token stored and logged.
            if ctx.shutdown.is_shutting_down() {
                return LineOutcome::Close(CloseReason::ForcedClose);
            }
            match ctx.store.observe(token) {
                Observation::Duplicate => {
                    increment_tokens_duplicate();
                    LineOutcome::Duplicate
                }
                Observation::FirstSeen => {
                    increment_tokens_unique();
                    persist(&ctx.appender, token).await
                }
            }
        }
    }
}

/// Appends a first-seen token. The write runs on its own task so it completes
/// even if the calling worker is aborted mid-await.
async fn persist(appender: &Arc<LogAppender>, token: Token) -> LineOutcome {
    let appender = Arc::clone(appender);
    let start = Instant::now();
    let write = tokio::spawn(async move { appender.append(token).await });

    match write.await {
        Ok(Ok(())) => {
            record_append_duration(start.elapsed().as_secs_f64() * 1_000.0);
            LineOutcome::Stored
        }
        Ok(Err(e)) => {
            increment_log_write_errors();
            tracing::error!("Token {token} is recorded as seen but missing from the log: {e}");
            LineOutcome::AppendFailed
        }
        Err(e) => {
            increment_log_write_errors();
            tracing::error!("Append of token {token} did not complete: {e}");
            LineOutcome::AppendFailed
        }
    }
}

enum ReadLine {
    /// `buf` holds a complete line including its terminator.
    Line,
    /// The stream ended. Any partial line in `buf` must be ignored.
    Eof,
    /// More than [`MAX_LINE_BYTES`] arrived without a terminator.
    TooLong,
}

async fn read_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<ReadLine>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let limit = MAX_LINE_BYTES as u64 + 1;
    let n = reader.take(limit).read_until(b'\n', buf).await?;

    if n == 0 {
        Ok(ReadLine::Eof)
    } else if buf.last() == Some(&b'\n') {
        Ok(ReadLine::Line)
    } else if buf.len() > MAX_LINE_BYTES {
        Ok(ReadLine::TooLong)
    } else {
        Ok(ReadLine::Eof)
    }
}

/// Runs the read loop for `conn` until it closes, then deregisters it.
///
/// Cancellation is only observed while waiting for input: a line that has
/// been fully read is either processed to completion or, if shutdown began in
/// the meantime, discarded untouched.
#[tracing::instrument(name = "connection", skip_all, fields(id = conn.id(), peer = %conn.peer()))]
pub async fn handle_connection(conn: Connection, ctx: &ConnectionContext) -> CloseReason {
    increment_connections_active();
    tracing::debug!("Servicing connection");

    let Connection {
        stream,
        registration,
    } = conn;
    let peer = registration.peer();
    let close = registration.close_token().clone();

    let mut reader = BufReader::new(stream);
    let mut buf = Vec::with_capacity(64);

    let reason = loop {
        let read = tokio::select! {
            biased;
            () = close.cancelled() => break CloseReason::ForcedClose,
            read = read_line(&mut reader, &mut buf) => read,
        };

        match read {
            Ok(ReadLine::Line) => {}
            Ok(ReadLine::Eof) => break CloseReason::EndOfStream,
            Ok(ReadLine::TooLong) => {
                increment_inputs_rejected();
                break CloseReason::Invalid(TokenError::TooLong {
                    limit: MAX_LINE_BYTES,
                });
            }
            Err(e) => break CloseReason::ReadError(e.kind()),
        }

        if ctx.shutdown.is_shutting_down() {
            break CloseReason::ForcedClose;
        }

        let line = strip_terminator(&buf).unwrap_or(&buf);
        match process_line(ctx, line, peer).await {
            LineOutcome::Stored | LineOutcome::AppendFailed | LineOutcome::Duplicate => {}
            LineOutcome::Close(reason) => break reason,
        }
    };

    // Send FIN before the socket is dropped so clients see a clean end of
    // stream. Failure here just means the peer is already gone.
    let mut stream = reader.into_inner();
    let _ = stream.shutdown().await;
    drop(stream);
    drop(registration);

    decrement_connections_active();
    tracing::debug!("Connection closed: {reason}");
    reason
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::registry::ConnectionRegistry;
    use core::time::Duration;
    use numlog_core::SyncPolicy;
    use std::path::PathBuf;
    use tokio::net::TcpListener;

    struct Fixture {
        _dir: tempfile::TempDir,
        registry: Arc<ConnectionRegistry>,
        ctx: ConnectionContext,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("numbers.log");
        fixture_logging_to(dir, path).await
    }

    async fn fixture_logging_to(dir: tempfile::TempDir, path: impl Into<PathBuf>) -> Fixture {
        let appender = LogAppender::create(path, SyncPolicy::OsManaged)
            .await
            .unwrap();
        let registry = Arc::new(ConnectionRegistry::new());
        let ctx = ConnectionContext {
            store: Arc::new(DedupStore::new()),
            appender: Arc::new(appender),
            shutdown: Arc::new(ShutdownCoordinator::new(Arc::clone(&registry))),
        };
        Fixture {
            _dir: dir,
            registry,
            ctx,
        }
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    fn peer() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 5555))
    }

    fn log_contents(ctx: &ConnectionContext) -> String {
        std::fs::read_to_string(ctx.appender.path()).unwrap()
    }

    #[tokio::test]
    async fn first_sighting_is_stored_then_counted_as_duplicate() {
        let f = fixture().await;

        assert_eq!(
            process_line(&f.ctx, b"900987658", peer()).await,
            LineOutcome::Stored
        );
        assert_eq!(
            process_line(&f.ctx, b"900987658", peer()).await,
            LineOutcome::Duplicate
        );

        assert_eq!(f.ctx.store.size(), 1);
        assert_eq!(f.ctx.store.duplicate_count(), 1);
        assert_eq!(log_contents(&f.ctx), "900987658\n");
    }

    #[tokio::test]
    async fn invalid_lines_close_without_side_effects() {
        let f = fixture().await;

        for line in [&b"000987658999"[..], b"00098765L", b"", b"Terminate"] {
            let outcome = process_line(&f.ctx, line, peer()).await;
            assert!(
                matches!(outcome, LineOutcome::Close(CloseReason::Invalid(_))),
                "{outcome:?}"
            );
        }

        assert_eq!(f.ctx.store.size(), 0);
        assert_eq!(f.ctx.store.duplicate_count(), 0);
        assert_eq!(log_contents(&f.ctx), "");
        assert!(!f.ctx.shutdown.is_shutting_down());
    }

    #[tokio::test]
    async fn terminate_initiates_shutdown_and_closes_others() {
        let f = fixture().await;
        let other = f.registry.register(peer());

        assert_eq!(
            process_line(&f.ctx, b"terminate", peer()).await,
            LineOutcome::Close(CloseReason::Terminate)
        );
        assert!(f.ctx.shutdown.is_shutting_down());
        assert_eq!(
            f.ctx.shutdown.reason(),
            Some(ShutdownReason::ClientCommand { peer: peer() })
        );
        assert!(other.is_closed());
    }

    #[tokio::test]
    async fn read_line_distinguishes_complete_partial_and_oversized() {
        let mut buf = Vec::new();

        let mut reader = BufReader::new(&b"123456789\r\n00098"[..]);
        assert!(matches!(
            read_line(&mut reader, &mut buf).await.unwrap(),
            ReadLine::Line
        ));
        assert_eq!(strip_terminator(&buf), Some(&b"123456789"[..]));
        assert!(matches!(
            read_line(&mut reader, &mut buf).await.unwrap(),
            ReadLine::Eof
        ));
        assert_eq!(buf, b"00098");

        let oversized = vec![b'1'; MAX_LINE_BYTES + 10];
        let mut reader = BufReader::new(&oversized[..]);
        assert!(matches!(
            read_line(&mut reader, &mut buf).await.unwrap(),
            ReadLine::TooLong
        ));

        let mut reader = BufReader::new(&b""[..]);
        assert!(matches!(
            read_line(&mut reader, &mut buf).await.unwrap(),
            ReadLine::Eof
        ));
    }

    #[tokio::test]
    async fn leading_zero_tokens_are_logged_verbatim() {
        let f = fixture().await;
        process_line(&f.ctx, b"000000042", peer()).await;

        assert!(f.ctx.store.contains(Token::from_value(42).unwrap()));
        assert_eq!(log_contents(&f.ctx), "000000042\n");
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn failed_append_keeps_token_seen() {
        let f = fixture_logging_to(tempfile::tempdir().unwrap(), "/dev/full").await;

        assert_eq!(
            process_line(&f.ctx, b"123456789", peer()).await,
            LineOutcome::AppendFailed
        );
        assert_eq!(
            process_line(&f.ctx, b"123456789", peer()).await,
            LineOutcome::Duplicate
        );
        assert_eq!(f.ctx.store.size(), 1);
        assert_eq!(f.ctx.store.duplicate_count(), 1);

        assert_eq!(
            process_line(&f.ctx, b"987654321", peer()).await,
            LineOutcome::AppendFailed
        );
        assert_eq!(f.ctx.store.size(), 2);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn connection_keeps_reading_after_failed_append() {
        let f = fixture_logging_to(tempfile::tempdir().unwrap(), "/dev/full").await;
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut client = TcpStream::connect(listener.local_addr().unwrap())
            .await
            .unwrap();
        let (stream, peer) = listener.accept().await.unwrap();
        let conn = Connection::new(stream, f.registry.register(peer));

        let ctx = f.ctx.clone();
        let worker = tokio::spawn(async move { handle_connection(conn, &ctx).await });

        client.write_all(b"111111111\n").await.unwrap();
        wait_for(|| f.ctx.store.size() == 1).await;

        client
            .write_all(b"111111111\n222222222\n")
            .await
            .unwrap();
        wait_for(|| f.ctx.store.size() == 2 && f.ctx.store.duplicate_count() == 1).await;
        assert!(!worker.is_finished());

        drop(client);
        assert_eq!(worker.await.unwrap(), CloseReason::EndOfStream);
        assert!(f.registry.is_empty());
    }

    #[tokio::test]
    async fn tokens_after_shutdown_are_not_stored() {
        let f = fixture().await;
        f.ctx.shutdown.initiate(ShutdownReason::Requested);

        assert_eq!(
            process_line(&f.ctx, b"123456789", peer()).await,
            LineOutcome::Close(CloseReason::ForcedClose)
        );
        assert_eq!(f.ctx.store.size(), 0);
        assert_eq!(f.ctx.store.duplicate_count(), 0);
        assert_eq!(log_contents(&f.ctx), "");
    }

    #[tokio::test]
    async fn aborted_worker_still_logs_first_seen_token() {
        let f = fixture().await;

        let ctx = f.ctx.clone();
        let worker = tokio::spawn(async move { process_line(&ctx, b"555555555", peer()).await });

        // Single-threaded runtime: one yield lets the worker run up to its
        // first await, which is the spawned append.
        while f.ctx.store.size() == 0 {
            tokio::task::yield_now().await;
        }
        assert!(!worker.is_finished());
        worker.abort();
        assert!(worker.await.unwrap_err().is_cancelled());

        wait_for(|| log_contents(&f.ctx) == "555555555\n").await;
    }
}
