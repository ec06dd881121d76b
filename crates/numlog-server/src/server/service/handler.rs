//! The runnable number-log server.
//!
//! [`NumberServer::bind`] does everything that can fail up front: it truncates
//! the log file and binds the listener. [`NumberServer::run`] then serves until
//! the shutdown coordinator fires and drains in this order:
//!
//! 1. Stop accepting (the listener is dropped).
//! 2. Shut the worker pool down, closing in-flight and queued connections.
//! 3. Join the stats reporter.
//! 4. Flush and sync the log file.

use crate::server::{
    accept::accept_loop,
    config::ServerConfig,
    connection::ConnectionContext,
    pool::manager::WorkerPool,
    registry::ConnectionRegistry,
    shutdown::{ShutdownCoordinator, ShutdownReason},
    stats::StatsReporter,
};
use numlog_core::{DedupStore, Error, LogAppender, Result, StoreSnapshot};
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;

pub struct NumberServer {
    config: ServerConfig,
    listener: TcpListener,
    local_addr: SocketAddr,
    store: Arc<DedupStore>,
    appender: Arc<LogAppender>,
    registry: Arc<ConnectionRegistry>,
    shutdown: Arc<ShutdownCoordinator>,
}

impl NumberServer {
    /// Truncates the log file and binds the listening socket.
    ///
    /// # Errors
    ///
    /// - [`Error::LogOpen`] if the log file cannot be created or truncated.
    /// - [`Error::Bind`] if the listen address is unavailable.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let appender = LogAppender::create(&config.log_path, config.sync_policy).await?;

        let listener = TcpListener::bind(config.listen_addr)
            .await
            .map_err(|source| Error::Bind {
                addr: config.listen_addr,
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let registry = Arc::new(ConnectionRegistry::new());
        let shutdown = Arc::new(ShutdownCoordinator::new(Arc::clone(&registry)));

        Ok(Self {
            config,
            listener,
            local_addr,
            store: Arc::new(DedupStore::new()),
            appender: Arc::new(appender),
            registry,
            shutdown,
        })
    }

    /// The bound address, with the actual port when `0` was requested.
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            local_addr: self.local_addr,
            store: Arc::clone(&self.store),
            registry: Arc::clone(&self.registry),
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    /// Serves clients until shutdown is initiated, then drains.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LogWrite`] if the final flush of the log file fails.
    pub async fn run(self) -> Result<()> {
        let Self {
            config,
            listener,
            local_addr,
            store,
            appender,
            registry,
            shutdown,
        } = self;
        let token = shutdown.token();

        let ctx = ConnectionContext {
            store: Arc::clone(&store),
            appender: Arc::clone(&appender),
            shutdown: Arc::clone(&shutdown),
        };
        let pool = Arc::new(WorkerPool::spawn(
            config.num_workers,
            &ctx,
            token.clone(),
            config.shutdown_timeout,
        ));
        drop(ctx);

        let stats = tokio::spawn(
            StatsReporter::new(Arc::clone(&store)).run(config.report_interval, token.clone()),
        );

        tracing::info!(
            "Accepting connections on {local_addr} with {} workers",
            pool.num_workers()
        );
        accept_loop(listener, Arc::clone(&registry), Arc::clone(&pool), token).await;

        pool.shutdown().await?;

        if let Err(e) = stats.await {
            tracing::warn!("Stats reporter ended abnormally: {e}");
        }

        appender.close().await?;

        let StoreSnapshot { unique, duplicates } = store.snapshot();
        tracing::info!(
            "Server stopped ({}). {unique} unique numbers logged, {duplicates} duplicates seen",
            shutdown
                .reason()
                .map_or_else(|| "no reason recorded".to_string(), |r| r.to_string())
        );

        Ok(())
    }
}

/// Cloneable view of a running [`NumberServer`].
#[derive(Clone, Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    store: Arc<DedupStore>,
    registry: Arc<ConnectionRegistry>,
    shutdown: Arc<ShutdownCoordinator>,
}

impl ServerHandle {
    /// Requests shutdown. Returns `false` if it had already begun.
    pub fn shutdown(&self) -> bool {
        self.shutdown.initiate(ShutdownReason::Requested)
    }

    /// Requests shutdown on behalf of a process signal.
    pub fn shutdown_on_signal(&self) -> bool {
        self.shutdown.initiate(ShutdownReason::Signal)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_shutting_down()
    }

    /// Resolves once shutdown has begun, for whatever reason.
    pub async fn shutdown_started(&self) {
        self.shutdown.wait().await;
    }

    pub fn shutdown_reason(&self) -> Option<ShutdownReason> {
        self.shutdown.reason()
    }

    pub fn stats(&self) -> StoreSnapshot {
        self.store.snapshot()
    }

    /// Connections accepted and not yet closed, whether queued or in service.
    pub fn live_connections(&self) -> usize {
        self.registry.len()
    }

    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}
