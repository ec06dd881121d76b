use clap::Parser;
use numlog_server::{
    CliArgs, NumberServer, ServerConfig, ServerHandle, server::telemetry::init_telemetry,
};
use tokio::signal;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry()?;

    let server = NumberServer::bind(config).await?;
    log_startup_info(&server);

    tokio::spawn(shutdown_signal(server.handle()));

    let res = server.run().await;
    if let Err(e) = &res {
        tracing::error!("Error during server shutdown: {e}");
    }

    providers.shutdown();

    res.map_err(Into::into)
}

fn log_startup_info(server: &NumberServer) {
    let config = server.config();
    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting number log on {} with full config: {:#?}",
            server.local_addr(),
            config
        );
    } else {
        tracing::info!(
            "Starting number log on {} with {} workers, logging to {}",
            server.local_addr(),
            config.num_workers,
            config.log_path.display()
        );
    }
}

/// Initiates shutdown on Ctrl+C or SIGTERM. Returns early if a client's
/// `terminate` got there first.
async fn shutdown_signal(handle: ServerHandle) {
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    tokio::select! {
        () = handle.shutdown_started() => return,
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }

    tracing::info!("Shutdown signal received, terminating gracefully...");
    handle.shutdown_on_signal();
}
