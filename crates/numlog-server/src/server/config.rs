use anyhow::bail;
use clap::Parser;
use core::time::Duration;
use numlog_core::SyncPolicy;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

/// Number of connections serviced concurrently. Further connections are
/// accepted and queued, but not read from.
pub const WORKERS: usize = 5;

/// Interval between two stats reports. The first report fires at startup.
pub const REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Runtime configuration for the `numlog-server` binary.
///
/// Values are parsed from CLI arguments or environment variables. The worker
/// count and reporting interval are fixed at [`WORKERS`] and
/// [`REPORT_INTERVAL`].
#[derive(Parser, Debug, Clone)]
#[command(
    name = "numlog-server",
    version,
    about = "A TCP server that deduplicates 9-digit numbers into a log"
)]
pub struct CliArgs {
    /// Interface to listen on.
    ///
    /// Environment variable: `NUMLOG_HOST`
    #[arg(long, env = "NUMLOG_HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// TCP port to listen on.
    ///
    /// Environment variable: `NUMLOG_PORT`
    #[arg(short, long, env = "NUMLOG_PORT", default_value_t = 4000)]
    pub port: u16,

    /// File that receives every first-seen number, one per line. Truncated at
    /// startup.
    ///
    /// Environment variable: `NUMLOG_LOG_PATH`
    #[arg(long, env = "NUMLOG_LOG_PATH", default_value = "numbers.log")]
    pub log_path: PathBuf,

    /// Sync the log to disk after every appended number.
    ///
    /// Turning this off trades durability on power loss for throughput; the
    /// data is still handed to the OS before the next number is accepted.
    ///
    /// Environment variable: `NUMLOG_FSYNC`
    #[arg(long, env = "NUMLOG_FSYNC", default_value_t = true, action = clap::ArgAction::Set)]
    pub fsync: bool,

    /// Seconds to wait for workers to acknowledge shutdown.
    ///
    /// Environment variable: `NUMLOG_SHUTDOWN_TIMEOUT`
    #[arg(long, env = "NUMLOG_SHUTDOWN_TIMEOUT", default_value_t = 3)]
    pub shutdown_timeout: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub log_path: PathBuf,
    pub sync_policy: SyncPolicy,
    pub num_workers: usize,
    pub report_interval: Duration,
    pub shutdown_timeout: Duration,
}

impl ServerConfig {
    /// Config with the fixed defaults, listening on `listen_addr` and writing
    /// to `log_path`.
    pub fn new(listen_addr: SocketAddr, log_path: impl Into<PathBuf>) -> Self {
        Self {
            listen_addr,
            log_path: log_path.into(),
            sync_policy: SyncPolicy::EveryRecord,
            num_workers: WORKERS,
            report_interval: REPORT_INTERVAL,
            shutdown_timeout: Duration::from_secs(3),
        }
    }
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.port == 0 {
            bail!("NUMLOG_PORT must be greater than 0");
        }

        if args.log_path.as_os_str().is_empty() {
            bail!("NUMLOG_LOG_PATH must not be empty");
        }

        if args.shutdown_timeout == 0 {
            bail!("NUMLOG_SHUTDOWN_TIMEOUT must be greater than 0");
        }

        Ok(Self {
            listen_addr: SocketAddr::new(args.host, args.port),
            log_path: args.log_path,
            sync_policy: SyncPolicy::from_fsync(args.fsync),
            num_workers: WORKERS,
            report_interval: REPORT_INTERVAL,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
        })
    }
}
