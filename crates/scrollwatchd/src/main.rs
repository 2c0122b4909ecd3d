//! scrollwatchd - The scrollwatch background service
//!
//! Owns the rule engine, serves the NDJSON protocol on a Unix socket, drives
//! the sweep and flush timers and persists state on shutdown and suspend.

use anyhow::Result;
use clap::Parser;
use scrollwatch_util::default_config_path;
use scrollwatchd::{Service, ServiceOptions};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// scrollwatchd - Per-domain browsing time budgets
#[derive(Parser, Debug)]
#[command(name = "scrollwatchd")]
#[command(about = "Per-domain browsing time budget service", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/scrollwatch/config.toml)
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Socket path override (or set SCROLLWATCH_SOCKET env var)
    #[arg(short, long, env = "SCROLLWATCH_SOCKET")]
    socket: Option<PathBuf>,

    /// Data directory override (or set SCROLLWATCH_DATA_DIR env var)
    #[arg(short, long, env = "SCROLLWATCH_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "scrollwatchd starting");

    if scrollwatch_util::is_mock_time_active() {
        info!(now = %scrollwatch_util::now(), "Running with mock time");
    }

    let service = Service::new(ServiceOptions {
        config_path: args.config,
        socket_path: args.socket,
        data_dir: args.data_dir,
    })
    .await?;

    service.run().await
}
