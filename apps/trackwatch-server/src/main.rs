//! trackwatch Server - standalone headless server.
//!
//! Monitors configured RTSP audio feeds and records confirmed,
//! de-duplicated plays into the embedded store.

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use trackwatch_core::bootstrap_services;
use trackwatch_core::Config;

/// trackwatch Server.
///
/// Most configuration is read from the environment per the
/// `STREAM_COUNT`/`STREAM_i_*` layout; this flag covers the one
/// process-level concern that doesn't belong in env-var configuration.
#[derive(Parser, Debug)]
#[command(name = "trackwatch-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Tracing filter directive, e.g. "info" or "trackwatch_core=debug".
    #[arg(short, long, default_value = "info", env = "TRACKWATCH_LOG")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!("trackwatch server v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env().context("failed to load configuration")?;
    tracing::info!(stream_count = config.streams.len(), "configuration loaded");

    let services = bootstrap_services(config)
        .await
        .context("failed to bootstrap services")?;

    services.start_workers();
    tracing::info!("stream workers started");

    shutdown_signal().await;
    tracing::info!("shutdown signal received, cleaning up");

    services.shutdown().await;
    tracing::info!("shutdown complete");

    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
