//! Jukebox Session (jukebox-session) - Main entry point
//!
//! Runs the playback session and recovery engine behind its HTTP/SSE API.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use jukebox_session::config::{Config, ConfigOverrides};
use jukebox_session::{api, db, SessionEngine};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for jukebox-session
#[derive(Parser, Debug)]
#[command(name = "jukebox-session")]
#[command(about = "Playback session and recovery engine for the jukebox")]
#[command(version)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config file)
    #[arg(short, long, env = "JUKEBOX_PORT")]
    port: Option<u16>,

    /// Path to the settings database (overrides config file)
    #[arg(short, long, env = "JUKEBOX_DATABASE")]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load(ConfigOverrides {
        config_path: args.config,
        database_path: args.database,
        port: args.port,
    })
    .context("Failed to load configuration")?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting jukebox-session v{} ({} {}) on port {}",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_PROFILE"),
        config.port
    );
    info!("Managed playlist: {}", config.playlist.name);

    let pool = match db::connect(&config.database_path).await {
        Ok(pool) => Some(pool),
        Err(e) => {
            warn!("Settings database unavailable, persistence disabled: {}", e);
            None
        }
    };

    let port = config.port;
    let engine = Arc::new(
        SessionEngine::from_config(config, pool).context("Failed to build session engine")?,
    );
    engine.start();

    api::run(Arc::clone(&engine), port, shutdown_signal())
        .await
        .context("Server error")?;

    engine.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
