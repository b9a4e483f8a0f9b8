//! Schoolcast Server - Standalone server for classroom broadcasting.
//!
//! This binary wires the broadcast engine to the UDP speaker controller and
//! the external audio tools, and exposes the operator HTTP API. It's designed
//! to run as a background daemon on the school's control PC.

mod config;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use schoolcast_core::{bootstrap_services, start_server, AppState};
use tokio::signal;

use crate::config::ServerConfig;

/// Schoolcast Server - Classroom speaker broadcast orchestration.
#[derive(Parser, Debug)]
#[command(name = "schoolcast-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "SCHOOLCAST_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long, env = "SCHOOLCAST_BIND_PORT")]
    port: Option<u16>,

    /// Speaker controller IP address (overrides config file).
    #[arg(long, env = "SCHOOLCAST_CONTROLLER_IP")]
    controller_ip: Option<std::net::IpAddr>,

    /// Data directory for generated audio and uploads.
    #[arg(short = 'd', long, env = "SCHOOLCAST_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Schoolcast Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(port) = args.port {
        config.bind_port = port;
    }
    if let Some(ip) = args.controller_ip {
        config.controller_ip = ip;
    }
    if let Some(data_dir) = args.data_dir {
        config.data_dir = Some(data_dir);
    }

    log::info!(
        "Configuration: bind_port={}, controller={}:{}, restore={}",
        config.bind_port,
        config.controller_ip,
        config.controller_port,
        config.restore_enabled
    );
    if config.allowed_ips.is_empty() {
        log::warn!("No client allow-list configured - the API accepts every client");
    }

    let core_config = config.to_core_config();
    let services = bootstrap_services(&core_config)
        .await
        .context("Failed to bootstrap services")?;

    log::info!("Services bootstrapped successfully");

    services.start_background_tasks();

    let app_state = AppState::new(&services, core_config);

    // The server stops accepting requests once the services' token is cancelled
    let stop = services.cancel_token.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(app_state, async move { stop.cancelled().await }).await {
            log::error!("Server error: {}", e);
        }
    });

    // Wait for shutdown signal
    shutdown_signal().await;

    log::info!("Shutdown signal received, cleaning up...");

    // Graceful shutdown: waits for a playing broadcast to finish its cleanup
    services.shutdown().await;

    if let Err(e) = server_handle.await {
        log::warn!("Server task ended abnormally: {}", e);
    }

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
