//! Bridge Server - standalone server hosting the telephony-to-conversational-AI
//! audio bridge.
//!
//! Exposes one `WebSocket` upgrade endpoint per supported platform adapter
//! plus a liveness probe, and runs until a shutdown signal drains in-flight
//! calls through the bridge's connection registry.

mod config;

use std::path::PathBuf;

use anyhow::{Context, Result};
use bridge_core::{bootstrap_bridge, create_bridge_router};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;

use crate::config::ServerConfig;

/// Bridge Server - headless telephony-to-conversational-AI audio bridge.
#[derive(Parser, Debug)]
#[command(name = "bridge-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE", env = "BRIDGE_CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "BRIDGE_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long, env = "BRIDGE_BIND_PORT")]
    port: Option<u16>,

    /// Address advertised in logs/health output (overrides config file).
    #[arg(short = 'a', long, env = "BRIDGE_ADVERTISE_ADDR")]
    advertise_addr: Option<String>,

    /// Directory call recordings and transcripts are written under.
    #[arg(short = 'd', long, env = "BRIDGE_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Bridge Server v{}", env!("CARGO_PKG_VERSION"));

    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides (highest precedence).
    if let Some(port) = args.port {
        config.bind_port = port;
    }
    if let Some(addr) = args.advertise_addr {
        config.advertise_addr = Some(addr);
    }
    if let Some(data_dir) = args.data_dir {
        config.bridge.data_dir = Some(data_dir);
    }

    log::info!(
        "Configuration: bind={}:{}, storage_backend={:?}, use_local_ai={}",
        config.bind_addr,
        config.bind_port,
        config.bridge.storage_backend,
        config.bridge.use_local_ai,
    );
    if let Some(ref addr) = config.advertise_addr {
        log::info!("Advertised address: {addr}");
    }

    let bootstrap = bootstrap_bridge(&config.bridge)
        .await
        .context("Failed to bootstrap bridge services")?;

    log::info!("Bridge services bootstrapped successfully");

    let ws_manager = bootstrap.app_state.ws_manager.clone();
    let router = create_bridge_router(bootstrap.app_state);

    let addr = std::net::SocketAddr::new(config.bind_addr, config.bind_port);
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    log::info!("Listening on {addr} (/voicebot, /twilio, /health)");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            log::error!("Server error: {e}");
        }
    });

    shutdown_signal().await;

    log::info!("Shutdown signal received, draining in-flight calls...");

    let drained = ws_manager.close_all();
    log::info!("Signaled {drained} in-flight call(s) to close");
    bootstrap.shutdown();

    // Give in-flight calls a moment to finish their close sequence before
    // the process exits.
    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
    server_handle.abort();

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
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
