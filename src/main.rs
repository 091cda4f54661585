#![forbid(unsafe_code)]

//! `overlay-broker` — session overlay broker daemon.
//!
//! Loads configuration, owns the session registry, mount controller, and
//! call tracker, and serves host hook events over the local IPC socket.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use overlay_broker::broker::Broker;
use overlay_broker::config::GlobalConfig;
use overlay_broker::ipc::server::spawn_ipc_server;
use overlay_broker::overlay::platform_supported;
use overlay_broker::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "overlay-broker", about = "Session overlay broker", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the IPC socket name.
    #[arg(long)]
    ipc_name: Option<String>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("overlay-broker bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = match &args.config {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::from_toml_str("")?,
    };
    if let Some(name) = args.ipc_name {
        config.ipc_name = name;
    }
    info!(
        store_dir = %config.store.dir.display(),
        mount_base_dir = %config.overlay.mount_base_dir.display(),
        auto_mount = config.overlay.auto_mount,
        "configuration loaded"
    );
    if !platform_supported() {
        info!("overlay mounts are not supported on this platform; sessions run unsandboxed");
    }

    let broker = Arc::new(Broker::new(config));

    // ── Start IPC server ────────────────────────────────
    let ct = CancellationToken::new();
    let ipc_handle = spawn_ipc_server(
        broker.config().ipc_name.clone(),
        Arc::clone(broker.hooks()),
        ct.clone(),
    )?;

    info!("overlay-broker ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    broker.shutdown().await;

    if let Err(err) = ipc_handle.await {
        error!(%err, "ipc server task failed");
    }
    info!("overlay-broker shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
