//! # dt-daemon
//!
//! DevTel Copilot HTTP daemon.
//!
//! Serves the chat, proposal, executed-action and compliance API under
//! `/tenant/{tenant_id}/chat`, and forwards chat turns to the external
//! agent service.
//!
//! ## Usage
//!
//! ```text
//! dt-daemon --data-dir .devtel --bind 127.0.0.1:7411
//! ```
//!
//! Settings are read from `<data-dir>/daemon.toml` when present;
//! `CREWAI_SERVICE_URL`, `CREWAI_SERVICE_TOKEN` and `COMPLIANCE_SECRET`
//! override the file.

mod api;
mod config;
mod state;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::config::DaemonConfig;
use crate::state::AppState;

/// DevTel Copilot HTTP daemon.
#[derive(Parser)]
#[command(name = "dt-daemon", about = "DevTel Copilot HTTP API", version)]
struct Cli {
    /// Directory holding every store (created if missing).
    #[arg(long, default_value = ".devtel")]
    data_dir: PathBuf,

    /// Config file (defaults to <data-dir>/daemon.toml).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address; overrides the config file.
    #[arg(long)]
    bind: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::from_default_env()
        .add_directive("dt_daemon=info".parse()?)
        .add_directive("dt_chat=info".parse()?)
        .add_directive("dt_proposals=info".parse()?);
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .init();
    }

    let mut config = DaemonConfig::resolve(cli.config.as_deref(), &cli.data_dir)?;
    config.apply_env();
    if let Some(bind) = cli.bind {
        config.bind = bind;
    }

    tracing::info!("Starting DevTel Copilot daemon");
    tracing::info!("Data directory: {}", config.data_dir.display());
    tracing::info!("Agent service: {}", config.agent.base_url);

    let state = AppState::open(&config)?;
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    tracing::info!("Listening on {}", config.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .inspect_err(|e| tracing::error!("server error: {:?}", e))?;

    tracing::info!("Daemon shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for shutdown signal: {}", e);
    }
}
