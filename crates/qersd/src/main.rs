//! qersd - QERS batch evaluation daemon.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use qers_core::telemetry::level_for;
use qers_core::{BatchService, ServiceConfig};

#[derive(Parser)]
#[command(name = "qersd")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "QERS batch multi-profile evaluation service", long_about = None)]
struct Cli {
    /// Service config file (TOML)
    #[arg(short, long, env = "QERS_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overrides the config file
    #[arg(long)]
    listen: Option<String>,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    qers_core::init_tracing(cli.json, level_for(cli.verbose));

    let mut config =
        ServiceConfig::load(cli.config.as_deref()).context("Failed to load service config")?;
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }

    let service = BatchService::from_config(&config)
        .await
        .context("Failed to start batch service")?;
    let listener = tokio::net::TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen))?;

    qersd::serve(listener, Arc::new(service), shutdown_signal())
        .await
        .context("HTTP server failed")?;
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown requested"),
        Err(e) => {
            tracing::warn!(error = %e, "cannot listen for ctrl-c; running until killed");
            std::future::pending::<()>().await;
        }
    }
}
