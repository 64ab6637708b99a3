#![forbid(unsafe_code)]

//! Downstream service entry point.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vaultgate_downstream::config::DownstreamConfig;
use vaultgate_downstream::{build, build_router};

#[derive(Parser)]
#[command(name = "vaultgate-downstream")]
#[command(about = "Internal payment service trusting vaultgate capability tokens")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(long, default_value = "config/downstream.toml")]
    config: String,

    /// Override the listener port
    #[arg(long)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting vaultgate downstream v{}", env!("CARGO_PKG_VERSION"));

    let mut config = DownstreamConfig::load(Some(&cli.config))
        .with_context(|| format!("loading configuration from {}", cli.config))?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    let (state, vault_client) = build(config).await.context("wiring downstream service")?;
    let _identity_task = vault_client.clone().spawn_identity_refresh(Duration::from_secs(30));

    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(addr, "downstream listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("downstream stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
