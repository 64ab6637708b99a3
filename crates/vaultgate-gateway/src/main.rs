#![forbid(unsafe_code)]

//! Gateway entry point: configuration, logging, background tasks, serving.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vaultgate_gateway::config::GatewayConfig;
use vaultgate_gateway::{build, build_router};

#[derive(Parser)]
#[command(name = "vaultgate-gateway")]
#[command(about = "Vendor-facing payment-API security facade")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(long, default_value = "config/gateway.toml")]
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
    init_logging(&cli.log_level)?;

    info!("Starting vaultgate gateway v{}", env!("CARGO_PKG_VERSION"));

    let mut config = GatewayConfig::load(Some(&cli.config))
        .with_context(|| format!("loading configuration from {}", cli.config))?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    let gateway = build(config).await.context("wiring gateway")?;

    // Background workers: vault identity refresh, token cache sweep,
    // rotation reconciliation.
    let _identity_task = gateway
        .vault_client
        .clone()
        .spawn_identity_refresh(Duration::from_secs(30));
    let _sweep_task = gateway.token_cache.clone().spawn_sweeper();
    let _reconcile_task = gateway.state.rotations.clone().spawn_reconciler();

    let addr = format!(
        "{}:{}",
        gateway.state.config.server.host, gateway.state.config.server.port
    );
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(addr, "gateway listening");

    let router = build_router(gateway.state);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("gateway stopped");
    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
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
