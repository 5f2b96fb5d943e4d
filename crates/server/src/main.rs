//! sluice: read-only SQL gateway for Amazon Redshift.
//!
//! Serves `POST /mcp` (one JSON-RPC call answered with one SSE frame) and
//! `GET /healthz`.

mod api;
mod audit_log;
mod auth;
mod gateway;
mod router;
mod state;

use std::sync::Arc;

use clap::Parser;
use tracing::info;

use sluice_core::Config;
use sluice_warehouse::{build_backend, WarehouseConfig};

use crate::audit_log::AuditLog;
use crate::auth::Authenticator;
use crate::gateway::Gateway;
use crate::state::AppState;

// ── CLI ─────────────────────────────────────────────────────────────

/// Read-only SQL gateway for Amazon Redshift.
#[derive(Parser, Debug)]
#[command(name = "sluice", version, about)]
struct Cli {
    /// Listen address (overrides HOST).
    #[arg(long)]
    host: Option<String>,

    /// Listen port (overrides PORT).
    #[arg(long)]
    port: Option<u16>,

    /// Validate configuration, print the redacted summary and exit.
    #[arg(long)]
    check_config: bool,
}

fn load_config(cli: &Cli) -> anyhow::Result<(Config, WarehouseConfig)> {
    sluice_core::config::load_dotenv();
    let mut config = Config::from_env();
    let warehouse = WarehouseConfig::from_env()?;

    if let Some(host) = &cli.host {
        config.server.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    let mut missing = config.missing_keys();
    missing.extend(warehouse.missing_keys());
    if !missing.is_empty() {
        anyhow::bail!("Missing required configuration: {}", missing.join(", "));
    }

    Ok((config, warehouse))
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let (config, warehouse) = load_config(&cli)?;

    if cli.check_config {
        let mut summary = config.redacted_summary();
        summary["warehouse"] = serde_json::to_value(&warehouse)?;
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    config.log_summary();
    warehouse.log_summary();

    let backend = build_backend(&warehouse).await?;
    let audit = Arc::new(AuditLog::open(config.audit.log_path.as_deref())?);
    if let Some(path) = audit.path() {
        info!("Audit trail appending to {}", path.display());
    }

    let api_key = config.auth.api_key.clone().unwrap_or_default();
    let gateway = Gateway::new(
        Authenticator::new(api_key),
        backend,
        audit.clone(),
        warehouse.query_timeout(),
    );
    info!(backend = gateway.backend_name(), "Gateway ready");

    let state = Arc::new(AppState {
        gateway: Arc::new(gateway),
    });
    let app = router::build_router(state);

    let addr = config.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!(audited = audit.recorded(), "Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
