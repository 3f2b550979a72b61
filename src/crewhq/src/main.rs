//! CrewHQ — multi-tenant HR platform control plane.
//!
//! Main entry point: wires the engines, seeds the operator identity,
//! starts the background workers, and serves the HTTP API.

use clap::Parser;
use crewhq_api::{build_router, AppState};
use crewhq_core::config::PlatformConfig;
use crewhq_core::mailer::LogMailer;
use crewhq_lifecycle::MaintenanceWorker;
use crewhq_metering::UsageScanWorker;
use crewhq_webhooks::WebhookRetryWorker;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "crewhq")]
#[command(about = "Multi-tenant HR platform control plane")]
#[command(version)]
struct Cli {
    /// HTTP port (overrides config)
    #[arg(long, env = "CREWHQ__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Bind host (overrides config)
    #[arg(long, env = "CREWHQ__API__HOST")]
    host: Option<String>,

    /// Seed a SuperAdmin identity with this email
    #[arg(long, env = "CREWHQ_OPERATOR_EMAIL")]
    operator_email: Option<String>,

    /// Password for the seeded SuperAdmin
    #[arg(long, env = "CREWHQ_OPERATOR_PASSWORD")]
    operator_password: Option<String>,

    /// Skip background workers (API-only mode)
    #[arg(long, default_value_t = false)]
    api_only: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "crewhq=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("CrewHQ control plane starting up");

    let mut config = PlatformConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        PlatformConfig::default()
    });
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(host) = cli.host {
        config.api.host = host;
    }

    info!(
        host = %config.api.host,
        port = config.api.http_port,
        grace_days = config.lifecycle.grace_period_days,
        retention_days = config.lifecycle.deletion_retention_days,
        "Configuration loaded"
    );

    let state = AppState::new(config.clone(), Arc::new(LogMailer));

    if let (Some(email), Some(password)) = (&cli.operator_email, &cli.operator_password) {
        match state.seed_operator(email, password) {
            Ok(user) => info!(email = %user.email, "Operator identity seeded"),
            Err(e) => warn!(error = %e, "Operator identity not seeded"),
        }
    }

    // Background workers observe a shared shutdown signal and finish their
    // in-flight tenant before exiting.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    if !cli.api_only {
        tokio::spawn(
            MaintenanceWorker::new(
                state.lifecycle.clone(),
                config.lifecycle.maintenance_interval_secs,
                shutdown_rx.clone(),
            )
            .run(),
        );
        tokio::spawn(
            UsageScanWorker::new(
                state.usage.clone(),
                config.usage.scan_interval_secs,
                shutdown_rx.clone(),
            )
            .run(),
        );
        let retry_interval = config
            .billing
            .webhook_retry_backoff_secs
            .first()
            .copied()
            .unwrap_or(30);
        tokio::spawn(
            WebhookRetryWorker::new(state.ingestor.clone(), retry_interval, shutdown_rx).run(),
        );
        info!("Background workers started (maintenance, usage scan, webhook retry)");
    } else {
        info!("Running in API-only mode (no background workers)");
    }

    let shutdown = async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => info!("Received SIGINT, shutting down"),
                _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
            }
        }

        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            info!("Received SIGINT, shutting down");
        }

        let _ = shutdown_tx.send(true);
    };

    let addr = std::net::SocketAddr::new(config.api.host.parse()?, config.api.http_port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "Starting HTTP server");
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("CrewHQ shut down cleanly");
    Ok(())
}
