//! # Sensor Sync Server
//!
//! Serves live sensor telemetry to dashboard viewers over WebSocket.
//!
//! ## Startup:
//! 1.  Loads `.env`, then configuration (defaults, `server_sensorsync.conf`,
//!     environment/CLI).
//! 2.  Installs logging (stdout + per-run log file).
//! 3.  Creates the PostgreSQL pool and pings it; an unreachable store or an
//!     invalid engine configuration aborts startup.
//! 4.  Serves `GET /ws` and `GET /health` until Ctrl-C or SIGTERM.

use anyhow::{Context, Result};
use lib_sensorsync::SyncEngine;
use lib_sensorsync::connections::db_postgres::{self, PoolSettings};
use lib_sensorsync::store::PostgresStore;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;

mod sensorsync_logic;
use sensorsync_logic::{config, downstream, logger};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = config::load_config();
    let log_dir = config.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"));
    let log_level = config.log_level.clone().unwrap_or_else(|| "info".to_string());
    let _log_guard = logger::setup_logging(&log_dir, &log_level)?;

    let database_url = config
        .database_url
        .clone()
        .context("DATABASE_URL is not set (use --database-url or the DATABASE_URL environment variable)")?;
    let pool_settings = PoolSettings {
        max_size: config.db_pool_size.unwrap_or(PoolSettings::default().max_size),
        ..PoolSettings::default()
    };
    let pool = db_postgres::create_pool(&database_url, &pool_settings)?;
    let store = Arc::new(PostgresStore::new(pool));

    let engine = SyncEngine::connect(store, config.engine_config())
        .await
        .context("Failed to start sync engine")?;
    let engine = Arc::new(engine);

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    let port = config.port.unwrap_or(3000);
    let downstream_handle = tokio::spawn(downstream::run(port, engine.clone(), shutdown_tx.subscribe()));

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            tracing::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = terminate() => {
            tracing::info!("SIGTERM received, initiating shutdown.");
        }
    }

    // Send shutdown signal to all components
    let _ = shutdown_tx.send(());
    engine.shutdown().await;

    match downstream_handle.await {
        Ok(Err(e)) => tracing::error!("Downstream server exited with error: {:#}", e),
        Err(e) => tracing::error!("Downstream task panicked: {}", e),
        Ok(Ok(())) => {}
    }

    tracing::info!("Shutdown complete.");
    Ok(())
}

#[cfg(unix)]
async fn terminate() {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut term_signal) => {
            term_signal.recv().await;
        }
        Err(e) => {
            tracing::warn!("Failed to install SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    // On non-unix platforms, just wait forever.
    std::future::pending::<()>().await;
}
