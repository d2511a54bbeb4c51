//! Reference Data Loader Binary
//!
//! Loads every price and dividend file found in the input directory, then
//! prints how long it took and how many price bars were written.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin refdata-loader
//! ```
//!
//! # Environment Variables
//!
//! - `REFDATA_CONTACT_POINTS`: Comma-separated store hosts (default: localhost)
//! - `REFDATA_STORE_PORT`: CQL port for hosts without one (default: 9042)
//! - `REFDATA_KEYSPACE`: Keyspace (default: `datastax_referencedata_demo`)
//! - `REFDATA_STORE_BACKEND`: scylla | memory (default: scylla)
//! - `REFDATA_CONNECT_TIMEOUT_SECS`: Connection timeout (default: 5)
//! - `REFDATA_WORKERS`: Writers per pipeline (default: 5)
//! - `REFDATA_CHANNEL_CAPACITY`: Batches per channel (default: 10)
//! - `REFDATA_WRITE_TIMEOUT_SECS`: Per-batch completion timeout, 0 = none (default: 60)
//! - `REFDATA_WRITE_RETRIES`: Retries per transient write failure (default: 2)
//! - `REFDATA_CSV_DIR`: Input directory (default: data/csv)
//! - `REFDATA_LOAD_DIVIDENDS`: Load dividend files (default: true)
//! - `REFDATA_PROGRESS_INTERVAL_SECS`: Progress log interval (default: 10)
//! - `REFDATA_METRICS_PORT`: Prometheus port, 0 = disabled (default: 0)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Log filter (default: info)

use std::sync::Arc;

use anyhow::Context;
use refdata_loader::application::services::{BulkLoader, LoadPlan, LoadSummary, StoreGateway};
use refdata_loader::infrastructure::config::{LoaderConfig, StoreBackend};
use refdata_loader::infrastructure::csv::{CsvRecordSource, discover_files};
use refdata_loader::infrastructure::memory::InMemoryReferenceStore;
use refdata_loader::infrastructure::scylla::ScyllaReferenceStore;
use refdata_loader::infrastructure::telemetry;
use refdata_loader::{ReferenceStorePort, init_metrics};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let telemetry_guard = telemetry::init();

    tracing::info!("Starting reference data loader");

    let config = LoaderConfig::from_env().context("invalid configuration")?;
    log_config(&config, telemetry_guard.exporting());

    if config.metrics_port != 0
        && let Err(e) = init_metrics(config.metrics_port)
    {
        tracing::warn!(error = %e, port = config.metrics_port, "Metrics exporter not started");
    }

    let plan = discover_files(&config.input.csv_dir).context("cannot list input directory")?;

    let shutdown_token = CancellationToken::new();
    tokio::spawn(watch_signals(shutdown_token.clone()));

    let summary = match config.store.backend {
        StoreBackend::Scylla => {
            let store = ScyllaReferenceStore::connect(&config.store)
                .await
                .context("reference store is unavailable")?;
            load(store, &config, plan, shutdown_token).await
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store, nothing will be persisted");
            load(InMemoryReferenceStore::new(), &config, plan, shutdown_token).await
        }
    };

    for failure in &summary.failures.sample {
        tracing::warn!(error = %failure, "Unacknowledged write");
    }
    if summary.cancelled {
        tracing::warn!("Load interrupted by shutdown signal");
    }

    tracing::info!("Reference data loader stopped");
    Ok(())
}

async fn load<S: ReferenceStorePort>(
    store: S,
    config: &LoaderConfig,
    plan: LoadPlan,
    shutdown_token: CancellationToken,
) -> LoadSummary {
    let gateway = Arc::new(StoreGateway::new(
        Arc::new(store),
        config.writes.gateway_settings(),
    ));
    let loader = BulkLoader::new(gateway, CsvRecordSource::new(), config.pipeline);
    loader.run(plan, shutdown_token).await
}

/// Log the parsed configuration.
fn log_config(config: &LoaderConfig, span_export: bool) {
    tracing::info!(
        backend = config.store.backend.as_str(),
        nodes = ?config.store.known_nodes(),
        keyspace = %config.store.keyspace,
        workers = config.pipeline.workers,
        channel_capacity = config.pipeline.channel_capacity,
        load_dividends = config.pipeline.load_dividends,
        csv_dir = %config.input.csv_dir.display(),
        metrics_port = config.metrics_port,
        span_export,
        "Configuration loaded"
    );
    tracing::debug!(
        write_timeout = ?config.writes.timeout,
        write_retries = config.writes.retries,
        connect_timeout = ?config.store.connect_timeout,
        "Write settings"
    );
}

/// Load .env from the current directory or the nearest ancestor that has one.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Cancel `shutdown_token` on SIGINT or SIGTERM.
async fn watch_signals(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler unavailable");
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
                tracing::error!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, stopping load");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, stopping load");
        }
    }

    shutdown_token.cancel();
}
