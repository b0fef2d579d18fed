use anyhow::{Context, Result};
use darkroom::config::{Config, EmailBackend, ObjectStoreBackend, RecordStoreBackend};
use darkroom::email::{EmailTransport, InMemoryTransport, SesTransport};
use darkroom::store::memory::{InMemoryObjectStore, InMemoryRecordStore};
use darkroom::store::postgres::PgRecordStore;
use darkroom::store::s3::S3ObjectStore;
use darkroom::store::{ObjectStore, RecordStore};
use darkroom::topology::ReviewTopology;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting Darkroom review pipeline"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Collaborators are constructed once and injected explicitly; their
    // lifecycle is the process lifetime.
    let records: Arc<dyn RecordStore> = match config.record_store.backend {
        RecordStoreBackend::Memory => Arc::new(InMemoryRecordStore::new()),
        RecordStoreBackend::Postgres => {
            let store = PgRecordStore::connect(&config.record_store)
                .await
                .context("Failed to initialize record store")?;
            if config.record_store.run_migrations {
                store
                    .run_migrations()
                    .await
                    .context("Failed to run record store migrations")?;
            }
            Arc::new(store)
        }
    };

    let objects: Arc<dyn ObjectStore> = match config.object_store.backend {
        ObjectStoreBackend::Memory => Arc::new(InMemoryObjectStore::new()),
        ObjectStoreBackend::S3 => Arc::new(
            S3ObjectStore::new(&config.object_store)
                .await
                .context("Failed to initialize object store")?,
        ),
    };

    let transport: Arc<dyn EmailTransport> = match config.email.backend {
        EmailBackend::Memory => Arc::new(InMemoryTransport::new()),
        EmailBackend::Ses => Arc::new(
            SesTransport::new(&config.email)
                .await
                .context("Failed to initialize email transport")?,
        ),
    };

    // Wire the static topology and start the dispatch loops.
    let topology = ReviewTopology::build(&config, records, objects, transport);
    let handles = topology.spawn();

    info!("Review pipeline started");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down review pipeline");

    topology.shutdown();
    futures::future::join_all(handles).await;

    info!("Review pipeline stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
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
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
