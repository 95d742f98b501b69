use anyhow::{Context, Result};
use chrono::FixedOffset;
use photo_service::{
    start_api_server, AppState, Config, OpenAiImageGenerator, PhotoStore, S3StorageProbe,
};
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
        "Starting photo service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    let offset = FixedOffset::east_opt(config.service.utc_offset_hours * 3600)
        .context("Invalid UTC offset")?;

    // Without a database there is nothing to serve
    let photo_store = Arc::new(
        PhotoStore::new(&config.database, offset)
            .await
            .context("Failed to initialize photo store")?,
    );

    if config.database.run_migrations {
        photo_store
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    let image_generator = Arc::new(
        OpenAiImageGenerator::new(&config.generator)
            .context("Failed to initialize image generator")?,
    );

    let storage_probe = Arc::new(S3StorageProbe::new(&config.s3).await);

    let state = AppState {
        photo_store,
        image_generator,
        storage_probe,
    };

    start_api_server(state, &config.api, shutdown_signal()).await?;

    info!("Photo service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
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

    info!("Shutting down photo service");
}
