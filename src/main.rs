use anyhow::{Context, Result};
use resize_service::config::Config;
use resize_service::consumer::NotificationConsumer;
use resize_service::processor::ResizeProcessor;
use resize_service::store::S3Store;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(service = %config.service.name, "Starting resize service");

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize components
    let store = Arc::new(
        S3Store::new(&config.s3)
            .await
            .context("Failed to initialize S3 store")?,
    );

    let processor = Arc::new(ResizeProcessor::new(store, config.resize.clone()));

    let consumer = NotificationConsumer::new(&config.kafka, processor)
        .context("Failed to initialize Kafka consumer")?;

    // Spawn consumer task
    let consumer_handle = tokio::spawn(async move {
        if let Err(e) = consumer.run().await {
            error!(error = %e, "Notification consumer error");
        }
    });

    info!("Resize service started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down resize service");

    consumer_handle.abort();

    info!("Resize service stopped");

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
