use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use upload_service::{
    start_api_server, AppState, Config, FfmpegRemuxer, FfprobeProber, JwtValidator,
    MetadataStore, S3Uploader, UploadPipeline,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        bucket = %config.s3.bucket,
        accepted_content_type = %config.upload.accepted_content_type,
        "Starting Tubely Upload Service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize components
    let metadata_store = Arc::new(
        MetadataStore::new(&config.database)
            .await
            .context("Failed to initialize metadata store")?,
    );

    // Run migrations if enabled
    if config.database.run_migrations {
        metadata_store
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    let s3_uploader = Arc::new(
        S3Uploader::new(&config.s3)
            .await
            .context("Failed to initialize S3 uploader")?,
    );

    let pipeline = UploadPipeline::new(
        &config,
        Arc::new(FfprobeProber::new(&config.upload)),
        Arc::new(FfmpegRemuxer::new(&config.upload)),
        s3_uploader.clone(),
        metadata_store.clone(),
    )
    .context("Failed to initialize upload pipeline")?;

    // Create API state
    let api_state = AppState {
        pipeline: Arc::new(pipeline),
        records: metadata_store.clone(),
        store: s3_uploader.clone(),
        tokens: Arc::new(JwtValidator::new(&config.auth)),
        presigned_url_expiry: config.presigned_url_expiry(),
        max_upload_bytes: config.upload.max_upload_bytes,
    };

    // Spawn API server task
    let api_config = config.api.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = start_api_server(api_state, &api_config).await {
            error!(error = %e, "API server error");
        }
    });

    info!("Upload service started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down upload service");

    api_handle.abort();

    info!("Upload service stopped");

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
