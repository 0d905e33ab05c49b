use anyhow::{Context, Result};
use aws_config::{BehaviorVersion, Region};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use survey_photos::config::Config;
use survey_photos::health::{start_api_server, AppState};
use survey_photos::{
    credentials, IngestOrchestrator, PhotoFetcher, PhotoStore, ReqwestTransport, S3ObjectStore,
    SurveyExportConsumer,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        bucket = %config.storage.bucket,
        "Starting survey photo ingest service"
    );

    init_metrics(config.service.metrics_port)?;

    let sdk_config = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(config.storage.region.clone()))
        .load()
        .await;

    let store = Arc::new(S3ObjectStore::new(&sdk_config, &config.storage));

    let secrets = credentials::from_config(&config.credentials, &sdk_config)
        .context("Failed to initialize media service credentials")?;
    let transport = Arc::new(
        ReqwestTransport::new(config.media.request_timeout())
            .context("Failed to initialize media service client")?,
    );
    let fetcher = Arc::new(PhotoFetcher::new(&config.media, transport, secrets));

    let photo_store = PhotoStore::new(&config.storage, store.clone(), fetcher);
    let orchestrator = Arc::new(IngestOrchestrator::new(
        config.storage.source_prefix.clone(),
        store,
        photo_store,
    ));

    let consumer_running = Arc::new(AtomicBool::new(false));
    let kafka_consumer =
        SurveyExportConsumer::new(&config.kafka, orchestrator, consumer_running.clone())
            .context("Failed to initialize Kafka consumer")?;

    let shutdown = CancellationToken::new();

    let consumer_shutdown = shutdown.clone();
    let consumer_handle = tokio::spawn(async move {
        if let Err(e) = kafka_consumer.run(consumer_shutdown).await {
            error!(error = %e, "Kafka consumer error");
        }
    });

    let api_state = AppState {
        service_name: config.service.name.clone(),
        consumer_running,
    };
    let api_config = config.api.clone();
    let api_shutdown = shutdown.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = start_api_server(api_state, &api_config, api_shutdown).await {
            error!(error = %e, "API server error");
        }
    });

    info!("Survey photo ingest service started");

    shutdown_signal().await;

    info!("Shutting down survey photo ingest service");

    // In-flight exports finish before the consumer loop observes the token
    shutdown.cancel();
    if let Err(e) = consumer_handle.await {
        error!(error = %e, "Kafka consumer task failed");
    }
    if let Err(e) = api_handle.await {
        error!(error = %e, "API server task failed");
    }

    info!("Survey photo ingest service stopped");

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
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
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
                error!(error = %e, "Failed to install SIGTERM handler");
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
}
