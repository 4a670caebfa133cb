use anyhow::{Context, Result};
use image_ranker::config::Config;
use image_ranker::image_fetcher::ImageFetcher;
use image_ranker::kafka_consumer::ArticleConsumer;
use image_ranker::kafka_producer::EnrichedProducer;
use image_ranker::quality_scorer::QualityScorer;
use image_ranker::s3_uploader::S3Uploader;
use image_ranker::transcoder::Transcoder;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting image ranker service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize components; the bucket must exist before the first upload
    let uploader = S3Uploader::new(&config.s3)
        .await
        .context("Failed to initialize S3 uploader")?;
    uploader
        .ensure_bucket()
        .await
        .context("Failed to ensure storage bucket")?;

    let fetcher = ImageFetcher::new(&config.fetcher).context("Failed to initialize image fetcher")?;
    let scorer = QualityScorer::new(config.scoring.clone());
    let transcoder = Transcoder::new(config.transcode.clone());
    let producer =
        EnrichedProducer::new(&config.kafka).context("Failed to initialize Kafka producer")?;

    let consumer = ArticleConsumer::new(&config, fetcher, scorer, transcoder, uploader, producer)
        .context("Failed to initialize Kafka consumer")?;

    // Spawn consumer task
    let consumer_handle = tokio::spawn(async move {
        if let Err(e) = consumer.run().await {
            error!(error = %e, "Kafka consumer error");
        }
    });

    info!("Image ranker service started");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down image ranker service");

    consumer_handle.abort();

    info!("Image ranker service stopped");

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
