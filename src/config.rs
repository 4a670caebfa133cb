use rdkafka::config::ClientConfig;
use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the image ranker service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Kafka configuration
    pub kafka: KafkaConfig,
    /// S3 configuration
    #[serde(default)]
    pub s3: S3Config,
    /// Candidate download configuration
    #[serde(default)]
    pub fetcher: FetcherConfig,
    /// Quality scoring configuration
    #[serde(default)]
    pub scoring: ScoringConfig,
    /// Transcoding configuration
    #[serde(default)]
    pub transcode: TranscodeConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    /// Delay applied after each successfully processed article, in
    /// milliseconds. Bounds CPU usage during catch-up; 0 disables.
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,
}

/// Kafka consumer/producer configuration
#[derive(Debug, Clone, Deserialize)]
pub struct KafkaConfig {
    /// Kafka bootstrap servers
    pub bootstrap_servers: String,
    /// Consumer group ID
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,
    /// Inbound topic carrying parsed articles with image candidates
    #[serde(default = "default_articles_topic")]
    pub articles_topic: String,
    /// Outbound topic for enriched articles
    #[serde(default = "default_enriched_topic")]
    pub enriched_topic: String,
    /// Enable SSL
    #[serde(default)]
    pub ssl_enabled: bool,
    /// SSL CA certificate path
    pub ssl_ca_location: Option<String>,
    /// SASL username
    pub sasl_username: Option<String>,
    /// SASL password
    pub sasl_password: Option<String>,
    /// Auto offset reset policy
    #[serde(default = "default_auto_offset_reset")]
    pub auto_offset_reset: String,
    /// Session timeout in milliseconds
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u32,
    /// Max poll interval in milliseconds
    #[serde(default = "default_max_poll_interval_ms")]
    pub max_poll_interval_ms: u32,
    /// Producer delivery timeout in milliseconds
    #[serde(default = "default_delivery_timeout_ms")]
    pub delivery_timeout_ms: u64,
}

/// S3 storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// S3 bucket name for processed images
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
}

/// Candidate download configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FetcherConfig {
    /// Per-request timeout in seconds
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,
    /// Identity header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Additional attempts after a failed download (0 = single attempt)
    #[serde(default)]
    pub max_retries: u32,
    /// Delay between retry attempts in milliseconds
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

/// Quality scoring thresholds and weights
#[derive(Debug, Clone, Deserialize)]
pub struct ScoringConfig {
    /// Minimum acceptable width in pixels
    #[serde(default = "default_min_width")]
    pub min_width: u32,
    /// Minimum acceptable height in pixels
    #[serde(default = "default_min_height")]
    pub min_height: u32,
    /// Reject images narrower than this width/height ratio
    #[serde(default = "default_min_aspect")]
    pub min_aspect: f64,
    /// Reject images wider than this width/height ratio
    #[serde(default = "default_max_aspect")]
    pub max_aspect: f64,
    /// Laplacian variance below this is considered too blurry
    #[serde(default = "default_blur_threshold")]
    pub blur_threshold: f64,
    /// Width at which the resolution component of the score saturates
    #[serde(default = "default_reference_width")]
    pub reference_width: u32,
    /// Hard floor: candidates must score strictly above this to win
    #[serde(default = "default_min_score")]
    pub min_score: f64,
}

/// Transcoding configuration for the winning candidate
#[derive(Debug, Clone, Deserialize)]
pub struct TranscodeConfig {
    /// Images wider than this are downscaled to this width
    #[serde(default = "default_max_width")]
    pub max_width: u32,
    /// WebP encoding quality (0-100)
    #[serde(default = "default_webp_quality")]
    pub webp_quality: f32,
}

// Default value functions
fn default_service_name() -> String {
    "image-ranker".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_throttle_ms() -> u64 {
    50
}

fn default_consumer_group() -> String {
    "image-ranker-group".to_string()
}

fn default_articles_topic() -> String {
    "parsed-articles".to_string()
}

fn default_enriched_topic() -> String {
    "enriched-articles".to_string()
}

fn default_auto_offset_reset() -> String {
    "earliest".to_string()
}

fn default_session_timeout_ms() -> u32 {
    30000
}

fn default_max_poll_interval_ms() -> u32 {
    300000
}

fn default_delivery_timeout_ms() -> u64 {
    30000
}

fn default_bucket() -> String {
    "processed-images".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_fetch_timeout_secs() -> u64 {
    5
}

fn default_user_agent() -> String {
    "NewsAggregatorBot/1.0".to_string()
}

fn default_retry_backoff_ms() -> u64 {
    250
}

fn default_min_width() -> u32 {
    200
}

fn default_min_height() -> u32 {
    150
}

fn default_min_aspect() -> f64 {
    0.5
}

fn default_max_aspect() -> f64 {
    3.0
}

fn default_blur_threshold() -> f64 {
    50.0
}

fn default_reference_width() -> u32 {
    1200
}

fn default_min_score() -> f64 {
    10.0
}

fn default_max_width() -> u32 {
    1200
}

fn default_webp_quality() -> f32 {
    85.0
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with default values
            .set_default("service.name", "image-ranker")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            // Add config file if present
            .add_source(config::File::with_name("config/ranker").required(false))
            .add_source(config::File::with_name("/etc/aggregator/ranker").required(false))
            // Override with environment variables
            // RANKER__KAFKA__BOOTSTRAP_SERVERS -> kafka.bootstrap_servers
            .add_source(
                config::Environment::with_prefix("RANKER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Get the post-message throttle delay as Duration
    pub fn throttle_delay(&self) -> Duration {
        Duration::from_millis(self.service.throttle_ms)
    }
}

impl KafkaConfig {
    /// Base rdkafka client settings shared by consumer and producer
    fn base_client_config(&self) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        client_config.set("bootstrap.servers", &self.bootstrap_servers);

        // Configure SSL if enabled
        if self.ssl_enabled {
            client_config.set("security.protocol", "SASL_SSL");
            if let Some(ref ca_location) = self.ssl_ca_location {
                client_config.set("ssl.ca.location", ca_location);
            }
        }

        // Configure SASL if credentials provided
        if let (Some(ref username), Some(ref password)) = (&self.sasl_username, &self.sasl_password)
        {
            client_config
                .set("sasl.mechanisms", "PLAIN")
                .set("sasl.username", username)
                .set("sasl.password", password);
        }

        client_config
    }

    /// Build the rdkafka consumer configuration
    pub fn consumer_client_config(&self) -> ClientConfig {
        let mut client_config = self.base_client_config();
        client_config
            .set("group.id", &self.consumer_group)
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("enable.auto.commit", "false")
            .set("session.timeout.ms", self.session_timeout_ms.to_string())
            .set(
                "max.poll.interval.ms",
                self.max_poll_interval_ms.to_string(),
            );
        client_config
    }

    /// Build the rdkafka producer configuration
    pub fn producer_client_config(&self) -> ClientConfig {
        let mut client_config = self.base_client_config();
        client_config.set("message.timeout.ms", self.delivery_timeout_ms.to_string());
        client_config
    }

    /// Get producer delivery timeout as Duration
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }
}

impl FetcherConfig {
    /// Get the per-request timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Get the retry backoff as Duration
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
            throttle_ms: default_throttle_ms(),
        }
    }
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: default_bucket(),
            region: default_region(),
            endpoint_url: None,
            force_path_style: false,
        }
    }
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout_secs(),
            user_agent: default_user_agent(),
            max_retries: 0,
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            min_width: default_min_width(),
            min_height: default_min_height(),
            min_aspect: default_min_aspect(),
            max_aspect: default_max_aspect(),
            blur_threshold: default_blur_threshold(),
            reference_width: default_reference_width(),
            min_score: default_min_score(),
        }
    }
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            max_width: default_max_width(),
            webp_quality: default_webp_quality(),
        }
    }
}
