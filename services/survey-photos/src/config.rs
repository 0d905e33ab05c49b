use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Configuration validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

/// Main configuration for the survey photo service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Kafka configuration (object notifications)
    pub kafka: KafkaConfig,
    /// Object storage configuration
    pub storage: StorageConfig,
    /// Media service configuration
    pub media: MediaConfig,
    /// Media service credential configuration
    pub credentials: CredentialsConfig,
    /// Health API configuration
    #[serde(default)]
    pub api: ApiConfig,
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
}

/// Kafka consumer configuration
#[derive(Debug, Clone, Deserialize)]
pub struct KafkaConfig {
    /// Kafka bootstrap servers
    pub bootstrap_servers: String,
    /// Consumer group ID
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,
    /// Topic carrying object-created notifications
    #[serde(default = "default_notification_topic")]
    pub notification_topic: String,
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
}

/// How fetched photos are written to the destination store
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PhotoEncoding {
    /// Raw bytes with the content type reported by the media service
    #[default]
    Raw,
    /// Base64 text with `text/plain`, as earlier consumers expect
    Base64Text,
}

/// Object storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Destination bucket for photos
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, GCS interop, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Key prefix of raw survey exports; other objects are ignored
    #[serde(default = "default_source_prefix")]
    pub source_prefix: String,
    /// Root folder of stored photos
    #[serde(default = "default_photo_path_root")]
    pub photo_path_root: String,
    /// Stored photo encoding
    #[serde(default)]
    pub photo_encoding: PhotoEncoding,
}

/// Media service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MediaConfig {
    /// OAuth consumer key
    pub consumer_key: String,
    /// Download URL up to the attachment id
    pub download_url_prefix: String,
    /// Download URL after the attachment id
    #[serde(default)]
    pub download_url_suffix: String,
    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Attempts per photo when the service is unavailable
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay between attempts in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

/// Where the media service secret comes from
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecretSource {
    /// Secret given in plain text
    #[default]
    Plaintext,
    /// Base64 ciphertext decrypted with KMS on every fetch
    Kms,
}

/// Media service credential configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CredentialsConfig {
    #[serde(default)]
    pub source: SecretSource,
    /// Plain-text consumer secret
    pub secret: Option<String>,
    /// Base64-encoded KMS ciphertext of the consumer secret
    pub encrypted_secret: Option<String>,
    /// KMS key id or ARN (optional for symmetric keys)
    pub kms_key_id: Option<String>,
}

/// Health API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
}

// Default value functions
fn default_service_name() -> String {
    "survey-photos".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_consumer_group() -> String {
    "survey-photos".to_string()
}

fn default_notification_topic() -> String {
    "survey.exports.created".to_string()
}

fn default_auto_offset_reset() -> String {
    "earliest".to_string()
}

fn default_session_timeout_ms() -> u32 {
    30000
}

fn default_max_poll_interval_ms() -> u32 {
    // Large exports may take minutes to download
    600000
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_source_prefix() -> String {
    "source".to_string()
}

fn default_photo_path_root() -> String {
    "photos".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    2000
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/survey-photos").required(false))
            .add_source(config::File::with_name("/etc/survey-photos/config").required(false))
            // SURVEY_PHOTOS__MEDIA__CONSUMER_KEY -> media.consumer_key
            .add_source(
                config::Environment::with_prefix("SURVEY_PHOTOS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check values serde cannot check on its own
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.kafka.bootstrap_servers.is_empty() {
            return Err(ConfigError::MissingField("kafka.bootstrap_servers".to_string()));
        }

        if self.storage.bucket.is_empty() {
            return Err(ConfigError::MissingField("storage.bucket".to_string()));
        }

        if self.storage.photo_path_root.trim_matches('/').is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "storage.photo_path_root".to_string(),
                message: "must name a folder".to_string(),
            });
        }

        if self.media.consumer_key.is_empty() {
            return Err(ConfigError::MissingField("media.consumer_key".to_string()));
        }

        if url::Url::parse(&self.media.download_url_prefix).is_err() {
            return Err(ConfigError::InvalidValue {
                field: "media.download_url_prefix".to_string(),
                message: format!("not an absolute URL: {}", self.media.download_url_prefix),
            });
        }

        if self.media.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "media.max_attempts".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        match self.credentials.source {
            SecretSource::Plaintext if self.credentials.secret.is_none() => {
                Err(ConfigError::MissingField("credentials.secret".to_string()))
            }
            SecretSource::Kms if self.credentials.encrypted_secret.is_none() => Err(
                ConfigError::MissingField("credentials.encrypted_secret".to_string()),
            ),
            _ => Ok(()),
        }
    }
}

impl MediaConfig {
    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Get delay between fetch attempts as Duration
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
        }
    }
}
