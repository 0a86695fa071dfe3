use serde::Deserialize;

/// Main configuration for the resize service
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
    /// Resize and coordination configuration
    #[serde(default)]
    pub resize: ResizeConfig,
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
    /// Topic carrying object-store change notification batches
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

/// S3 client configuration
///
/// The bucket is not configured here: every change notification names the
/// bucket that owns the object, and outputs are written back to it.
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
}

/// Resize and per-key coordination configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ResizeConfig {
    /// Maximum output width in pixels
    #[serde(default = "default_max_dimension")]
    pub max_width: u32,
    /// Maximum output height in pixels
    #[serde(default = "default_max_dimension")]
    pub max_height: u32,
    /// Key prefix for resized outputs (empty = same namespace as inputs)
    #[serde(default)]
    pub output_prefix: String,
    /// Allow-listed input extensions, with leading dot
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
    /// Output encoding format (jpeg or png)
    #[serde(default)]
    pub output_format: OutputFormat,
    /// Output encoding quality (JPEG only, 1-100)
    #[serde(default = "default_output_quality")]
    pub output_quality: u8,
    /// Advisory lock expiry in seconds, recorded on the lock object
    #[serde(default = "default_lock_expiry_secs")]
    pub lock_expiry_secs: u64,
}

/// Output encoding format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Jpeg,
    Png,
}

impl OutputFormat {
    /// Content type for the encoded output
    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Png => "image/png",
        }
    }
}

// Default value functions
fn default_service_name() -> String {
    "resize-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_consumer_group() -> String {
    "resize-service".to_string()
}

fn default_notification_topic() -> String {
    "resize.notifications".to_string()
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

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_max_dimension() -> u32 {
    1280
}

fn default_allowed_extensions() -> Vec<String> {
    [".jpg", ".jpeg", ".png", ".bmp", ".gif", ".tiff", ".webp"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_output_quality() -> u8 {
    85
}

fn default_lock_expiry_secs() -> u64 {
    300
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with default values
            .set_default("service.name", "resize-service")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            // Add config file if present
            .add_source(config::File::with_name("config/resizer").required(false))
            .add_source(config::File::with_name("/etc/resizer/resizer").required(false))
            // Override with environment variables
            // RESIZER__KAFKA__BOOTSTRAP_SERVERS -> kafka.bootstrap_servers
            .add_source(
                config::Environment::with_prefix("RESIZER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
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

impl Default for S3Config {
    fn default() -> Self {
        Self {
            region: default_region(),
            endpoint_url: None,
            force_path_style: false,
        }
    }
}

impl Default for ResizeConfig {
    fn default() -> Self {
        Self {
            max_width: default_max_dimension(),
            max_height: default_max_dimension(),
            output_prefix: String::new(),
            allowed_extensions: default_allowed_extensions(),
            output_format: OutputFormat::default(),
            output_quality: default_output_quality(),
            lock_expiry_secs: default_lock_expiry_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        assert_eq!(default_max_dimension(), 1280);
        assert_eq!(default_output_quality(), 85);
        assert_eq!(default_lock_expiry_secs(), 300);
        assert!(default_allowed_extensions().contains(&".webp".to_string()));
    }

    #[test]
    fn test_output_format_content_type() {
        assert_eq!(OutputFormat::Jpeg.content_type(), "image/jpeg");
        assert_eq!(OutputFormat::Png.content_type(), "image/png");
    }
}
