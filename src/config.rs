use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration for the review pipeline
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Delivery (queue/dispatcher) configuration
    #[serde(default)]
    pub delivery: DeliveryConfig,
    /// Queue and topic identity
    #[serde(default)]
    pub topology: TopologyConfig,
    /// Intake validation policy
    #[serde(default)]
    pub intake: IntakeConfig,
    /// Record store configuration
    #[serde(default)]
    pub record_store: RecordStoreConfig,
    /// Object store configuration
    #[serde(default)]
    pub object_store: ObjectStoreConfig,
    /// Email configuration
    #[serde(default)]
    pub email: EmailConfig,
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

/// Queue and dispatcher tuning
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Visibility window for received messages in seconds
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,
    /// Maximum delivery attempts before a message moves to the dead-letter queue
    #[serde(default = "default_max_receive_count")]
    pub max_receive_count: u32,
    /// Base redelivery backoff in milliseconds (doubles per attempt)
    #[serde(default = "default_redelivery_backoff_ms")]
    pub redelivery_backoff_ms: u64,
    /// Maximum messages handed to a worker per receive
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Long-poll wait time per receive in seconds
    #[serde(default = "default_wait_time_secs")]
    pub wait_time_secs: u64,
    /// Per-invocation deadline in seconds; exceeding it counts as a failure
    #[serde(default = "default_handler_timeout_secs")]
    pub handler_timeout_secs: u64,
}

/// Statically defined queue and topic names
#[derive(Debug, Clone, Deserialize)]
pub struct TopologyConfig {
    /// Queue receiving object-creation events
    #[serde(default = "default_intake_queue")]
    pub intake_queue: String,
    /// Dead-letter queue for rejected/exhausted intake messages
    #[serde(default = "default_intake_dlq")]
    pub intake_dead_letter_queue: String,
    /// Topic for typed metadata messages
    #[serde(default = "default_metadata_topic")]
    pub metadata_topic: String,
    /// Topic for moderation status messages
    #[serde(default = "default_status_topic")]
    pub status_topic: String,
    /// Topic for derived notification events
    #[serde(default = "default_notify_topic")]
    pub notify_topic: String,
}

/// Intake validation policy
#[derive(Debug, Clone, Deserialize)]
pub struct IntakeConfig {
    /// Allowed file extensions, lowercase, without the leading dot
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
}

/// Record store backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStoreBackend {
    #[default]
    Memory,
    Postgres,
}

/// Record store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RecordStoreConfig {
    /// Backend: memory or postgres
    #[serde(default)]
    pub backend: RecordStoreBackend,
    /// PostgreSQL connection URL (postgres backend)
    pub url: Option<String>,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

/// Object store backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectStoreBackend {
    #[default]
    Memory,
    S3,
}

/// Object store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectStoreConfig {
    /// Backend: memory or s3
    #[serde(default)]
    pub backend: ObjectStoreBackend,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
}

/// Email transport backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailBackend {
    #[default]
    Memory,
    Ses,
}

/// Email configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    /// Backend: memory or ses
    #[serde(default)]
    pub backend: EmailBackend,
    /// Sender address
    #[serde(default = "default_from_address")]
    pub from_address: String,
    /// Recipient address (statically configured photographer contact)
    #[serde(default = "default_to_address")]
    pub to_address: String,
    /// AWS region for the SES client
    #[serde(default = "default_region")]
    pub region: String,
}

// Default value functions
fn default_service_name() -> String {
    "darkroom".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_visibility_timeout_secs() -> u64 {
    30
}

fn default_max_receive_count() -> u32 {
    3
}

fn default_redelivery_backoff_ms() -> u64 {
    500
}

fn default_batch_size() -> usize {
    10
}

fn default_wait_time_secs() -> u64 {
    5
}

fn default_handler_timeout_secs() -> u64 {
    10
}

fn default_intake_queue() -> String {
    "review.intake".to_string()
}

fn default_intake_dlq() -> String {
    "review.intake.dlq".to_string()
}

fn default_metadata_topic() -> String {
    "review.metadata".to_string()
}

fn default_status_topic() -> String {
    "review.status".to_string()
}

fn default_notify_topic() -> String {
    "review.notify".to_string()
}

fn default_allowed_extensions() -> Vec<String> {
    vec!["jpeg".to_string(), "jpg".to_string(), "png".to_string()]
}

fn default_max_connections() -> u32 {
    10
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_run_migrations() -> bool {
    true
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_from_address() -> String {
    "reviews@example.com".to_string()
}

fn default_to_address() -> String {
    "photographer@example.com".to_string()
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Add config file if present
            .add_source(config::File::with_name("config/darkroom").required(false))
            .add_source(config::File::with_name("/etc/darkroom/darkroom").required(false))
            // Override with environment variables
            // DARKROOM__EMAIL__TO_ADDRESS -> email.to_address
            .add_source(
                config::Environment::with_prefix("DARKROOM")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Get the visibility window as Duration
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery.visibility_timeout_secs)
    }

    /// Get the base redelivery backoff as Duration
    pub fn redelivery_backoff(&self) -> Duration {
        Duration::from_millis(self.delivery.redelivery_backoff_ms)
    }

    /// Get the receive long-poll wait as Duration
    pub fn wait_time(&self) -> Duration {
        Duration::from_secs(self.delivery.wait_time_secs)
    }

    /// Get the per-invocation deadline as Duration
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery.handler_timeout_secs)
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

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            visibility_timeout_secs: default_visibility_timeout_secs(),
            max_receive_count: default_max_receive_count(),
            redelivery_backoff_ms: default_redelivery_backoff_ms(),
            batch_size: default_batch_size(),
            wait_time_secs: default_wait_time_secs(),
            handler_timeout_secs: default_handler_timeout_secs(),
        }
    }
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            intake_queue: default_intake_queue(),
            intake_dead_letter_queue: default_intake_dlq(),
            metadata_topic: default_metadata_topic(),
            status_topic: default_status_topic(),
            notify_topic: default_notify_topic(),
        }
    }
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            allowed_extensions: default_allowed_extensions(),
        }
    }
}

impl Default for RecordStoreConfig {
    fn default() -> Self {
        Self {
            backend: RecordStoreBackend::default(),
            url: None,
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
            run_migrations: default_run_migrations(),
        }
    }
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            backend: ObjectStoreBackend::default(),
            region: default_region(),
            endpoint_url: None,
            force_path_style: false,
        }
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            backend: EmailBackend::default(),
            from_address: default_from_address(),
            to_address: default_to_address(),
            region: default_region(),
        }
    }
}
