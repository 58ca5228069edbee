//! Relay configuration structures.
//!
//! Loaded from a TOML file with environment overrides by the embedding
//! binary; every field carries a serde default so a minimal file (store
//! URL only) is a valid configuration.

use serde::{Deserialize, Serialize};

use crate::subscription::RetryPolicy;

/// Top-level relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Store connection
    #[serde(default)]
    pub store: StoreConfig,

    /// Fallback signing salt used when a subscription has no secret
    #[serde(default)]
    pub webhook_secret_salt: Option<String>,

    /// Default retry policy applied when a subscription declares none
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Outbound delivery settings
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Delivery queue settings
    #[serde(default)]
    pub queue: QueueConfig,

    /// Dead-letter settings
    #[serde(default)]
    pub dead_letter: DeadLetterConfig,

    /// Change source settings
    #[serde(default)]
    pub source: SourceConfig,

    /// Management server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Persist classified events for listing/replay/deduplication
    #[serde(default)]
    pub event_log_enabled: bool,

    /// Grace period for in-flight deliveries at shutdown (seconds)
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

const fn default_shutdown_grace_secs() -> u64 {
    30
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            webhook_secret_salt: None,
            retry: RetryPolicy::default(),
            delivery: DeliveryConfig::default(),
            queue: QueueConfig::default(),
            dead_letter: DeadLetterConfig::default(),
            source: SourceConfig::default(),
            server: ServerConfig::default(),
            event_log_enabled: false,
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

/// Store connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Postgres connection URL
    #[serde(default = "default_store_url")]
    pub url: String,
    /// Logical database (namespace prefix in payloads)
    #[serde(default = "default_database")]
    pub database: String,
}

fn default_store_url() -> String {
    "postgres://localhost/hookline".to_string()
}

fn default_database() -> String {
    "tracker".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            database: default_database(),
        }
    }
}

/// Outbound HTTP delivery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Per-attempt timeout in milliseconds
    #[serde(default = "default_delivery_timeout_ms")]
    pub timeout_ms: u64,
    /// Redirects followed per attempt
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    /// Response body cap in bytes
    #[serde(default = "default_max_payload_size")]
    pub max_payload_size: usize,
    /// User-Agent header on every delivery
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// HTTP statuses that schedule a retry
    #[serde(default = "default_retryable_statuses")]
    pub retryable_statuses: Vec<u16>,
}

const fn default_delivery_timeout_ms() -> u64 {
    30_000
}

const fn default_max_redirects() -> usize {
    5
}

const fn default_max_payload_size() -> usize {
    1024 * 1024
}

fn default_user_agent() -> String {
    concat!("hookline/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_retryable_statuses() -> Vec<u16> {
    vec![408, 429, 500, 502, 503, 504, 507, 509, 510]
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_delivery_timeout_ms(),
            max_redirects: default_max_redirects(),
            max_payload_size: default_max_payload_size(),
            user_agent: default_user_agent(),
            retryable_statuses: default_retryable_statuses(),
        }
    }
}

/// Delivery queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Capacity across all priority sub-queues
    #[serde(default = "default_queue_max_size")]
    pub max_size: usize,
    /// In-flight delivery ceiling
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Dispatcher poll interval in milliseconds
    #[serde(default = "default_processing_interval_ms")]
    pub processing_interval_ms: u64,
    /// Dead-letter in-memory capacity
    #[serde(default = "default_dead_letter_max_size")]
    pub dead_letter_max_size: usize,
    /// Retry delay ceiling in milliseconds
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    /// Upper bound of the uniform retry jitter in milliseconds
    #[serde(default = "default_jitter_cap_ms")]
    pub jitter_cap_ms: u64,
}

const fn default_queue_max_size() -> usize {
    10_000
}

const fn default_max_concurrent() -> usize {
    10
}

const fn default_processing_interval_ms() -> u64 {
    100
}

const fn default_dead_letter_max_size() -> usize {
    1_000
}

const fn default_max_retry_delay_ms() -> u64 {
    300_000
}

const fn default_jitter_cap_ms() -> u64 {
    1_000
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: default_queue_max_size(),
            max_concurrent: default_max_concurrent(),
            processing_interval_ms: default_processing_interval_ms(),
            dead_letter_max_size: default_dead_letter_max_size(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            jitter_cap_ms: default_jitter_cap_ms(),
        }
    }
}

/// Dead-letter retention configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterConfig {
    /// Entries older than this are purged (days)
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Run the hourly purge task
    #[serde(default = "default_true")]
    pub auto_cleanup: bool,
    /// Mirror entries to the durable store
    #[serde(default = "default_true")]
    pub persistence: bool,
}

const fn default_retention_days() -> u32 {
    30
}

const fn default_true() -> bool {
    true
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            auto_cleanup: true,
            persistence: true,
        }
    }
}

/// What to do with a mutation when the delivery queue is full
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Do not advance the cursor; the record is redelivered on restart
    #[default]
    Hold,
    /// Record the mutation to the unroutable log and advance
    Drop,
}

/// Change source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Change log poll interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Records fetched per poll
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Pipeline failures tolerated per record before the record is
    /// promoted to the unroutable log
    #[serde(default = "default_max_record_failures")]
    pub max_record_failures: u32,
    /// Queue-full handling
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,
}

const fn default_poll_interval_ms() -> u64 {
    100
}

const fn default_batch_size() -> usize {
    100
}

const fn default_max_record_failures() -> u32 {
    5
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            batch_size: default_batch_size(),
            max_record_failures: default_max_record_failures(),
            overflow_policy: OverflowPolicy::default(),
        }
    }
}

/// Management server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the management API
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8787".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}
