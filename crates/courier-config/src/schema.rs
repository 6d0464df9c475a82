//! Configuration schema definitions.
//!
//! All durations are expressed in milliseconds and every field carries a
//! serde default, so an empty TOML document is a complete configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for a message queue instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default)]
    pub persistence: PersistenceConfig,

    #[serde(default)]
    pub delivery: DeliveryConfig,

    #[serde(default)]
    pub ordering: OrderingConfig,

    #[serde(default)]
    pub dead_letter: DeadLetterConfig,

    #[serde(default)]
    pub performance: PerformanceConfig,

    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Durable store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Interval of the full in-memory to disk sync pass.
    #[serde(default = "default_sync_interval")]
    pub sync_interval_ms: u64,

    /// Gzip records before writing them.
    #[serde(default)]
    pub compression: bool,

    /// Encrypt records with a key derived from `encryption_key_env`.
    #[serde(default)]
    pub encryption: bool,

    /// Environment variable holding the encryption passphrase.
    #[serde(default = "default_encryption_key_env")]
    pub encryption_key_env: String,

    /// Root directory of the durable store.
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sync_interval_ms: default_sync_interval(),
            compression: false,
            encryption: false,
            encryption_key_env: default_encryption_key_env(),
            storage_path: default_storage_path(),
        }
    }
}

impl PersistenceConfig {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }
}

fn default_sync_interval() -> u64 {
    5_000
}

fn default_encryption_key_env() -> String {
    "COURIER_STORE_KEY".to_string()
}

fn default_storage_path() -> PathBuf {
    courier_home().join("data")
}

/// Base directory for courier state (`~/.courier`).
pub fn courier_home() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".courier"))
        .unwrap_or_else(|| PathBuf::from(".courier"))
}

/// Delivery and retry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// When false the processing tick is idle and messages are pull-only.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Track accepted message ids until they are acknowledged.
    #[serde(default = "default_true")]
    pub guaranteed_delivery: bool,

    /// Intent flag only; delivery is at-least-once.
    #[serde(default)]
    pub exactly_once: bool,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay before the first retry.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            guaranteed_delivery: true,
            exactly_once: false,
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    1_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

/// Ordering configuration.
///
/// Sequence numbers are assigned to `ordered` messages, but the delivery
/// engine does not hold back out-of-order arrivals. These options are
/// recognized and validated only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_max_out_of_order")]
    pub max_out_of_order: u32,

    #[serde(default = "default_reorder_timeout")]
    pub reorder_timeout_ms: u64,
}

impl Default for OrderingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_out_of_order: default_max_out_of_order(),
            reorder_timeout_ms: default_reorder_timeout(),
        }
    }
}

fn default_max_out_of_order() -> u32 {
    100
}

fn default_reorder_timeout() -> u64 {
    5_000
}

/// Dead letter configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterConfig {
    /// When false, messages that exhaust their retries are dropped.
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// How long a dead letter is retained before automatic expiry.
    #[serde(default = "default_quarantine_period")]
    pub quarantine_period_ms: u64,

    #[serde(default = "default_true")]
    pub auto_cleanup: bool,

    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_ms: u64,
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: default_max_retries(),
            quarantine_period_ms: default_quarantine_period(),
            auto_cleanup: true,
            cleanup_interval_ms: default_cleanup_interval(),
        }
    }
}

impl DeadLetterConfig {
    pub fn quarantine_period(&self) -> Duration {
        Duration::from_millis(self.quarantine_period_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }
}

fn default_quarantine_period() -> u64 {
    24 * 60 * 60 * 1_000
}

fn default_cleanup_interval() -> u64 {
    5 * 60 * 1_000
}

/// Capacity and batching configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Maximum messages per named queue (0 = unlimited).
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Maximum serialized message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_processing_interval")]
    pub processing_interval_ms: u64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_queue_size: default_max_queue_size(),
            max_message_size: default_max_message_size(),
            batch_size: default_batch_size(),
            processing_interval_ms: default_processing_interval(),
        }
    }
}

impl PerformanceConfig {
    pub fn processing_interval(&self) -> Duration {
        Duration::from_millis(self.processing_interval_ms)
    }
}

fn default_max_queue_size() -> usize {
    10_000
}

fn default_max_message_size() -> usize {
    1024 * 1024
}

fn default_batch_size() -> usize {
    10
}

fn default_processing_interval() -> u64 {
    1_000
}

/// Monitoring configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_true")]
    pub metrics_collection: bool,

    #[serde(default = "default_true")]
    pub health_checks: bool,

    /// Alert delivery is handled outside the queue; recognized only.
    #[serde(default)]
    pub alerting: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            metrics_collection: true,
            health_checks: true,
            alerting: false,
        }
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
#[path = "schema_tests.rs"]
mod tests;
