//! Configuration schema definitions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub(crate) fn default_true() -> bool {
    true
}

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub supervisor: SupervisorConfig,

    #[serde(default)]
    pub processor: ProcessorConfig,

    #[serde(default)]
    pub dead_letter: DeadLetterConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Queue core settings. Fixed for the lifetime of a queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Queue name, used as the key namespace in the backing store.
    #[serde(default = "default_queue_name")]
    pub name: String,

    /// Default time a consumer has to acknowledge a message.
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,

    /// Lifetime of a per-message claim lock.
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,

    /// Delivery attempts allowed when a message carries no override.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Ready candidates inspected per claim.
    #[serde(default = "default_poll_candidates")]
    pub poll_candidates: usize,
}

fn default_queue_name() -> String {
    "redq".to_string()
}

fn default_ack_timeout_ms() -> u64 {
    60_000
}

fn default_lock_ttl_secs() -> u64 {
    10
}

fn default_max_attempts() -> u32 {
    5
}

fn default_poll_candidates() -> usize {
    10
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: default_queue_name(),
            ack_timeout_ms: default_ack_timeout_ms(),
            lock_ttl_secs: default_lock_ttl_secs(),
            max_attempts: default_max_attempts(),
            poll_candidates: default_poll_candidates(),
        }
    }
}

/// Which backing store adapter to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process store. State is lost on exit.
    #[default]
    Memory,
    /// Remote Redis server.
    Redis,
}

/// Backing store connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            redis_url: default_redis_url(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

/// Retry sweep scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Fixed delay between retry sweeps.
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,

    /// Only one supervisor across all processes sweeps at a time.
    #[serde(default = "default_true")]
    pub exclusive: bool,
}

fn default_retry_interval_ms() -> u64 {
    10_000
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            retry_interval_ms: default_retry_interval_ms(),
            exclusive: default_true(),
        }
    }
}

/// Consumer side polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_max_workers")]
    pub max_workers: u32,

    /// Messages claimed per poll cycle, bounded by free workers.
    #[serde(default = "default_poll_batch")]
    pub poll_batch: usize,
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_max_workers() -> u32 {
    4
}

fn default_poll_batch() -> usize {
    1
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_workers: default_max_workers(),
            poll_batch: default_poll_batch(),
        }
    }
}

/// Where permanently undeliverable messages go.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Dead letter key namespace. Defaults to `{queue.name}.dlq`.
    #[serde(default)]
    pub name: Option<String>,
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            name: None,
        }
    }
}

/// Logging output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit console logs as JSON lines.
    #[serde(default)]
    pub json: bool,

    /// Directory for daily rolling log files. No file output when unset.
    #[serde(default)]
    pub file_dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            file_dir: None,
        }
    }
}

impl Config {
    /// Dead letter namespace, derived from the queue name unless configured.
    pub fn dead_letter_name(&self) -> String {
        self.dead_letter
            .name
            .clone()
            .unwrap_or_else(|| format!("{}.dlq", self.queue.name))
    }
}
