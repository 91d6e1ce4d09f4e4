//! Runtime settings, converted once from the file configuration.

use std::time::Duration;

use crate::error::QueueError;

/// Queue core settings. Never mutated after the queue is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub name: String,
    /// Acknowledgment window when a message has no override.
    pub ack_timeout: Duration,
    pub lock_ttl: Duration,
    /// Attempt ceiling when a message has no override.
    pub max_attempts: u32,
    /// Ready candidates inspected per claim.
    pub poll_candidates: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::from_settings(&redq_config::QueueConfig::default())
    }
}

impl QueueConfig {
    pub fn from_settings(settings: &redq_config::QueueConfig) -> Self {
        Self {
            name: settings.name.clone(),
            ack_timeout: Duration::from_millis(settings.ack_timeout_ms),
            lock_ttl: Duration::from_secs(settings.lock_ttl_secs),
            max_attempts: settings.max_attempts,
            poll_candidates: settings.poll_candidates.max(1),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_ack_timeout(mut self, ack_timeout: Duration) -> Self {
        self.ack_timeout = ack_timeout;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), QueueError> {
        if self.name.trim().is_empty() {
            return Err(QueueError::Config("queue name must not be empty".to_string()));
        }
        if self.ack_timeout.is_zero() {
            return Err(QueueError::Config("ack timeout must be positive".to_string()));
        }
        if self.lock_ttl.is_zero() {
            return Err(QueueError::Config("lock ttl must be positive".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(QueueError::Config("max attempts must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Retry sweep scheduling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    pub retry_interval: Duration,
    /// Take a store-wide lock so only one process sweeps at a time.
    pub exclusive: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self::from_settings(&redq_config::SupervisorConfig::default())
    }
}

impl SupervisorConfig {
    pub fn from_settings(settings: &redq_config::SupervisorConfig) -> Self {
        Self {
            retry_interval: Duration::from_millis(settings.retry_interval_ms.max(1)),
            exclusive: settings.exclusive,
        }
    }
}

/// Consumer polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorConfig {
    pub poll_interval: Duration,
    pub max_workers: usize,
    pub poll_batch: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self::from_settings(&redq_config::ProcessorConfig::default())
    }
}

impl ProcessorConfig {
    pub fn from_settings(settings: &redq_config::ProcessorConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(settings.poll_interval_ms.max(1)),
            max_workers: (settings.max_workers as usize).max(1),
            poll_batch: settings.poll_batch.max(1),
        }
    }
}
