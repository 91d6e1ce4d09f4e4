//! Configuration validation.

use crate::error::ConfigError;
use crate::schema::{Config, StoreBackend};

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    /// Turn the first error into a `ConfigError`, if there is one.
    pub fn into_result(self) -> Result<Vec<ValidationWarning>, ConfigError> {
        match self.errors.into_iter().next() {
            Some(error) => Err(ConfigError::InvalidValue {
                field: error.path,
                message: error.message,
            }),
            None => Ok(self.warnings),
        }
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration.
    pub fn validate(config: &Config) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_queue(config, &mut result);
        Self::validate_store(config, &mut result);
        Self::validate_schedules(config, &mut result);

        result
    }

    fn validate_queue(config: &Config, result: &mut ValidationResult) {
        let queue = &config.queue;

        if queue.name.is_empty() {
            result.add_error(ValidationError::new("queue.name", "Queue name cannot be empty"));
        }

        if queue.name.chars().any(char::is_whitespace) {
            result.add_error(ValidationError::new(
                "queue.name",
                "Queue name cannot contain whitespace",
            ));
        }

        if queue.ack_timeout_ms == 0 {
            result.add_error(ValidationError::new(
                "queue.ack_timeout_ms",
                "ack_timeout_ms must be greater than 0",
            ));
        }

        if queue.lock_ttl_secs == 0 {
            result.add_error(ValidationError::new(
                "queue.lock_ttl_secs",
                "lock_ttl_secs must be greater than 0",
            ));
        }

        if queue.max_attempts == 0 {
            result.add_error(ValidationError::new(
                "queue.max_attempts",
                "max_attempts must be greater than 0",
            ));
        }

        if queue.poll_candidates == 0 {
            result.add_error(ValidationError::new(
                "queue.poll_candidates",
                "poll_candidates must be greater than 0",
            ));
        }

        // A lock that outlives the ack deadline keeps a retried message unclaimable.
        if queue.lock_ttl_secs * 1000 > queue.ack_timeout_ms {
            result.add_warning(ValidationWarning::new(
                "queue.lock_ttl_secs",
                "lock_ttl_secs exceeds ack_timeout_ms, retried messages stay locked until the lock expires",
            ));
        }
    }

    fn validate_store(config: &Config, result: &mut ValidationResult) {
        if config.store.backend == StoreBackend::Redis {
            let url = &config.store.redis_url;
            if !url.starts_with("redis://") && !url.starts_with("rediss://") {
                result.add_error(ValidationError::new(
                    "store.redis_url",
                    "redis_url must start with redis:// or rediss://",
                ));
            }
        }

        if config.store.backend == StoreBackend::Memory {
            result.add_warning(ValidationWarning::new(
                "store.backend",
                "memory backend is process local, messages are lost on exit",
            ));
        }
    }

    fn validate_schedules(config: &Config, result: &mut ValidationResult) {
        if config.supervisor.enabled && config.supervisor.retry_interval_ms == 0 {
            result.add_error(ValidationError::new(
                "supervisor.retry_interval_ms",
                "retry_interval_ms must be greater than 0",
            ));
        }

        if config.processor.poll_interval_ms == 0 {
            result.add_error(ValidationError::new(
                "processor.poll_interval_ms",
                "poll_interval_ms must be greater than 0",
            ));
        }

        if config.processor.max_workers == 0 {
            result.add_error(ValidationError::new(
                "processor.max_workers",
                "max_workers must be greater than 0",
            ));
        }

        if config.processor.poll_batch == 0 {
            result.add_error(ValidationError::new(
                "processor.poll_batch",
                "poll_batch must be greater than 0",
            ));
        }

        if config.supervisor.retry_interval_ms > config.queue.ack_timeout_ms {
            result.add_warning(ValidationWarning::new(
                "supervisor.retry_interval_ms",
                "retry sweeps run less often than the ack timeout, redelivery will lag",
            ));
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
