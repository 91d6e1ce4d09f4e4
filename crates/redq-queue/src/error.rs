//! Queue errors.

use thiserror::Error;

/// Backing store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or timed out. Safe to retry later.
    #[error("Backing store unavailable: {0}")]
    Unavailable(String),

    /// The store rejected a command.
    #[error("Backing store command failed: {0}")]
    Command(String),

    /// The store replied with something we cannot interpret.
    #[error("Unexpected backing store reply: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Whether the next scheduled invocation may succeed where this one failed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error()
            || err.is_timeout()
            || err.is_connection_dropped()
            || err.is_connection_refusal()
        {
            StoreError::Unavailable(err.to_string())
        } else if err.kind() == redis::ErrorKind::TypeError {
            StoreError::Corrupt(err.to_string())
        } else {
            StoreError::Command(err.to_string())
        }
    }
}

/// Queue error types.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Backing store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Message could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A message or dead letter handler failed.
    #[error("Handler error: {0}")]
    Handler(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl QueueError {
    /// Whether the failure came from an unreachable backing store.
    pub fn is_transient(&self) -> bool {
        matches!(self, QueueError::Store(e) if e.is_transient())
    }
}

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;
