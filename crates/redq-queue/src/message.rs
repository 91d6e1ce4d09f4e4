//! Message definition and attributes.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// Mutable per-message bookkeeping.
///
/// Nothing in here takes part in fingerprinting: two messages that differ
/// only in their attributes are the same unit of work.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageAttributes {
    /// Delivery attempts so far, filled in by the queue when the message
    /// is handed to a consumer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,

    /// Per-message delivery ceiling, overriding the queue default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,

    /// Per-message acknowledgment window, overriding the queue default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_timeout_ms: Option<u64>,

    /// Free-form annotations.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// A unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message type, used to route the message to a handler.
    pub kind: String,

    /// Business content.
    #[serde(default)]
    pub payload: serde_json::Value,

    #[serde(default)]
    pub attributes: MessageAttributes,
}

impl Message {
    /// Create a new message.
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
            attributes: MessageAttributes::default(),
        }
    }

    /// Set the delivery ceiling for this message.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.attributes.max_attempts = Some(max_attempts);
        self
    }

    /// Set the acknowledgment window for this message.
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.attributes.ack_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Add a label.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.labels.insert(key.into(), value.into());
        self
    }

    /// Delivery attempts recorded on this copy, zero before first delivery.
    pub fn attempts(&self) -> u32 {
        self.attributes.attempts.unwrap_or(0)
    }

    /// Acknowledgment window override, ignoring zero.
    pub fn ack_timeout(&self) -> Option<Duration> {
        self.attributes
            .ack_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    pub fn to_json(&self) -> Result<String, QueueError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, QueueError> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
