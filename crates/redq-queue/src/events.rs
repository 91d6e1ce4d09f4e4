//! Queue state transition events.
//!
//! Every transition in the queue core is reported to an [`EventPublisher`].
//! Publishing is fire-and-forget: the queue never looks at a result and a
//! publisher that panics is contained and logged.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::message::Message;

/// A queue transition.
#[derive(Debug, Clone)]
pub struct QueueEvent {
    /// Name of the queue that emitted the event.
    pub queue: String,
    /// When the event was emitted.
    pub at: DateTime<Utc>,
    pub kind: QueueEventKind,
}

/// What happened.
#[derive(Debug, Clone)]
pub enum QueueEventKind {
    /// A new message was stored and scheduled.
    Pushed {
        fingerprint: String,
        message: Message,
        delay_ms: u64,
    },
    /// A push (or a retry) found the message already pending.
    Duplicate { fingerprint: String, message: Message },
    /// An expired message was made ready again.
    Retried {
        fingerprint: String,
        message: Message,
        attempts: u32,
    },
    /// Redelivering a single message failed; the sweep carried on.
    RetryFailed { fingerprint: String, error: String },
    /// A message exceeded its attempt ceiling and was removed.
    Dead { fingerprint: String, message: Message },
    /// A consumer acknowledged a message.
    Acknowledged { fingerprint: String, message: Message },
    /// Every ready candidate inspected was locked by another consumer.
    LockFailed { candidates: usize },
    /// A reschedule targeted a message that is no longer ready.
    MessageNotFound { fingerprint: String, message: Message },
    /// A ready message was given a new delivery time.
    Rescheduled {
        fingerprint: String,
        message: Message,
        delay_ms: u64,
    },
    /// A message was handed to a consumer.
    Processing {
        fingerprint: String,
        message: Message,
        scheduled_at: DateTime<Utc>,
        claimed_at: DateTime<Utc>,
    },
    /// A poll cycle finished.
    Polled,
    /// A retry sweep finished.
    RetrySweepCompleted {
        retried: usize,
        duplicates: usize,
        dead: usize,
        failed: usize,
    },
}

impl QueueEventKind {
    /// Stable snake_case name, used for metric names and log fields.
    pub fn name(&self) -> &'static str {
        match self {
            QueueEventKind::Pushed { .. } => "pushed",
            QueueEventKind::Duplicate { .. } => "duplicate",
            QueueEventKind::Retried { .. } => "retried",
            QueueEventKind::RetryFailed { .. } => "retry_failed",
            QueueEventKind::Dead { .. } => "dead",
            QueueEventKind::Acknowledged { .. } => "acknowledged",
            QueueEventKind::LockFailed { .. } => "lock_failed",
            QueueEventKind::MessageNotFound { .. } => "message_not_found",
            QueueEventKind::Rescheduled { .. } => "rescheduled",
            QueueEventKind::Processing { .. } => "processing",
            QueueEventKind::Polled => "polled",
            QueueEventKind::RetrySweepCompleted { .. } => "retry_sweep_completed",
        }
    }

    /// All event names, in declaration order.
    pub const NAMES: [&'static str; 12] = [
        "pushed",
        "duplicate",
        "retried",
        "retry_failed",
        "dead",
        "acknowledged",
        "lock_failed",
        "message_not_found",
        "rescheduled",
        "processing",
        "polled",
        "retry_sweep_completed",
    ];

    /// Fingerprint the event refers to, if any.
    pub fn fingerprint(&self) -> Option<&str> {
        match self {
            QueueEventKind::Pushed { fingerprint, .. }
            | QueueEventKind::Duplicate { fingerprint, .. }
            | QueueEventKind::Retried { fingerprint, .. }
            | QueueEventKind::RetryFailed { fingerprint, .. }
            | QueueEventKind::Dead { fingerprint, .. }
            | QueueEventKind::Acknowledged { fingerprint, .. }
            | QueueEventKind::MessageNotFound { fingerprint, .. }
            | QueueEventKind::Rescheduled { fingerprint, .. }
            | QueueEventKind::Processing { fingerprint, .. } => Some(fingerprint),
            QueueEventKind::LockFailed { .. }
            | QueueEventKind::Polled
            | QueueEventKind::RetrySweepCompleted { .. } => None,
        }
    }
}

impl QueueEvent {
    pub fn new(queue: impl Into<String>, at_millis: i64, kind: QueueEventKind) -> Self {
        Self {
            queue: queue.into(),
            at: millis_to_datetime(at_millis),
            kind,
        }
    }
}

pub(crate) fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

/// Receiver of queue events.
///
/// Called inline on the queue's task, so implementations should return
/// quickly and must not block.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: &QueueEvent);
}

/// Publish through a guard that contains publisher panics.
pub(crate) fn publish_guarded(publisher: &dyn EventPublisher, event: &QueueEvent) {
    let result = catch_unwind(AssertUnwindSafe(|| publisher.publish(event)));
    if result.is_err() {
        error!(
            queue = %event.queue,
            event = event.kind.name(),
            "Event publisher panicked, event dropped"
        );
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPublisher;

impl EventPublisher for NoopPublisher {
    fn publish(&self, _event: &QueueEvent) {}
}

/// Writes events to the `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingPublisher;

impl EventPublisher for TracingPublisher {
    fn publish(&self, event: &QueueEvent) {
        let queue = event.queue.as_str();
        match &event.kind {
            QueueEventKind::Pushed {
                fingerprint,
                message,
                delay_ms,
            } => debug!(queue, fingerprint, kind = %message.kind, delay_ms, "Message pushed"),
            QueueEventKind::Duplicate { fingerprint, message } => {
                debug!(queue, fingerprint, kind = %message.kind, "Duplicate message")
            }
            QueueEventKind::Retried {
                fingerprint,
                message,
                attempts,
            } => warn!(queue, fingerprint, kind = %message.kind, attempts, "Message retried"),
            QueueEventKind::RetryFailed { fingerprint, error } => {
                error!(queue, fingerprint, error = %error, "Retry failed")
            }
            QueueEventKind::Dead { fingerprint, message } => {
                warn!(queue, fingerprint, kind = %message.kind, "Message dead")
            }
            QueueEventKind::Acknowledged { fingerprint, .. } => {
                debug!(queue, fingerprint, "Message acknowledged")
            }
            QueueEventKind::LockFailed { candidates } => {
                debug!(queue, candidates, "All ready candidates locked")
            }
            QueueEventKind::MessageNotFound { fingerprint, .. } => {
                debug!(queue, fingerprint, "Message not found for reschedule")
            }
            QueueEventKind::Rescheduled {
                fingerprint,
                delay_ms,
                ..
            } => debug!(queue, fingerprint, delay_ms, "Message rescheduled"),
            QueueEventKind::Processing {
                fingerprint,
                message,
                scheduled_at,
                claimed_at,
            } => {
                let lag_ms = (*claimed_at - *scheduled_at).num_milliseconds();
                debug!(queue, fingerprint, kind = %message.kind, lag_ms, "Message processing")
            }
            QueueEventKind::Polled => {}
            QueueEventKind::RetrySweepCompleted {
                retried,
                duplicates,
                dead,
                failed,
            } => {
                if retried + duplicates + dead + failed > 0 {
                    info!(queue, retried, duplicates, dead, failed, "Retry sweep completed");
                }
            }
        }
    }
}

/// Forwards every event to several publishers.
#[derive(Default, Clone)]
pub struct FanoutPublisher {
    publishers: Vec<Arc<dyn EventPublisher>>,
}

impl FanoutPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publishers.push(publisher);
        self
    }

    pub fn len(&self) -> usize {
        self.publishers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.publishers.is_empty()
    }
}

impl EventPublisher for FanoutPublisher {
    fn publish(&self, event: &QueueEvent) {
        // Each one guarded so a panic does not starve the rest.
        for publisher in &self.publishers {
            publish_guarded(publisher.as_ref(), event);
        }
    }
}
