//! Redelivery of expired messages.

use serde::Serialize;
use tracing::{debug, error, warn};

use crate::error::QueueResult;
use crate::events::QueueEventKind;
use crate::message::Message;
use crate::queue::MessageQueue;
use crate::store::RequeueOutcome;

/// Tally of one retry sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetrySummary {
    /// Moved back to the ready set.
    pub retried: usize,
    /// Already waiting in the ready set; only the in-flight entry was dropped.
    pub duplicates: usize,
    /// Passed to the dead letter handlers and removed.
    pub dead: usize,
    /// Could not be handled this sweep.
    pub failed: usize,
}

impl RetrySummary {
    pub fn total(&self) -> usize {
        self.retried + self.duplicates + self.dead + self.failed
    }
}

enum RetryOutcome {
    Retried,
    Duplicate,
    Dead,
    Failed,
    /// Acknowledged while the sweep was running.
    Skipped,
}

impl MessageQueue {
    /// Requeue or dead-letter every delivery whose ack deadline has passed.
    ///
    /// A failure on one message is logged and counted, and the sweep moves
    /// on. Only a store that has become unreachable aborts the sweep.
    pub async fn retry(&self) -> QueueResult<RetrySummary> {
        let now = self.now();
        let expired = self
            .inner
            .store
            .range_by_score(&self.inner.keys.unacked, now as f64, None)
            .await?;

        let mut summary = RetrySummary::default();

        for (fingerprint, _) in expired {
            match self.retry_one(&fingerprint, now).await {
                Ok(RetryOutcome::Retried) => summary.retried += 1,
                Ok(RetryOutcome::Duplicate) => summary.duplicates += 1,
                Ok(RetryOutcome::Dead) => summary.dead += 1,
                Ok(RetryOutcome::Failed) => summary.failed += 1,
                Ok(RetryOutcome::Skipped) => {}
                Err(e) if e.is_transient() => return Err(e),
                Err(e) => {
                    summary.failed += 1;
                    error!(queue = %self.name(), %fingerprint, "Retry failed: {}", e);
                    self.fire(QueueEventKind::RetryFailed {
                        fingerprint,
                        error: e.to_string(),
                    });
                }
            }
        }

        if summary.total() > 0 {
            debug!(queue = %self.name(), ?summary, "Retry sweep finished");
        }
        self.fire(QueueEventKind::RetrySweepCompleted {
            retried: summary.retried,
            duplicates: summary.duplicates,
            dead: summary.dead,
            failed: summary.failed,
        });
        Ok(summary)
    }

    /// Every write goes through a store operation that re-checks the ack
    /// deadline against `now`, so a fingerprint acknowledged and claimed
    /// again since the sweep listed it is left to its new holder.
    async fn retry_one(&self, fingerprint: &str, now: i64) -> QueueResult<RetryOutcome> {
        let store = &self.inner.store;
        let keys = &self.inner.keys;

        let Some(body) = store.hget(&keys.messages, fingerprint).await? else {
            if !store.discard_expired(keys, fingerprint, now).await? {
                return Ok(RetryOutcome::Skipped);
            }
            error!(queue = %self.name(), %fingerprint, "Payload for unacked message is missing, removed");
            self.fire(QueueEventKind::RetryFailed {
                fingerprint: fingerprint.to_string(),
                error: "message body missing".to_string(),
            });
            return Ok(RetryOutcome::Failed);
        };

        let mut message = match Message::from_json(&body) {
            Ok(message) => message,
            Err(e) => {
                // One more round trip through Ready; the next poll purges it.
                if store.requeue_expired(keys, fingerprint, now).await? == RequeueOutcome::Gone {
                    return Ok(RetryOutcome::Skipped);
                }
                error!(
                    queue = %self.name(),
                    %fingerprint,
                    "Failed reading unacked message, requeued once: {}",
                    e
                );
                self.fire(QueueEventKind::RetryFailed {
                    fingerprint: fingerprint.to_string(),
                    error: e.to_string(),
                });
                return Ok(RetryOutcome::Failed);
            }
        };

        let attempts: i64 = store
            .hget(&keys.attempts, fingerprint)
            .await?
            .and_then(|a| a.parse().ok())
            .unwrap_or(0);
        message.attributes.attempts = Some(u32::try_from(attempts.max(0)).unwrap_or(u32::MAX));

        if attempts >= i64::from(self.max_attempts_for(&message)) {
            if !store.discard_expired(keys, fingerprint, now).await? {
                return Ok(RetryOutcome::Skipped);
            }
            self.run_dead_handlers(fingerprint, &message).await;
            self.report_dead(fingerprint, &message);
            return Ok(RetryOutcome::Dead);
        }

        match store.requeue_expired(keys, fingerprint, now).await? {
            RequeueOutcome::Requeued { attempts } => {
                warn!(queue = %self.name(), %fingerprint, attempts, "Redelivering expired message");
                self.fire(QueueEventKind::Retried {
                    fingerprint: fingerprint.to_string(),
                    message,
                    attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
                });
                Ok(RetryOutcome::Retried)
            }
            RequeueOutcome::Duplicate { attempts } => {
                debug!(queue = %self.name(), %fingerprint, attempts, "Expired message already requeued");
                self.fire(QueueEventKind::Duplicate {
                    fingerprint: fingerprint.to_string(),
                    message,
                });
                Ok(RetryOutcome::Duplicate)
            }
            RequeueOutcome::Gone => Ok(RetryOutcome::Skipped),
        }
    }
}
