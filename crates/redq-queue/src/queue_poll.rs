//! Consumer side: claiming ready messages.

use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::ack::Ack;
use crate::error::QueueResult;
use crate::events::{QueueEventKind, millis_to_datetime};
use crate::message::Message;
use crate::queue::{MessageQueue, millis_after};
use crate::store::{ClaimOutcome, ClaimRequest, ClaimedMessage};

/// A message handed to a consumer.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub fingerprint: String,
    /// The message, with `attributes.attempts` set to this delivery's attempt.
    pub message: Message,
    /// When the message became due.
    pub scheduled_at: DateTime<Utc>,
    pub ack: Ack,
}

enum Claim {
    Delivered(Delivery),
    /// Claimed but purged or dead-lettered instead of delivered.
    Discarded,
    /// Nothing claimable.
    Exhausted,
}

impl MessageQueue {
    /// Claim the earliest due message, if any.
    ///
    /// Never waits for work: an empty queue returns `None` immediately.
    pub async fn poll(&self) -> QueueResult<Option<Delivery>> {
        Ok(self.poll_many(1).await?.pop())
    }

    /// Claim a message and pass it to `callback` with its ack handle.
    ///
    /// Returns whether the callback ran.
    pub async fn poll_with<F>(&self, callback: F) -> QueueResult<bool>
    where
        F: FnOnce(Message, Ack),
    {
        match self.poll().await? {
            Some(delivery) => {
                callback(delivery.message, delivery.ack);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Claim up to `max` messages in one poll cycle.
    ///
    /// If the store fails after some messages were claimed, those are
    /// returned and the error is logged; they are not lost either way, since
    /// an unacknowledged claim is redelivered by the retry sweep.
    pub async fn poll_many(&self, max: usize) -> QueueResult<Vec<Delivery>> {
        let mut deliveries = Vec::new();
        if max == 0 {
            return Ok(deliveries);
        }
        let mut failure = None;

        for _ in 0..max {
            match self.claim_next().await {
                Ok(Claim::Delivered(delivery)) => deliveries.push(delivery),
                Ok(Claim::Discarded) => continue,
                Ok(Claim::Exhausted) => break,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        self.fire(QueueEventKind::Polled);

        match failure {
            Some(e) if deliveries.is_empty() => Err(e),
            Some(e) => {
                warn!(queue = %self.name(), claimed = deliveries.len(), "Poll cut short: {}", e);
                Ok(deliveries)
            }
            None => Ok(deliveries),
        }
    }

    async fn claim_next(&self) -> QueueResult<Claim> {
        let config = &self.inner.config;
        let now = self.now();
        let request = ClaimRequest {
            now,
            ack_deadline: millis_after(now, config.ack_timeout),
            lock_ttl: config.lock_ttl,
            token: Uuid::new_v4().to_string(),
            candidates: config.poll_candidates,
        };

        match self
            .inner
            .store
            .claim_ready(&self.inner.keys, &request)
            .await?
        {
            ClaimOutcome::Empty => Ok(Claim::Exhausted),
            ClaimOutcome::Contended { attempted } => {
                debug!(queue = %self.name(), attempted, "All due messages locked");
                self.fire(QueueEventKind::LockFailed {
                    candidates: attempted,
                });
                Ok(Claim::Exhausted)
            }
            ClaimOutcome::Claimed(claimed) => self.accept(claimed, now).await,
        }
    }

    async fn accept(&self, claimed: ClaimedMessage, now: i64) -> QueueResult<Claim> {
        let fingerprint = claimed.fingerprint;

        let Some(body) = claimed.body else {
            error!(queue = %self.name(), %fingerprint, "Payload for message is missing, removing");
            self.remove(&fingerprint).await?;
            return Ok(Claim::Discarded);
        };

        let mut message = match Message::from_json(&body) {
            Ok(message) => message,
            Err(e) => {
                error!(
                    queue = %self.name(),
                    %fingerprint,
                    body = %body,
                    "Failed reading message, removing: {}",
                    e
                );
                self.remove(&fingerprint).await?;
                return Ok(Claim::Discarded);
            }
        };

        let attempts = u32::try_from(claimed.attempts.max(1)).unwrap_or(u32::MAX);
        message.attributes.attempts = Some(attempts);

        let max_attempts = self.max_attempts_for(&message);
        if attempts > max_attempts {
            warn!(
                queue = %self.name(),
                %fingerprint,
                attempts,
                max_attempts,
                "Message exceeded its attempts on delivery"
            );
            self.dead_letter(&fingerprint, &message).await?;
            return Ok(Claim::Discarded);
        }

        if let Some(timeout) = message.ack_timeout() {
            if timeout != self.inner.config.ack_timeout {
                let deadline = millis_after(now, timeout);
                if !self
                    .inner
                    .store
                    .update_score_if_present(&self.inner.keys.unacked, &fingerprint, deadline as f64)
                    .await?
                {
                    debug!(queue = %self.name(), %fingerprint, "Delivery left the unacked set before its deadline was set");
                }
            }
        }

        let scheduled_at = millis_to_datetime(claimed.scheduled_at as i64);
        self.fire(QueueEventKind::Processing {
            fingerprint: fingerprint.clone(),
            message: message.clone(),
            scheduled_at,
            claimed_at: millis_to_datetime(now),
        });

        let ack = Ack::new(self.clone(), &fingerprint, message.clone());
        Ok(Claim::Delivered(Delivery {
            fingerprint,
            message,
            scheduled_at,
            ack,
        }))
    }
}
