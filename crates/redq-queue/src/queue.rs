//! Message queue core.
//!
//! [`MessageQueue`] owns no state of its own beyond configuration: every
//! transition goes through the [`QueueStore`], so any number of queue
//! handles in any number of processes can share one store.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::QueueConfig;
use crate::dead_letter::DeadMessageHandler;
use crate::error::QueueResult;
use crate::events::{EventPublisher, NoopPublisher, QueueEvent, QueueEventKind, publish_guarded};
use crate::fingerprint::Fingerprint;
use crate::message::Message;
use crate::store::{QueueKeys, QueueStore, StoreOp};

/// Page size for scans over stored bodies.
const SCAN_PAGE: usize = 100;

/// `now` moved forward by `delay`, saturating instead of overflowing.
pub(crate) fn millis_after(now: i64, delay: Duration) -> i64 {
    now.saturating_add(i64::try_from(delay.as_millis()).unwrap_or(i64::MAX))
}

/// Snapshot of queue sizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueState {
    /// Messages in the ready set, due or not.
    pub depth: i64,
    /// Ready messages that are due now.
    pub ready: i64,
    /// Messages delivered and awaiting acknowledgment.
    pub unacked: i64,
    /// Stored bodies not accounted for by `depth + unacked`.
    pub orphaned: i64,
}

pub(crate) struct Shared {
    pub(crate) store: Arc<dyn QueueStore>,
    pub(crate) keys: QueueKeys,
    pub(crate) config: QueueConfig,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) publisher: Arc<dyn EventPublisher>,
    pub(crate) dead_handlers: RwLock<Vec<Arc<dyn DeadMessageHandler>>>,
}

/// Handle to a queue. Cheap to clone.
#[derive(Clone)]
pub struct MessageQueue {
    pub(crate) inner: Arc<Shared>,
}

impl std::fmt::Debug for MessageQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageQueue")
            .field("name", &self.inner.config.name)
            .field("dead_handlers", &self.inner.dead_handlers.read().len())
            .finish()
    }
}

/// Builder for [`MessageQueue`].
pub struct MessageQueueBuilder {
    store: Arc<dyn QueueStore>,
    config: QueueConfig,
    clock: Arc<dyn Clock>,
    publisher: Arc<dyn EventPublisher>,
    dead_handlers: Vec<Arc<dyn DeadMessageHandler>>,
}

impl MessageQueueBuilder {
    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn dead_message_handler(mut self, handler: Arc<dyn DeadMessageHandler>) -> Self {
        self.dead_handlers.push(handler);
        self
    }

    pub fn build(self) -> QueueResult<MessageQueue> {
        self.config.validate()?;
        info!(
            queue = %self.config.name,
            ack_timeout_ms = self.config.ack_timeout.as_millis() as u64,
            max_attempts = self.config.max_attempts,
            "Message queue ready"
        );
        Ok(MessageQueue {
            inner: Arc::new(Shared {
                store: self.store,
                keys: QueueKeys::new(&self.config.name),
                config: self.config,
                clock: self.clock,
                publisher: self.publisher,
                dead_handlers: RwLock::new(self.dead_handlers),
            }),
        })
    }
}

impl MessageQueue {
    pub fn builder(store: Arc<dyn QueueStore>) -> MessageQueueBuilder {
        MessageQueueBuilder {
            store,
            config: QueueConfig::default(),
            clock: Arc::new(SystemClock),
            publisher: Arc::new(NoopPublisher),
            dead_handlers: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    pub fn keys(&self) -> &QueueKeys {
        &self.inner.keys
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.inner.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    pub(crate) fn now(&self) -> i64 {
        self.inner.clock.now_millis()
    }

    pub(crate) fn fire(&self, kind: QueueEventKind) {
        let event = QueueEvent::new(self.name(), self.now(), kind);
        publish_guarded(self.inner.publisher.as_ref(), &event);
    }

    /// Attempt ceiling for a message: its own override, else the queue default.
    /// An override of zero means no override.
    pub(crate) fn max_attempts_for(&self, message: &Message) -> u32 {
        message
            .attributes
            .max_attempts
            .filter(|max| *max > 0)
            .unwrap_or(self.inner.config.max_attempts)
    }

    /// First accepted hash of `fingerprint` that is a member of `set`.
    async fn find_in(&self, set: &str, fingerprint: &Fingerprint) -> QueueResult<Option<String>> {
        for hash in fingerprint.candidates() {
            if self.inner.store.zscore(set, hash).await?.is_some() {
                return Ok(Some(hash.to_string()));
            }
        }
        Ok(None)
    }

    /// Enqueue a message for delivery after `delay`.
    ///
    /// If the same work is already waiting in the ready set, only its
    /// delivery time changes and the stored body is left alone.
    pub async fn push(&self, message: &Message, delay: Duration) -> QueueResult<()> {
        let fingerprint = Fingerprint::of(message)?;
        let keys = &self.inner.keys;
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        let score = millis_after(self.now(), delay) as f64;

        if let Some(existing) = self.find_in(&keys.ready, &fingerprint).await? {
            if self
                .inner
                .store
                .update_score_if_present(&keys.ready, &existing, score)
                .await?
            {
                debug!(queue = %self.name(), fingerprint = %existing, "Re-prioritized duplicate");
                self.fire(QueueEventKind::Duplicate {
                    fingerprint: existing,
                    message: message.clone(),
                });
                return Ok(());
            }
            // Claimed between the lookup and the update; store it fresh.
        }

        let mut stored = message.clone();
        stored.attributes.attempts = None;
        let body = stored.to_json()?;
        let latest = fingerprint.latest;

        self.inner
            .store
            .transaction(vec![
                StoreOp::HSet {
                    hash: keys.messages.clone(),
                    field: latest.clone(),
                    value: body,
                },
                StoreOp::HSetNx {
                    hash: keys.attempts.clone(),
                    field: latest.clone(),
                    value: "1".to_string(),
                },
                StoreOp::ZAdd {
                    set: keys.ready.clone(),
                    member: latest.clone(),
                    score,
                },
            ])
            .await?;

        debug!(queue = %self.name(), fingerprint = %latest, delay_ms, "Pushed message");
        self.fire(QueueEventKind::Pushed {
            fingerprint: latest,
            message: message.clone(),
            delay_ms,
        });
        Ok(())
    }

    /// Push only if the message is neither waiting nor in flight.
    ///
    /// Returns whether the message was pushed.
    pub async fn ensure(&self, message: &Message, delay: Duration) -> QueueResult<bool> {
        let fingerprint = Fingerprint::of(message)?;
        let keys = &self.inner.keys;

        if self.find_in(&keys.ready, &fingerprint).await?.is_some()
            || self.find_in(&keys.unacked, &fingerprint).await?.is_some()
        {
            debug!(queue = %self.name(), fingerprint = %fingerprint.latest, "Message already present");
            return Ok(false);
        }

        self.push(message, delay).await?;
        Ok(true)
    }

    /// Move a waiting message's delivery time to now plus `delay`.
    ///
    /// A message that is no longer waiting (claimed or acknowledged in the
    /// meantime) is reported as not found. Returns whether it was moved.
    pub async fn reschedule(&self, message: &Message, delay: Duration) -> QueueResult<bool> {
        let fingerprint = Fingerprint::of(message)?;
        let keys = &self.inner.keys;
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        let score = millis_after(self.now(), delay) as f64;

        if let Some(existing) = self.find_in(&keys.ready, &fingerprint).await? {
            if self
                .inner
                .store
                .update_score_if_present(&keys.ready, &existing, score)
                .await?
            {
                self.fire(QueueEventKind::Rescheduled {
                    fingerprint: existing,
                    message: message.clone(),
                    delay_ms,
                });
                return Ok(true);
            }
        }

        self.fire(QueueEventKind::MessageNotFound {
            fingerprint: fingerprint.latest,
            message: message.clone(),
        });
        Ok(false)
    }

    /// Current queue sizes.
    pub async fn read_state(&self) -> QueueResult<QueueState> {
        let store = &self.inner.store;
        let keys = &self.inner.keys;

        let depth = store.zcard(&keys.ready).await? as i64;
        let ready = store.zcount(&keys.ready, self.now() as f64).await? as i64;
        let unacked = store.zcard(&keys.unacked).await? as i64;
        let messages = store.hlen(&keys.messages).await? as i64;

        Ok(QueueState {
            depth,
            ready,
            unacked,
            orphaned: messages - (depth + unacked),
        })
    }

    /// Whether any stored message satisfies `predicate`.
    ///
    /// Walks the body store a page at a time. Bodies that fail to parse are
    /// skipped.
    pub async fn contains_message<F>(&self, predicate: F) -> QueueResult<bool>
    where
        F: Fn(&Message) -> bool + Send + Sync,
    {
        let store = &self.inner.store;
        let mut cursor = 0;
        loop {
            let (next, page) = store
                .hscan(&self.inner.keys.messages, cursor, SCAN_PAGE)
                .await?;
            for (fingerprint, body) in page {
                match Message::from_json(&body) {
                    Ok(message) if predicate(&message) => return Ok(true),
                    Ok(_) => {}
                    Err(e) => {
                        warn!(queue = %self.name(), %fingerprint, "Skipping unreadable message: {}", e)
                    }
                }
            }
            if next == 0 {
                return Ok(false);
            }
            cursor = next;
        }
    }

    /// Drop every message, waiting or in flight. Outstanding locks expire
    /// on their own.
    pub async fn clear(&self) -> QueueResult<()> {
        let keys = &self.inner.keys;
        let deleted = self
            .inner
            .store
            .delete_keys(&[
                keys.messages.clone(),
                keys.ready.clone(),
                keys.unacked.clone(),
                keys.attempts.clone(),
            ])
            .await?;
        warn!(queue = %self.name(), deleted, "Queue cleared");
        Ok(())
    }

    /// Add a handler to be called with every dead-lettered message.
    pub fn register_dead_message_handler(&self, handler: Arc<dyn DeadMessageHandler>) {
        self.inner.dead_handlers.write().push(handler);
    }

    /// Delete every trace of a fingerprint in one transaction.
    pub(crate) async fn remove(&self, fingerprint: &str) -> QueueResult<()> {
        let keys = &self.inner.keys;
        self.inner
            .store
            .transaction(vec![
                StoreOp::ZRem {
                    set: keys.ready.clone(),
                    member: fingerprint.to_string(),
                },
                StoreOp::ZRem {
                    set: keys.unacked.clone(),
                    member: fingerprint.to_string(),
                },
                StoreOp::HDel {
                    hash: keys.messages.clone(),
                    field: fingerprint.to_string(),
                },
                StoreOp::HDel {
                    hash: keys.attempts.clone(),
                    field: fingerprint.to_string(),
                },
                StoreOp::Del {
                    key: keys.lock(fingerprint),
                },
            ])
            .await?;
        Ok(())
    }

    /// Hand a message to every dead letter handler, then remove it.
    ///
    /// Handler failures are logged; the message is removed regardless.
    pub(crate) async fn dead_letter(&self, fingerprint: &str, message: &Message) -> QueueResult<()> {
        self.run_dead_handlers(fingerprint, message).await;
        self.remove(fingerprint).await?;
        self.report_dead(fingerprint, message);
        Ok(())
    }

    pub(crate) async fn run_dead_handlers(&self, fingerprint: &str, message: &Message) {
        let handlers: Vec<Arc<dyn DeadMessageHandler>> = self.inner.dead_handlers.read().clone();
        for handler in handlers {
            if let Err(e) = handler.handle(self, message).await {
                error!(
                    queue = %self.name(),
                    %fingerprint,
                    handler = handler.name(),
                    "Dead message handler failed: {}",
                    e
                );
            }
        }
    }

    pub(crate) fn report_dead(&self, fingerprint: &str, message: &Message) {
        warn!(
            queue = %self.name(),
            %fingerprint,
            kind = %message.kind,
            attempts = message.attempts(),
            "Message dead-lettered"
        );
        self.fire(QueueEventKind::Dead {
            fingerprint: fingerprint.to_string(),
            message: message.clone(),
        });
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
