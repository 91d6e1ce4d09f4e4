//! Dead letter handlers.
//!
//! A message that runs out of attempts is passed to every registered
//! [`DeadMessageHandler`] and then removed from the queue.

use async_trait::async_trait;
use tracing::warn;

use crate::error::{QueueError, QueueResult};
use crate::fingerprint::Fingerprint;
use crate::message::Message;
use crate::queue::MessageQueue;
use crate::store::StoreOp;

/// Receives permanently undeliverable messages.
#[async_trait]
pub trait DeadMessageHandler: Send + Sync {
    /// Handler name for logs.
    fn name(&self) -> &str {
        "dead-message-handler"
    }

    async fn handle(&self, queue: &MessageQueue, message: &Message) -> QueueResult<()>;
}

/// Logs dead messages.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingDeadMessageHandler;

#[async_trait]
impl DeadMessageHandler for LoggingDeadMessageHandler {
    fn name(&self) -> &str {
        "logging"
    }

    async fn handle(&self, queue: &MessageQueue, message: &Message) -> QueueResult<()> {
        warn!(
            queue = %queue.name(),
            kind = %message.kind,
            attempts = message.attempts(),
            payload = %message.payload,
            "Dead message"
        );
        Ok(())
    }
}

/// A message kept in the dead letter store.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    pub fingerprint: String,
    pub message: Message,
    /// Epoch milliseconds.
    pub died_at: i64,
}

/// Keeps dead messages in the queue's store for operators to inspect.
///
/// Bodies go in the `{name}.messages` hash and `{name}` is a scored set
/// ordered by time of death.
#[derive(Debug, Clone)]
pub struct StoreDeadMessageHandler {
    name: String,
    messages: String,
}

impl StoreDeadMessageHandler {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            messages: format!("{name}.messages"),
            name,
        }
    }

    /// Name of the dead letter set.
    pub fn dead_letter_name(&self) -> &str {
        &self.name
    }

    /// Number of dead messages stored.
    pub async fn len(&self, queue: &MessageQueue) -> QueueResult<u64> {
        Ok(queue.store().zcard(&self.name).await?)
    }

    pub async fn is_empty(&self, queue: &MessageQueue) -> QueueResult<bool> {
        Ok(self.len(queue).await? == 0)
    }

    /// Dead messages, oldest first. Unreadable entries are skipped.
    pub async fn list(&self, queue: &MessageQueue, limit: Option<usize>) -> QueueResult<Vec<DeadLetter>> {
        let store = queue.store();
        let entries = store.range_by_score(&self.name, f64::INFINITY, limit).await?;

        let mut letters = Vec::with_capacity(entries.len());
        for (fingerprint, died_at) in entries {
            let Some(body) = store.hget(&self.messages, &fingerprint).await? else {
                continue;
            };
            match Message::from_json(&body) {
                Ok(message) => letters.push(DeadLetter {
                    fingerprint,
                    message,
                    died_at: died_at as i64,
                }),
                Err(e) => warn!(%fingerprint, "Skipping unreadable dead letter: {}", e),
            }
        }
        Ok(letters)
    }
}

#[async_trait]
impl DeadMessageHandler for StoreDeadMessageHandler {
    fn name(&self) -> &str {
        "store"
    }

    async fn handle(&self, queue: &MessageQueue, message: &Message) -> QueueResult<()> {
        let fingerprint = Fingerprint::of(message)?.latest;
        let body = message.to_json()?;
        let died_at = queue.clock().now_millis();

        queue
            .store()
            .transaction(vec![
                StoreOp::HSet {
                    hash: self.messages.clone(),
                    field: fingerprint.clone(),
                    value: body,
                },
                StoreOp::ZAdd {
                    set: self.name.clone(),
                    member: fingerprint,
                    score: died_at as f64,
                },
            ])
            .await
            .map_err(QueueError::from)
    }
}
