//! One-shot acknowledgment handle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::error::QueueResult;
use crate::events::QueueEventKind;
use crate::message::Message;
use crate::queue::MessageQueue;
use crate::store::AckOutcome;

/// Acknowledges one delivery.
///
/// Clones share state: whichever clone acknowledges first does the work,
/// every later call is a no-op. If the store call fails the handle is
/// re-armed so the caller can try again.
#[derive(Clone)]
pub struct Ack {
    queue: MessageQueue,
    fingerprint: Arc<str>,
    message: Arc<Message>,
    done: Arc<AtomicBool>,
}

impl Ack {
    pub(crate) fn new(queue: MessageQueue, fingerprint: &str, message: Message) -> Self {
        Self {
            queue,
            fingerprint: Arc::from(fingerprint),
            message: Arc::new(message),
            done: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Acknowledge the delivery. Returns `false` if it was already acknowledged.
    pub async fn ack(&self) -> QueueResult<bool> {
        if self.done.swap(true, Ordering::SeqCst) {
            debug!(fingerprint = %self.fingerprint, "Ignoring repeated ack");
            return Ok(false);
        }

        match self.queue.acknowledge(&self.fingerprint, &self.message).await {
            Ok(_) => Ok(true),
            Err(e) => {
                self.done.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    pub fn is_acked(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

impl std::fmt::Debug for Ack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ack")
            .field("queue", &self.queue.name())
            .field("fingerprint", &self.fingerprint)
            .field("acked", &self.is_acked())
            .finish()
    }
}

impl MessageQueue {
    pub(crate) async fn acknowledge(
        &self,
        fingerprint: &str,
        message: &Message,
    ) -> QueueResult<AckOutcome> {
        let outcome = self
            .inner
            .store
            .acknowledge(&self.inner.keys, fingerprint)
            .await?;
        debug!(queue = %self.name(), %fingerprint, ?outcome, "Acknowledged");
        self.fire(QueueEventKind::Acknowledged {
            fingerprint: fingerprint.to_string(),
            message: message.clone(),
        });
        Ok(outcome)
    }
}
