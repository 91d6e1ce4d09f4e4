//! Worker pool that polls a queue and dispatches messages by kind.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{Semaphore, broadcast};
use tracing::{debug, error, info, warn};

use crate::config::ProcessorConfig;
use crate::error::{QueueError, QueueResult};
use crate::message::Message;
use crate::queue::MessageQueue;
use crate::queue_poll::Delivery;

/// Handles messages of one kind.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Message kind this handler accepts.
    fn kind(&self) -> &str;

    /// Process a message. `Ok` acknowledges it; `Err` leaves it for
    /// redelivery.
    async fn handle(&self, message: &Message) -> Result<(), QueueError>;
}

#[derive(Default)]
struct Counters {
    processed: AtomicU64,
    failed: AtomicU64,
    unhandled: AtomicU64,
}

/// Polls a queue on a fixed delay with at most `max_workers` handlers in
/// flight.
pub struct QueueProcessor {
    queue: MessageQueue,
    config: ProcessorConfig,
    handlers: HashMap<String, Arc<dyn MessageHandler>>,
    fallback: Option<Arc<dyn MessageHandler>>,
    semaphore: Arc<Semaphore>,
    running: AtomicBool,
    counters: Arc<Counters>,
}

impl QueueProcessor {
    pub fn new(queue: MessageQueue, config: ProcessorConfig) -> Self {
        let permits = config.max_workers;
        Self {
            queue,
            config,
            handlers: HashMap::new(),
            fallback: None,
            semaphore: Arc::new(Semaphore::new(permits)),
            running: AtomicBool::new(false),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Route messages of `handler.kind()` to `handler`.
    pub fn register(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.handlers.insert(handler.kind().to_string(), handler);
        self
    }

    /// Handle every kind without a dedicated handler.
    pub fn with_fallback(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.fallback = Some(handler);
        self
    }

    fn handler_for(&self, kind: &str) -> Option<Arc<dyn MessageHandler>> {
        self.handlers
            .get(kind)
            .or(self.fallback.as_ref())
            .cloned()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Messages handled and acknowledged.
    pub fn processed(&self) -> u64 {
        self.counters.processed.load(Ordering::SeqCst)
    }

    /// Messages whose handler failed.
    pub fn failed(&self) -> u64 {
        self.counters.failed.load(Ordering::SeqCst)
    }

    /// Messages claimed with no handler for their kind.
    pub fn unhandled(&self) -> u64 {
        self.counters.unhandled.load(Ordering::SeqCst)
    }

    pub fn available_workers(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Wait until no handler is running.
    pub async fn wait_idle(&self) {
        let permits = self.config.max_workers as u32;
        if let Ok(all) = self.semaphore.acquire_many(permits).await {
            drop(all);
        }
    }

    /// One poll cycle: claim as many messages as there are free workers
    /// (up to `poll_batch`) and start a handler for each.
    ///
    /// Returns the number of messages dispatched.
    pub async fn poll_once(&self) -> QueueResult<usize> {
        let free = self.available_workers();
        if free == 0 {
            debug!(queue = %self.queue.name(), "All workers busy, skipping poll");
            return Ok(0);
        }

        let deliveries = self
            .queue
            .poll_many(self.config.poll_batch.min(free))
            .await?;

        let mut dispatched = 0;
        for delivery in deliveries {
            if self.dispatch(delivery).await? {
                dispatched += 1;
            }
        }
        Ok(dispatched)
    }

    async fn dispatch(&self, delivery: Delivery) -> QueueResult<bool> {
        let Some(handler) = self.handler_for(&delivery.message.kind) else {
            self.counters.unhandled.fetch_add(1, Ordering::SeqCst);
            warn!(
                queue = %self.queue.name(),
                fingerprint = %delivery.fingerprint,
                kind = %delivery.message.kind,
                "No handler for message kind, leaving unacknowledged"
            );
            return Ok(false);
        };

        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| QueueError::Handler(e.to_string()))?;
        let counters = self.counters.clone();

        tokio::spawn(async move {
            process(handler.as_ref(), delivery, &counters).await;
            drop(permit);
        });

        Ok(true)
    }

    /// Poll on a fixed delay until `shutdown_rx` fires, then wait for
    /// running handlers to finish.
    pub async fn run_loop(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        self.running.store(true, Ordering::SeqCst);
        info!(
            queue = %self.queue.name(),
            workers = self.config.max_workers,
            kinds = self.handlers.len(),
            "Queue processor started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!(queue = %self.queue.name(), "Queue processor shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.poll_once().await {
                        error!(queue = %self.queue.name(), "Poll failed: {}", e);
                    }
                }
            }
        }

        self.wait_idle().await;
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn spawn(self: Arc<Self>, shutdown_rx: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run_loop(shutdown_rx))
    }
}

async fn process(handler: &dyn MessageHandler, delivery: Delivery, counters: &Counters) {
    let Delivery {
        fingerprint,
        message,
        ack,
        ..
    } = delivery;

    debug!(%fingerprint, kind = %message.kind, attempts = message.attempts(), "Handling message");

    match handler.handle(&message).await {
        Ok(()) => match ack.ack().await {
            Ok(_) => {
                counters.processed.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::SeqCst);
                error!(%fingerprint, "Handled message but ack failed: {}", e);
            }
        },
        Err(e) => {
            counters.failed.fetch_add(1, Ordering::SeqCst);
            error!(
                %fingerprint,
                kind = %message.kind,
                attempts = message.attempts(),
                "Handler failed, message will be redelivered: {}",
                e
            );
        }
    }
}

#[cfg(test)]
#[path = "processor_tests.rs"]
mod tests;
