//! # redq Queue
//!
//! Durable, at-least-once work queue over a shared backing store.
//!
//! ## Features
//!
//! - Content fingerprints with duplicate suppression across hash scheme upgrades
//! - Lock-guarded claims, safe with any number of concurrent pollers
//! - Ack deadlines with redelivery by a periodic retry sweep
//! - Attempt ceilings and pluggable dead letter handlers
//! - Event stream for every state transition, with Prometheus counters
//! - In-memory and Redis store adapters
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use redq_queue::{Message, MessageQueue, MemoryStore};
//!
//! # async fn run() -> Result<(), redq_queue::QueueError> {
//! let queue = MessageQueue::builder(Arc::new(MemoryStore::new())).build()?;
//! queue
//!     .push(&Message::new("bake", serde_json::json!({"version": "v1"})), Duration::ZERO)
//!     .await?;
//!
//! if let Some(delivery) = queue.poll().await? {
//!     // ... do the work ...
//!     delivery.ack.ack().await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod ack;
pub mod clock;
pub mod config;
pub mod dead_letter;
pub mod error;
pub mod events;
pub mod fingerprint;
pub mod message;
pub mod metrics;
pub mod processor;
pub mod queue;
mod queue_poll;
mod queue_retry;
pub mod store;
pub mod supervisor;

pub use ack::Ack;
pub use clock::{Clock, MutableClock, SystemClock};
pub use config::{ProcessorConfig, QueueConfig, SupervisorConfig};
pub use dead_letter::{
    DeadLetter, DeadMessageHandler, LoggingDeadMessageHandler, StoreDeadMessageHandler,
};
pub use error::{QueueError, QueueResult, StoreError};
pub use events::{
    EventPublisher, FanoutPublisher, NoopPublisher, QueueEvent, QueueEventKind, TracingPublisher,
};
pub use fingerprint::Fingerprint;
pub use message::{Message, MessageAttributes};
pub use metrics::{MetricsPublisher, MetricsRegistry};
pub use processor::{MessageHandler, QueueProcessor};
pub use queue::{MessageQueue, MessageQueueBuilder, QueueState};
pub use queue_poll::Delivery;
pub use queue_retry::RetrySummary;
pub use store::{MemoryStore, QueueKeys, QueueStore, RedisStore, RequeueOutcome};
pub use supervisor::RetrySupervisor;
