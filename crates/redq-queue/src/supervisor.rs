//! Periodic retry sweep.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SupervisorConfig;
use crate::error::QueueResult;
use crate::metrics::MetricsPublisher;
use crate::queue::MessageQueue;
use crate::queue_retry::RetrySummary;

/// Runs [`MessageQueue::retry`] on a fixed delay.
///
/// With `exclusive` set, each sweep first takes a store-wide lock that
/// expires after one interval, so of several supervisors sharing a store
/// only one sweeps per interval.
pub struct RetrySupervisor {
    queue: MessageQueue,
    config: SupervisorConfig,
    metrics: Option<Arc<MetricsPublisher>>,
    owner: String,
    running: AtomicBool,
    sweeps: AtomicU64,
    sweep_errors: AtomicU64,
}

impl RetrySupervisor {
    pub fn new(queue: MessageQueue, config: SupervisorConfig) -> Self {
        Self {
            queue,
            config,
            metrics: None,
            owner: Uuid::new_v4().to_string(),
            running: AtomicBool::new(false),
            sweeps: AtomicU64::new(0),
            sweep_errors: AtomicU64::new(0),
        }
    }

    /// Sample queue state into `metrics` after every sweep.
    pub fn with_metrics(mut self, metrics: Arc<MetricsPublisher>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Sweeps completed by this supervisor.
    pub fn sweeps(&self) -> u64 {
        self.sweeps.load(Ordering::SeqCst)
    }

    pub fn sweep_errors(&self) -> u64 {
        self.sweep_errors.load(Ordering::SeqCst)
    }

    fn sweep_lock_key(&self) -> String {
        format!("{}.retry-sweep", self.queue.name())
    }

    /// Run one sweep now. Returns `None` if another supervisor holds the
    /// sweep lock.
    pub async fn sweep_once(&self) -> QueueResult<Option<RetrySummary>> {
        if self.config.exclusive {
            let acquired = self
                .queue
                .store()
                .add_if_absent_with_expiry(
                    &self.sweep_lock_key(),
                    &self.owner,
                    self.config.retry_interval,
                )
                .await?;
            if !acquired {
                debug!(queue = %self.queue.name(), "Retry sweep held elsewhere, skipping");
                return Ok(None);
            }
        }

        let summary = self.queue.retry().await?;
        self.sweeps.fetch_add(1, Ordering::SeqCst);

        if let Some(metrics) = &self.metrics {
            match self.queue.read_state().await {
                Ok(state) => metrics.observe_state(&state),
                Err(e) => warn!(queue = %self.queue.name(), "Failed to sample queue state: {}", e),
            }
        }

        Ok(Some(summary))
    }

    /// Sweep until `shutdown_rx` fires. Sweep errors are logged and the
    /// loop carries on.
    pub async fn run_loop(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        self.running.store(true, Ordering::SeqCst);
        info!(
            queue = %self.queue.name(),
            interval_ms = self.config.retry_interval.as_millis() as u64,
            "Retry supervisor started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!(queue = %self.queue.name(), "Retry supervisor shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.config.retry_interval) => {
                    if let Err(e) = self.sweep_once().await {
                        self.sweep_errors.fetch_add(1, Ordering::SeqCst);
                        error!(queue = %self.queue.name(), "Retry sweep failed: {}", e);
                    }
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
    }

    /// Spawn [`run_loop`](Self::run_loop) on the current runtime.
    pub fn spawn(self: Arc<Self>, shutdown_rx: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run_loop(shutdown_rx))
    }

    pub fn interval(&self) -> Duration {
        self.config.retry_interval
    }
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
