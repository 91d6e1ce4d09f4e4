//! Prometheus-style counters and gauges fed by queue events.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::events::{EventPublisher, QueueEvent, QueueEventKind};
use crate::queue::QueueState;

/// Metric type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    /// Monotonically increasing.
    Counter,
    /// Can go up and down.
    Gauge,
}

/// A metric definition.
#[derive(Debug, Clone)]
pub struct MetricDef {
    pub name: String,
    pub metric_type: MetricType,
    pub help: String,
}

/// Metrics registry.
///
/// Lookups take a read lock only; the values themselves are atomics.
pub struct MetricsRegistry {
    definitions: RwLock<BTreeMap<String, MetricDef>>,
    counters: RwLock<BTreeMap<String, Arc<AtomicU64>>>,
    gauges: RwLock<BTreeMap<String, Arc<AtomicI64>>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            definitions: RwLock::new(BTreeMap::new()),
            counters: RwLock::new(BTreeMap::new()),
            gauges: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register a counter. Registering an existing name keeps its value.
    pub fn register_counter(&self, name: impl Into<String>, help: impl Into<String>) {
        let name = name.into();
        self.define(&name, MetricType::Counter, help.into());
        self.counters
            .write()
            .entry(name)
            .or_insert_with(|| Arc::new(AtomicU64::new(0)));
    }

    /// Register a gauge. Registering an existing name keeps its value.
    pub fn register_gauge(&self, name: impl Into<String>, help: impl Into<String>) {
        let name = name.into();
        self.define(&name, MetricType::Gauge, help.into());
        self.gauges
            .write()
            .entry(name)
            .or_insert_with(|| Arc::new(AtomicI64::new(0)));
    }

    fn define(&self, name: &str, metric_type: MetricType, help: String) {
        self.definitions.write().insert(
            name.to_string(),
            MetricDef {
                name: name.to_string(),
                metric_type,
                help,
            },
        );
    }

    pub fn inc_counter(&self, name: &str) {
        self.add_counter(name, 1);
    }

    /// Add to a counter. Unknown names are ignored.
    pub fn add_counter(&self, name: &str, value: u64) {
        if let Some(counter) = self.counters.read().get(name) {
            counter.fetch_add(value, Ordering::Relaxed);
        }
    }

    /// Set a gauge value. Unknown names are ignored.
    pub fn set_gauge(&self, name: &str, value: i64) {
        if let Some(gauge) = self.gauges.read().get(name) {
            gauge.store(value, Ordering::Relaxed);
        }
    }

    pub fn get_counter(&self, name: &str) -> Option<u64> {
        self.counters
            .read()
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
    }

    pub fn get_gauge(&self, name: &str) -> Option<i64> {
        self.gauges
            .read()
            .get(name)
            .map(|g| g.load(Ordering::Relaxed))
    }

    /// Export metrics in Prometheus text format, sorted by name.
    pub fn export(&self) -> String {
        let defs = self.definitions.read();
        let counters = self.counters.read();
        let gauges = self.gauges.read();

        let mut output = String::new();

        for (name, def) in defs.iter() {
            let (type_str, value) = match def.metric_type {
                MetricType::Counter => (
                    "counter",
                    counters.get(name).map(|c| c.load(Ordering::Relaxed).to_string()),
                ),
                MetricType::Gauge => (
                    "gauge",
                    gauges.get(name).map(|g| g.load(Ordering::Relaxed).to_string()),
                ),
            };

            output.push_str(&format!("# HELP {} {}\n", name, def.help));
            output.push_str(&format!("# TYPE {} {}\n", name, type_str));
            if let Some(v) = value {
                output.push_str(&format!("{} {}\n", name, v));
            }
        }

        output
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

const PREFIX: &str = "redq";

/// Counts queue events and exposes queue depth gauges.
///
/// One `redq_<event>_total` counter per event kind. Gauges are only
/// updated through [`MetricsPublisher::observe_state`].
pub struct MetricsPublisher {
    registry: Arc<MetricsRegistry>,
}

impl MetricsPublisher {
    pub fn new(registry: Arc<MetricsRegistry>) -> Self {
        for name in QueueEventKind::NAMES {
            registry.register_counter(
                counter_name(name),
                format!("Total {} events", name.replace('_', " ")),
            );
        }
        registry.register_counter(
            format!("{PREFIX}_retry_swept_total"),
            "Expired messages handled by retry sweeps",
        );
        registry.register_gauge(format!("{PREFIX}_queue_depth"), "Messages in the ready set");
        registry.register_gauge(
            format!("{PREFIX}_queue_ready"),
            "Ready messages due for delivery",
        );
        registry.register_gauge(
            format!("{PREFIX}_queue_unacked"),
            "Messages awaiting acknowledgment",
        );
        registry.register_gauge(
            format!("{PREFIX}_queue_orphaned"),
            "Stored bodies with no ready or unacked entry",
        );
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<MetricsRegistry> {
        &self.registry
    }

    /// Record a queue state sample.
    pub fn observe_state(&self, state: &QueueState) {
        self.registry
            .set_gauge(&format!("{PREFIX}_queue_depth"), state.depth);
        self.registry
            .set_gauge(&format!("{PREFIX}_queue_ready"), state.ready);
        self.registry
            .set_gauge(&format!("{PREFIX}_queue_unacked"), state.unacked);
        self.registry
            .set_gauge(&format!("{PREFIX}_queue_orphaned"), state.orphaned);
    }
}

fn counter_name(event: &str) -> String {
    format!("{PREFIX}_{event}_total")
}

impl EventPublisher for MetricsPublisher {
    fn publish(&self, event: &QueueEvent) {
        self.registry.inc_counter(&counter_name(event.kind.name()));
        if let QueueEventKind::RetrySweepCompleted {
            retried,
            duplicates,
            dead,
            failed,
        } = &event.kind
        {
            self.registry.add_counter(
                &format!("{PREFIX}_retry_swept_total"),
                (retried + duplicates + dead + failed) as u64,
            );
        }
    }
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
