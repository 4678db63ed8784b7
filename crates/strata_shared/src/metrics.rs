//! # Metrics Seam
//!
//! Every subsystem reports counters through a [`MetricsSink`]. Recording is
//! fire-and-forget: a sink must never block for long and must never make the
//! caller fail. Sinks that can fail internally swallow their own errors.
//!
//! ```text
//!   PatchApplier ──┐
//!   PatchQueue ────┼──> Arc<dyn MetricsSink> ──> (tracing | memory | external)
//!   Orchestrator ──┘
//! ```

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::clock::{now_millis, Millis};

/// Key/value labels attached to a metric sample.
pub type MetricTags = BTreeMap<String, String>;

/// Destination for metric samples.
pub trait MetricsSink: Send + Sync {
    /// Records a single sample.
    fn record_metric(&self, name: &str, value: f64, tags: Option<&MetricTags>);
}

/// Discards every sample.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    #[inline]
    fn record_metric(&self, _name: &str, _value: f64, _tags: Option<&MetricTags>) {}
}

/// Emits every sample as a `debug` tracing event under the `metrics` target.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn record_metric(&self, name: &str, value: f64, tags: Option<&MetricTags>) {
        match tags {
            Some(tags) if !tags.is_empty() => {
                tracing::debug!(target: "metrics", metric = name, value, ?tags);
            }
            _ => tracing::debug!(target: "metrics", metric = name, value),
        }
    }
}

/// A recorded metric sample.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MetricSample {
    /// Metric name.
    pub name: String,
    /// Sample value.
    pub value: f64,
    /// Labels supplied with the sample.
    pub tags: MetricTags,
    /// Wall-clock time the sample was recorded.
    pub recorded_at: Millis,
}

/// Keeps every sample in memory.
///
/// Meant for tests and tooling; it grows without bound.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    samples: Mutex<Vec<MetricSample>>,
}

impl InMemoryMetrics {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every sample recorded so far.
    #[must_use]
    pub fn samples(&self) -> Vec<MetricSample> {
        self.samples.lock().clone()
    }

    /// Returns how many samples were recorded under `name`.
    #[must_use]
    pub fn count(&self, name: &str) -> usize {
        self.samples.lock().iter().filter(|s| s.name == name).count()
    }

    /// Returns the most recent value recorded under `name`.
    #[must_use]
    pub fn last_value(&self, name: &str) -> Option<f64> {
        self.samples
            .lock()
            .iter()
            .rev()
            .find(|s| s.name == name)
            .map(|s| s.value)
    }

    /// Drops every recorded sample.
    pub fn reset(&self) {
        self.samples.lock().clear();
    }
}

impl MetricsSink for InMemoryMetrics {
    fn record_metric(&self, name: &str, value: f64, tags: Option<&MetricTags>) {
        self.samples.lock().push(MetricSample {
            name: name.to_string(),
            value,
            tags: tags.cloned().unwrap_or_default(),
            recorded_at: now_millis(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_sink_records_in_order() {
        let sink = InMemoryMetrics::new();
        sink.record_metric("queue.put", 1.0, None);

        let mut tags = MetricTags::new();
        tags.insert("queue".to_string(), "default".to_string());
        sink.record_metric("queue.put", 2.0, Some(&tags));

        assert_eq!(sink.count("queue.put"), 2);
        assert_eq!(sink.last_value("queue.put"), Some(2.0));
        assert_eq!(sink.samples()[1].tags.get("queue").map(String::as_str), Some("default"));

        sink.reset();
        assert!(sink.samples().is_empty());
    }

    #[test]
    fn test_sinks_are_object_safe() {
        let sinks: Vec<Box<dyn MetricsSink>> = vec![Box::new(NoopMetrics), Box::new(TracingMetrics)];
        for sink in &sinks {
            sink.record_metric("noop", 0.0, None);
        }
    }
}
