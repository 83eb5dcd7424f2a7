//! Metric snapshot store: the set of currently published measurement values.
//!
//! The scheduler is the only writer and replaces the whole set at once; the
//! exposition layer reads it at scrape time. Generations are held as
//! `Arc<[MetricValue]>` so the critical section is a pointer swap on write
//! and a refcount bump on read, and a reader never sees a mix of two
//! generations.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{Gauge, GaugeVec, Opts};
use tracing::warn;

/// Kind of a published value. Only point-in-time gauges are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Gauge,
}

/// One published sample.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricValue {
    /// Metric name without the namespace prefix.
    pub name: &'static str,
    pub help: &'static str,
    pub kind: MetricKind,
    pub value: f64,
    /// Label pairs, in the order the metric declares them.
    pub labels: Vec<(String, String)>,
}

impl MetricValue {
    pub fn gauge(name: &'static str, help: &'static str, value: f64) -> Self {
        Self {
            name,
            help,
            kind: MetricKind::Gauge,
            value,
            labels: Vec::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push((key.into(), value.into()));
        self
    }

    /// Value of the label `key`, if present.
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Shared, atomically replaced snapshot. Cloning shares the same store.
#[derive(Debug, Clone, Default)]
pub struct SnapshotStore {
    current: Arc<Mutex<Arc<[MetricValue]>>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Arc<[MetricValue]>> {
        // The guarded value is a single pointer, so a panic while holding the
        // lock cannot leave it half-written.
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Discards the published set and installs `values` as the new one.
    pub fn replace(&self, values: Vec<MetricValue>) {
        let next: Arc<[MetricValue]> = values.into();
        *self.lock() = next;
    }

    /// Publishes nothing until the next `replace`.
    pub fn clear(&self) {
        self.replace(Vec::new());
    }

    /// Returns the installed generation.
    pub fn read_all(&self) -> Arc<[MetricValue]> {
        self.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Builds metric families from one generation, grouping samples by name.
fn families(values: &[MetricValue]) -> Vec<MetricFamily> {
    let mut by_name: BTreeMap<&'static str, Vec<&MetricValue>> = BTreeMap::new();
    for v in values {
        by_name.entry(v.name).or_default().push(v);
    }

    let mut out = Vec::with_capacity(by_name.len());
    for (name, samples) in by_name {
        let first = samples[0];
        match first.kind {
            MetricKind::Gauge => out.extend(gauge_family(name, &samples)),
        }
    }
    out
}

fn gauge_family(name: &'static str, samples: &[&MetricValue]) -> Vec<MetricFamily> {
    let first = samples[0];
    let opts = Opts::new(name, first.help);

    if first.labels.is_empty() {
        // Unlabeled metrics have a single series; the last sample wins.
        let gauge = match Gauge::with_opts(opts) {
            Ok(g) => g,
            Err(e) => {
                warn!(metric = name, error = %e, "invalid metric, skipped");
                return Vec::new();
            }
        };
        if let Some(last) = samples.last() {
            gauge.set(last.value);
        }
        return gauge.collect();
    }

    let keys: Vec<&str> = first.labels.iter().map(|(k, _)| k.as_str()).collect();
    let vec = match GaugeVec::new(opts, &keys) {
        Ok(v) => v,
        Err(e) => {
            warn!(metric = name, error = %e, "invalid metric, skipped");
            return Vec::new();
        }
    };
    for sample in samples {
        let label_values: Option<Vec<&str>> = keys.iter().map(|k| sample.label(k)).collect();
        let Some(label_values) = label_values else {
            warn!(metric = name, "sample with mismatched labels, skipped");
            continue;
        };
        match vec.get_metric_with_label_values(&label_values) {
            Ok(g) => g.set(sample.value),
            Err(e) => warn!(metric = name, error = %e, "sample rejected"),
        }
    }
    vec.collect()
}

impl Collector for SnapshotStore {
    fn desc(&self) -> Vec<&Desc> {
        // Metric names vary with the snapshot, so the store is an unchecked
        // collector.
        Vec::new()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let generation = self.read_all();
        families(&generation)
    }
}
