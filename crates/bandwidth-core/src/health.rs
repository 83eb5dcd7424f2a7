//! Self-monitoring of the collection loop.
//!
//! Initialized once per registry, updated once per cycle, never reset.

use std::time::Duration;

use prometheus::{Gauge, IntCounter, Opts, Registry};

/// Process-wide counters and gauges about collection cycles.
///
/// Cloning yields handles to the same underlying metrics.
#[derive(Clone)]
pub struct CollectionHealth {
    collects: IntCounter,
    errors: IntCounter,
    duration: Gauge,
    timeout: Gauge,
    last_success: Gauge,
    interval: Gauge,
}

impl CollectionHealth {
    pub fn new() -> prometheus::Result<Self> {
        Ok(Self {
            collects: IntCounter::with_opts(Opts::new("collects_total", "Count of collects"))?,
            errors: IntCounter::with_opts(Opts::new(
                "collect_errors_total",
                "Total number of failed collections",
            ))?,
            duration: Gauge::with_opts(Opts::new(
                "collect_duration_seconds",
                "Duration of the last successful collection",
            ))?,
            timeout: Gauge::with_opts(Opts::new(
                "collect_timeout_seconds",
                "Seconds after which a collection is aborted",
            ))?,
            last_success: Gauge::with_opts(Opts::new(
                "collect_last_success_timestamp_seconds",
                "UNIX timestamp of the last successful collection",
            ))?,
            interval: Gauge::with_opts(Opts::new(
                "collect_interval",
                "Interval in seconds at which collection results are refreshed",
            ))?,
        })
    }

    pub fn register(&self, registry: &Registry) -> prometheus::Result<()> {
        registry.register(Box::new(self.collects.clone()))?;
        registry.register(Box::new(self.errors.clone()))?;
        registry.register(Box::new(self.duration.clone()))?;
        registry.register(Box::new(self.timeout.clone()))?;
        registry.register(Box::new(self.last_success.clone()))?;
        registry.register(Box::new(self.interval.clone()))?;
        Ok(())
    }

    /// Records the schedule in force.
    pub fn set_schedule(&self, interval: Duration, timeout: Duration) {
        self.interval.set(interval.as_secs_f64());
        self.timeout.set(timeout.as_secs_f64());
    }

    pub fn cycle_started(&self) {
        self.collects.inc();
    }

    pub fn cycle_failed(&self) {
        self.errors.inc();
    }

    pub fn cycle_succeeded(&self, took: Duration, at_unix_secs: i64) {
        self.duration.set(took.as_secs_f64());
        self.last_success.set(at_unix_secs as f64);
    }

    pub fn collects_total(&self) -> u64 {
        self.collects.get()
    }

    pub fn errors_total(&self) -> u64 {
        self.errors.get()
    }

    pub fn last_duration_secs(&self) -> f64 {
        self.duration.get()
    }

    /// Zero until the first successful cycle.
    pub fn last_success_timestamp(&self) -> f64 {
        self.last_success.get()
    }

    pub fn timeout_secs(&self) -> f64 {
        self.timeout.get()
    }

    pub fn interval_secs(&self) -> f64 {
        self.interval.get()
    }
}
