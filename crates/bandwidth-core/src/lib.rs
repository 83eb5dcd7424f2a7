//! bandwidth-core: scheduled speed measurements republished as metrics.
//!
//! Provides:
//! - `invoker`: runs the external measurement tool under a deadline
//! - `snapshot`: the atomically replaced set of published metric values
//! - `exporter`: maps a measurement into snapshot values
//! - `health`: self-monitoring counters and gauges of the collection loop
//! - `metrics`: the explicitly constructed registry tying the above together
//! - `scheduler`: the supervisory collection loop
//! - `fmt`: formatting helpers for log output
//! - `util`: CLI parsing helpers

pub mod exporter;
pub mod fmt;
pub mod health;
pub mod invoker;
pub mod metrics;
pub mod scheduler;
pub mod snapshot;
pub mod util;

pub use exporter::{ExporterConfig, to_metrics};
pub use health::CollectionHealth;
pub use invoker::{
    Measurement, MeasurementError, MeasurementErrorKind, MeasurementResult, SpeedtestCommand,
};
pub use metrics::MetricsRegistry;
pub use scheduler::{Phase, Scheduler, SchedulerConfig, SchedulerError};
pub use snapshot::{MetricKind, MetricValue, SnapshotStore};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
