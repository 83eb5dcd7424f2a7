//! Collection scheduler: the supervisory loop around the measurement.
//!
//! One cycle at a time, each bounded by a timeout derived from the interval.
//! The loop has two phases:
//!
//! - **Startup**: the first collection is retried back to back up to
//!   `startup_attempts` times. If none succeeds, [`Scheduler::run`] returns
//!   [`SchedulerError::StartupExhausted`] and the process is expected to exit.
//! - **Steady**: after one full interval, cycles run on a fixed cadence.
//!   Failures are logged and counted and never stop the loop.
//!
//! A failed cycle clears the snapshot store, so stale measurements are never
//! served. Health metrics are updated for every cycle in both phases.

use std::convert::Infallible;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::exporter::{ExporterConfig, bytes_to_bits, to_metrics};
use crate::fmt::{format_bits_rate, format_duration};
use crate::health::CollectionHealth;
use crate::invoker::{Measurement, MeasurementError};
use crate::metrics::MetricsRegistry;
use crate::snapshot::SnapshotStore;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_MAX_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_STARTUP_ATTEMPTS: u32 = 6;

/// Extra time granted to a [`Measurement`] past its deadline before the
/// scheduler abandons the cycle itself.
pub const DEADLINE_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub interval: Duration,
    /// Ceiling of the derived per-cycle timeout.
    pub max_timeout: Duration,
    /// Total attempts of the startup phase, including the first.
    pub startup_attempts: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            max_timeout: DEFAULT_MAX_TIMEOUT,
            startup_attempts: DEFAULT_STARTUP_ATTEMPTS,
        }
    }
}

impl SchedulerConfig {
    pub fn timeout(&self) -> Duration {
        derive_timeout(self.interval, self.max_timeout)
    }
}

/// Per-cycle timeout: 90% of the interval, capped at `ceiling`.
pub fn derive_timeout(interval: Duration, ceiling: Duration) -> Duration {
    (interval - interval / 10).min(ceiling)
}

/// Wait before the next cycle. Zero when the cycle used up the interval.
pub fn next_sleep(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No cycle has succeeded yet.
    Startup,
    /// At least one cycle has succeeded.
    Steady,
}

/// Result of one cycle.
#[derive(Debug)]
pub struct CycleOutcome {
    /// 1-based cycle number.
    pub cycle: u64,
    pub elapsed: Duration,
    pub result: Result<(), MeasurementError>,
}

impl CycleOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Error type for scheduler failures.
#[derive(Debug)]
pub enum SchedulerError {
    /// No attempt of the startup phase succeeded.
    StartupExhausted {
        attempts: u32,
        last: MeasurementError,
    },
}

impl std::fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerError::StartupExhausted { attempts, last } => write!(
                f,
                "none of the first {} collections succeeded, aborting. Last error: {}",
                attempts, last
            ),
        }
    }
}

impl std::error::Error for SchedulerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SchedulerError::StartupExhausted { last, .. } => Some(last),
        }
    }
}

/// Runs measurements on a schedule and publishes their results.
///
/// The scheduler is the only writer of the snapshot store it was built with.
pub struct Scheduler<M> {
    measurement: M,
    exporter: ExporterConfig,
    store: SnapshotStore,
    health: CollectionHealth,
    config: SchedulerConfig,
    timeout: Duration,
    phase: Phase,
    cycles: u64,
}

impl<M: Measurement> Scheduler<M> {
    /// Creates a scheduler publishing into `metrics`.
    ///
    /// Records the interval and derived timeout in the health metrics.
    pub fn new(
        measurement: M,
        exporter: ExporterConfig,
        metrics: &MetricsRegistry,
        config: SchedulerConfig,
    ) -> Self {
        let timeout = config.timeout();
        metrics.health().set_schedule(config.interval, timeout);
        Self {
            measurement,
            exporter,
            store: metrics.store().clone(),
            health: metrics.health().clone(),
            config,
            timeout,
            phase: Phase::Startup,
            cycles: 0,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Runs one cycle: measure under the timeout, then publish or clear.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        self.cycles += 1;
        let cycle = self.cycles;
        self.health.cycle_started();

        let start = Instant::now();
        let deadline = start + self.timeout;
        let measured = match tokio::time::timeout_at(
            deadline + DEADLINE_GRACE,
            self.measurement.invoke(deadline),
        )
        .await
        {
            Ok(r) => r,
            Err(_) => Err(MeasurementError::timed_out(
                "measurement did not return within its deadline",
            )),
        };
        let elapsed = start.elapsed();

        let result = match measured {
            Ok(m) => {
                self.store.replace(to_metrics(&m, &self.exporter));
                self.health.cycle_succeeded(elapsed, Utc::now().timestamp());
                info!(
                    cycle,
                    took = %format_duration(elapsed),
                    download = %format_bits_rate(bytes_to_bits(m.download.bandwidth)),
                    upload = %format_bits_rate(bytes_to_bits(m.upload.bandwidth)),
                    latency = m.ping.latency,
                    isp = %m.isp,
                    "collection succeeded"
                );
                Ok(())
            }
            Err(e) => {
                self.health.cycle_failed();
                self.store.clear();
                warn!(
                    cycle,
                    kind = %e.kind,
                    took = %format_duration(elapsed),
                    "collection failed\n{e}"
                );
                Err(e)
            }
        };

        CycleOutcome {
            cycle,
            elapsed,
            result,
        }
    }

    /// Runs the startup phase until one cycle succeeds or the attempts run out.
    ///
    /// Returns the duration of the successful cycle.
    pub async fn startup(&mut self) -> Result<Duration, SchedulerError> {
        let attempts = self.config.startup_attempts.max(1);
        info!(
            timeout = %format_duration(self.timeout),
            attempts,
            "running first collect"
        );

        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = self.run_cycle().await;
            match outcome.result {
                Ok(()) => {
                    self.phase = Phase::Steady;
                    info!(
                        took = %format_duration(outcome.elapsed),
                        interval = %format_duration(self.config.interval),
                        "first collect succeeded, refreshing on schedule"
                    );
                    return Ok(outcome.elapsed);
                }
                Err(last) if attempt >= attempts => {
                    error!(attempts, "no startup collection succeeded");
                    return Err(SchedulerError::StartupExhausted { attempts, last });
                }
                Err(_) => {
                    warn!(remaining = attempts - attempt, "first collect failed, retrying");
                }
            }
        }
    }

    /// Runs the scheduler until the future is dropped.
    ///
    /// Only returns with an error, when the startup phase is exhausted.
    pub async fn run(mut self) -> Result<Infallible, SchedulerError> {
        if self.phase == Phase::Startup {
            self.startup().await?;
        }

        tokio::time::sleep(self.config.interval).await;

        loop {
            let outcome = self.run_cycle().await;
            let delay = next_sleep(self.config.interval, outcome.elapsed);

            if !outcome.is_success() {
                info!(delay = %format_duration(delay), "retrying on schedule");
            } else if delay.is_zero() {
                warn!(
                    took = %format_duration(outcome.elapsed),
                    interval = %format_duration(self.config.interval),
                    "collection used up the interval, next one starts immediately"
                );
            } else {
                debug!(delay = %format_duration(delay), "sleeping until next collection");
            }

            tokio::time::sleep(delay).await;
        }
    }
}
