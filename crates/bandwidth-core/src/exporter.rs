//! Exporter adapter: maps a measurement into snapshot values.
//!
//! Unit convention: transmit and receive rates are published in bits per
//! second, derived as `bytes/s * 8` from the tool's `bandwidth` fields.
//! Expected baselines are taken to be bits per second already.

use crate::invoker::MeasurementResult;
use crate::snapshot::{MetricKind, MetricValue};

pub const TYPE_MEASURED: &str = "measured";
pub const TYPE_EXPECTED: &str = "expected";

/// Static description of a snapshot metric.
#[derive(Debug, Clone, Copy)]
pub struct MetricDef {
    pub name: &'static str,
    pub help: &'static str,
    /// Label keys whose values are supplied per sample.
    pub variable_labels: &'static [&'static str],
}

impl MetricDef {
    /// A gauge sample; `label_values` pair up with `variable_labels` in order.
    pub fn gauge(&self, value: f64, label_values: &[&str]) -> MetricValue {
        debug_assert_eq!(
            self.variable_labels.len(),
            label_values.len(),
            "label arity mismatch for {}",
            self.name
        );
        MetricValue {
            name: self.name,
            help: self.help,
            kind: MetricKind::Gauge,
            value,
            labels: self
                .variable_labels
                .iter()
                .zip(label_values)
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    /// An info-style sample: constant value 1 carrying `labels` as metadata.
    pub fn info(&self, labels: &[(&str, &str)]) -> MetricValue {
        MetricValue {
            name: self.name,
            help: self.help,
            kind: MetricKind::Gauge,
            value: 1.0,
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

pub const TRANSMIT_RATE: MetricDef = MetricDef {
    name: "transmit_rate_bits",
    help: "Transmit (upload) rate in bits per second",
    variable_labels: &["type"],
};

pub const RECEIVE_RATE: MetricDef = MetricDef {
    name: "receive_rate_bits",
    help: "Receive (download) rate in bits per second",
    variable_labels: &["type"],
};

pub const LATENCY: MetricDef = MetricDef {
    name: "latency_seconds",
    help: "Measured latency (ping) as reported by the speedtest",
    variable_labels: &[],
};

pub const PACKET_LOSS: MetricDef = MetricDef {
    name: "packet_loss",
    help: "Packet loss in percent",
    variable_labels: &[],
};

pub const INFO: MetricDef = MetricDef {
    name: "info",
    help: "Metadata gathered during the speedtest",
    variable_labels: &["isp", "externalIP"],
};

/// Static baselines configured at startup, in bits per second.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ExporterConfig {
    pub expected_download: Option<f64>,
    pub expected_upload: Option<f64>,
}

impl ExporterConfig {
    /// Treats a zero baseline as "not configured".
    pub fn new(expected_download: Option<f64>, expected_upload: Option<f64>) -> Self {
        let set = |v: Option<f64>| v.filter(|x| *x != 0.0);
        Self {
            expected_download: set(expected_download),
            expected_upload: set(expected_upload),
        }
    }
}

/// Converts bytes per second to bits per second.
pub fn bytes_to_bits(bytes_per_sec: f64) -> f64 {
    bytes_per_sec * 8.0
}

/// Produces the full snapshot for one successful measurement.
pub fn to_metrics(result: &MeasurementResult, config: &ExporterConfig) -> Vec<MetricValue> {
    let mut m = vec![
        TRANSMIT_RATE.gauge(bytes_to_bits(result.upload.bandwidth), &[TYPE_MEASURED]),
        RECEIVE_RATE.gauge(bytes_to_bits(result.download.bandwidth), &[TYPE_MEASURED]),
        LATENCY.gauge(result.ping.latency, &[]),
    ];

    if let Some(loss) = result.packet_loss {
        m.push(PACKET_LOSS.gauge(loss, &[]));
    }

    m.push(INFO.info(&[
        ("isp", result.isp.as_str()),
        ("externalIP", result.interface.external_ip.as_str()),
    ]));

    if let Some(download) = config.expected_download {
        m.push(RECEIVE_RATE.gauge(download, &[TYPE_EXPECTED]));
    }
    if let Some(upload) = config.expected_upload {
        m.push(TRANSMIT_RATE.gauge(upload, &[TYPE_EXPECTED]));
    }

    m
}
