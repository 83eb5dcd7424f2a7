//! Structured output of the measurement tool (`-f json`).

use serde::Deserialize;

use super::error::MeasurementError;

/// One successful measurement. Rates are in bytes per second as the tool
/// reports them; conversion to bits happens in the exporter.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasurementResult {
    pub ping: Ping,
    pub download: Transfer,
    pub upload: Transfer,
    /// Percentage. The tool omits it when loss could not be measured.
    #[serde(default)]
    pub packet_loss: Option<f64>,
    #[serde(default)]
    pub isp: String,
    #[serde(default)]
    pub interface: Interface,
    /// Application-level failure message; absent or empty on success.
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Ping {
    pub latency: f64,
    #[serde(default)]
    pub jitter: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Transfer {
    /// Bytes per second.
    pub bandwidth: f64,
    #[serde(default)]
    pub bytes: Option<f64>,
    /// Milliseconds spent transferring.
    #[serde(default)]
    pub elapsed: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interface {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub external_ip: String,
}

/// Only the error field. A failing tool omits the measurement sections.
#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    error: Option<String>,
}

impl MeasurementResult {
    /// Parses tool stdout and rejects documents that embed an error message.
    ///
    /// The error field is checked before the measurement sections, so a
    /// document carrying only `error` maps to `SemanticError`. Other parse
    /// failures map to `ParseFailed`. Captured output is attached by the caller.
    pub fn parse(stdout: &[u8]) -> Result<Self, MeasurementError> {
        let parse_failed = |e: serde_json::Error| {
            MeasurementError::parse_failed(format!("parsing speedtest output: {e}"))
        };

        let envelope: Envelope = serde_json::from_slice(stdout).map_err(parse_failed)?;
        match envelope.error.as_deref().map(str::trim) {
            Some(msg) if !msg.is_empty() => Err(MeasurementError::semantic(msg)),
            _ => serde_json::from_slice(stdout).map_err(parse_failed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoker::MeasurementErrorKind;

    const FULL: &str = r#"{
        "type": "result",
        "ping": {"jitter": 0.8, "latency": 14.2},
        "download": {"bandwidth": 12500000, "bytes": 150000000, "elapsed": 12000},
        "upload": {"bandwidth": 1250000, "bytes": 15000000, "elapsed": 11000},
        "packetLoss": 0.5,
        "isp": "Acme",
        "interface": {"internalIp": "10.0.0.2", "name": "eth0", "externalIp": "203.0.113.7"},
        "server": {"id": 1234, "name": "Example"},
        "error": ""
    }"#;

    #[test]
    fn parses_full_document() {
        let r = MeasurementResult::parse(FULL.as_bytes()).unwrap();
        assert_eq!(r.download.bandwidth, 12_500_000.0);
        assert_eq!(r.upload.bandwidth, 1_250_000.0);
        assert_eq!(r.ping.latency, 14.2);
        assert_eq!(r.ping.jitter, Some(0.8));
        assert_eq!(r.download.bytes, Some(150_000_000.0));
        assert_eq!(r.upload.elapsed, Some(11_000.0));
        assert_eq!(r.packet_loss, Some(0.5));
        assert_eq!(r.isp, "Acme");
        assert_eq!(r.interface.name, "eth0");
        assert_eq!(r.interface.external_ip, "203.0.113.7");
    }

    #[test]
    fn optional_fields_may_be_absent() {
        let doc = r#"{
            "ping": {"latency": 9.0},
            "download": {"bandwidth": 1000},
            "upload": {"bandwidth": 500}
        }"#;
        let r = MeasurementResult::parse(doc.as_bytes()).unwrap();
        assert_eq!(r.packet_loss, None);
        assert_eq!(r.ping.jitter, None);
        assert!(r.isp.is_empty());
        assert!(r.interface.external_ip.is_empty());
    }

    #[test]
    fn non_empty_error_field_is_semantic_failure() {
        let doc = r#"{
            "ping": {"latency": 0},
            "download": {"bandwidth": 0},
            "upload": {"bandwidth": 0},
            "error": "Configuration - Could not retrieve or read configuration (ConfigurationError)"
        }"#;
        let err = MeasurementResult::parse(doc.as_bytes()).unwrap_err();
        assert_eq!(err.kind, MeasurementErrorKind::SemanticError);
        assert!(err.message.contains("ConfigurationError"));
    }

    #[test]
    fn error_without_measurement_sections_is_semantic_failure() {
        for doc in [
            r#"{"error":"Cannot open socket: Timeout occurred in connect."}"#,
            r#"{"type":"result","ping":{"latency":3.0},"error":"Upload failed"}"#,
        ] {
            let err = MeasurementResult::parse(doc.as_bytes()).unwrap_err();
            assert_eq!(err.kind, MeasurementErrorKind::SemanticError, "input: {doc:?}");
        }
    }

    #[test]
    fn whitespace_error_field_is_success() {
        let doc = r#"{
            "ping": {"latency": 1},
            "download": {"bandwidth": 1},
            "upload": {"bandwidth": 1},
            "error": "  "
        }"#;
        assert!(MeasurementResult::parse(doc.as_bytes()).is_ok());
    }

    #[test]
    fn malformed_output_is_parse_failure() {
        for doc in [
            "",
            "not json",
            "[1, 2]",
            r#"{"ping": {"latency": 1}}"#,
            r#"{"ping": {"latency": 1}, "error": ""}"#,
        ] {
            let err = MeasurementResult::parse(doc.as_bytes()).unwrap_err();
            assert_eq!(err.kind, MeasurementErrorKind::ParseFailed, "input: {doc:?}");
        }
    }
}
