//! Classified failures of a single measurement invocation.

use crate::fmt::indent_continuation;

/// Column at which the diagnostic values start in the rendered error.
const DIAG_INDENT: usize = 11;

/// What went wrong with a measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasurementErrorKind {
    /// The tool could not be started, exited non-zero or was killed by a signal.
    ProcessFailed,
    /// The deadline elapsed before the tool exited.
    TimedOut,
    /// The tool exited successfully but stdout was not the expected document.
    ParseFailed,
    /// The document was well-formed but carried a non-empty `error` field.
    SemanticError,
}

impl MeasurementErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeasurementErrorKind::ProcessFailed => "process-failed",
            MeasurementErrorKind::TimedOut => "timed-out",
            MeasurementErrorKind::ParseFailed => "parse-failed",
            MeasurementErrorKind::SemanticError => "semantic-error",
        }
    }
}

impl std::fmt::Display for MeasurementErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for a failed measurement, carrying captured tool output.
#[derive(Debug, Clone)]
pub struct MeasurementError {
    pub kind: MeasurementErrorKind,
    pub message: String,
    pub stdout: String,
    pub stderr: String,
}

impl MeasurementError {
    pub fn new(kind: MeasurementErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    /// Attaches the captured output streams for diagnostics.
    pub fn with_output(mut self, stdout: &[u8], stderr: &[u8]) -> Self {
        self.stdout = String::from_utf8_lossy(stdout).into_owned();
        self.stderr = String::from_utf8_lossy(stderr).into_owned();
        self
    }

    pub fn process_failed(message: impl Into<String>) -> Self {
        Self::new(MeasurementErrorKind::ProcessFailed, message)
    }

    pub fn timed_out(message: impl Into<String>) -> Self {
        Self::new(MeasurementErrorKind::TimedOut, message)
    }

    pub fn parse_failed(message: impl Into<String>) -> Self {
        Self::new(MeasurementErrorKind::ParseFailed, message)
    }

    pub fn semantic(message: impl Into<String>) -> Self {
        Self::new(MeasurementErrorKind::SemanticError, message)
    }
}

fn or_empty(s: &str) -> &str {
    let s = s.trim();
    if s.is_empty() { "(empty)" } else { s }
}

impl std::fmt::Display for MeasurementError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "speedtest failed ({}):", self.kind)?;
        writeln!(
            f,
            "  error  = {}",
            indent_continuation(DIAG_INDENT, &self.message)
        )?;
        writeln!(
            f,
            "  stderr = {}",
            indent_continuation(DIAG_INDENT, or_empty(&self.stderr))
        )?;
        write!(
            f,
            "  stdout = {}",
            indent_continuation(DIAG_INDENT, or_empty(&self.stdout))
        )
    }
}

impl std::error::Error for MeasurementError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_both_streams() {
        let err = MeasurementError::process_failed("exit status: 2")
            .with_output(b"partial\noutput\n", b"license not accepted");
        let text = err.to_string();

        assert!(text.starts_with("speedtest failed (process-failed):"));
        assert!(text.contains("  stderr = license not accepted"));
        assert!(text.contains("  stdout = partial\n           output"));
    }

    #[test]
    fn display_marks_empty_streams() {
        let text = MeasurementError::timed_out("deadline exceeded").to_string();
        assert!(text.contains("stderr = (empty)"));
        assert!(text.contains("stdout = (empty)"));
    }
}
