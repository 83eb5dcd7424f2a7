//! Measurement invoker: runs the external speed test tool under a deadline.
//!
//! Exactly one subprocess is spawned per [`Measurement::invoke`] call. The
//! invoker never retries; retry policy belongs to the scheduler.
//!
//! The tool is expected to be Ookla's `speedtest` CLI, invoked as
//!
//! ```text
//! speedtest -f json --accept-license --accept-gdpr [--interface=IFACE] [--server-id=ID]
//! ```

mod error;
mod result;

use std::future::Future;
use std::process::Stdio;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, warn};

pub use error::{MeasurementError, MeasurementErrorKind};
pub use result::{Interface, MeasurementResult, Ping, Transfer};

/// Source of measurements.
///
/// Implementations must honour `deadline`: the returned future resolves no
/// later than shortly after it, with `MeasurementErrorKind::TimedOut` if the
/// measurement did not finish in time.
pub trait Measurement: Send + Sync {
    fn invoke(
        &self,
        deadline: Instant,
    ) -> impl Future<Output = Result<MeasurementResult, MeasurementError>> + Send;
}

/// Invokes the speed test binary as a subprocess.
#[derive(Debug, Clone)]
pub struct SpeedtestCommand {
    program: String,
    interface: Option<String>,
    server_id: Option<String>,
}

impl Default for SpeedtestCommand {
    fn default() -> Self {
        Self::new("speedtest")
    }
}

impl SpeedtestCommand {
    /// Creates an invoker for the given program name or path.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            interface: None,
            server_id: None,
        }
    }

    /// Selects the network interface the tool should bind to.
    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    /// Pins the measurement to a specific server.
    pub fn with_server_id(mut self, server_id: impl Into<String>) -> Self {
        self.server_id = Some(server_id.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments passed to the tool, in order.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "-f".to_string(),
            "json".to_string(),
            "--accept-license".to_string(),
            "--accept-gdpr".to_string(),
        ];
        if let Some(ref iface) = self.interface {
            args.push(format!("--interface={iface}"));
        }
        if let Some(ref id) = self.server_id {
            args.push(format!("--server-id={id}"));
        }
        args
    }

    async fn run(&self, deadline: Instant) -> Result<MeasurementResult, MeasurementError> {
        let mut child = Command::new(&self.program)
            .args(self.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                MeasurementError::process_failed(format!("failed to start {}: {e}", self.program))
            })?;

        debug!(program = %self.program, pid = child.id(), "speedtest started");

        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        let waited = tokio::time::timeout_at(deadline, async {
            let read_out = async {
                match stdout_pipe.as_mut() {
                    Some(p) => p.read_to_end(&mut stdout).await.map(|_| ()),
                    None => Ok(()),
                }
            };
            let read_err = async {
                match stderr_pipe.as_mut() {
                    Some(p) => p.read_to_end(&mut stderr).await.map(|_| ()),
                    None => Ok(()),
                }
            };
            let (status, _, _) = tokio::try_join!(child.wait(), read_out, read_err)?;
            Ok::<_, std::io::Error>(status)
        })
        .await;

        let status = match waited {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                return Err(MeasurementError::process_failed(format!(
                    "waiting for speedtest: {e}"
                ))
                .with_output(&stdout, &stderr));
            }
            Err(_) => {
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "failed to kill timed out speedtest");
                }
                return Err(MeasurementError::timed_out("deadline exceeded")
                    .with_output(&stdout, &stderr));
            }
        };

        if !status.success() {
            return Err(
                MeasurementError::process_failed(status.to_string()).with_output(&stdout, &stderr)
            );
        }

        MeasurementResult::parse(&stdout).map_err(|e| e.with_output(&stdout, &stderr))
    }
}

impl Measurement for SpeedtestCommand {
    fn invoke(
        &self,
        deadline: Instant,
    ) -> impl Future<Output = Result<MeasurementResult, MeasurementError>> + Send {
        self.run(deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use std::time::Duration;

    const FIXTURE: &str = r#"{"ping":{"latency":14.2,"jitter":1.1},"download":{"bandwidth":12500000,"bytes":1,"elapsed":1},"upload":{"bandwidth":1250000,"bytes":1,"elapsed":1},"packetLoss":0.5,"isp":"Acme","interface":{"name":"eth0","externalIp":"203.0.113.7"},"error":""}"#;

    /// Writes an executable shell script standing in for the tool.
    fn fake_tool(dir: &Path, body: &str) -> String {
        let path = dir.join("speedtest");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "#!/bin/sh").unwrap();
        writeln!(f, "{body}").unwrap();
        drop(f);
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn deadline_in(d: Duration) -> Instant {
        Instant::now() + d
    }

    #[test]
    fn args_include_optional_selectors() {
        let cmd = SpeedtestCommand::default();
        assert_eq!(
            cmd.args(),
            ["-f", "json", "--accept-license", "--accept-gdpr"]
        );

        let cmd = SpeedtestCommand::new("/opt/speedtest")
            .with_interface("wlan0")
            .with_server_id("4242");
        assert_eq!(cmd.program(), "/opt/speedtest");
        let args = cmd.args();
        assert!(args.contains(&"--interface=wlan0".to_string()));
        assert!(args.contains(&"--server-id=4242".to_string()));
    }

    #[tokio::test]
    async fn successful_run_is_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(dir.path(), &format!("echo '{FIXTURE}'"));

        let r = SpeedtestCommand::new(tool)
            .invoke(deadline_in(Duration::from_secs(10)))
            .await
            .unwrap();
        assert_eq!(r.download.bandwidth, 12_500_000.0);
        assert_eq!(r.isp, "Acme");
    }

    #[tokio::test]
    async fn tool_receives_selector_flags() {
        let dir = tempfile::tempdir().unwrap();
        let args_file = dir.path().join("args");
        let tool = fake_tool(
            dir.path(),
            &format!("echo \"$@\" > {}\necho '{FIXTURE}'", args_file.display()),
        );

        SpeedtestCommand::new(tool)
            .with_interface("eth1")
            .with_server_id("99")
            .invoke(deadline_in(Duration::from_secs(10)))
            .await
            .unwrap();

        let args = std::fs::read_to_string(args_file).unwrap();
        assert_eq!(
            args.trim(),
            "-f json --accept-license --accept-gdpr --interface=eth1 --server-id=99"
        );
    }

    #[tokio::test]
    async fn nonzero_exit_is_process_failure_with_output() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(dir.path(), "echo 'some output'\necho 'no route' >&2\nexit 3");

        let err = SpeedtestCommand::new(tool)
            .invoke(deadline_in(Duration::from_secs(10)))
            .await
            .unwrap_err();
        assert_eq!(err.kind, MeasurementErrorKind::ProcessFailed);
        assert!(err.stderr.contains("no route"));
        assert!(err.stdout.contains("some output"));
    }

    #[tokio::test]
    async fn missing_binary_is_process_failure() {
        let err = SpeedtestCommand::new("/nonexistent/speedtest-12345")
            .invoke(deadline_in(Duration::from_secs(10)))
            .await
            .unwrap_err();
        assert_eq!(err.kind, MeasurementErrorKind::ProcessFailed);
        assert!(err.message.contains("failed to start"));
    }

    #[tokio::test]
    async fn garbage_output_is_parse_failure() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(dir.path(), "echo 'Speedtest by Ookla'");

        let err = SpeedtestCommand::new(tool)
            .invoke(deadline_in(Duration::from_secs(10)))
            .await
            .unwrap_err();
        assert_eq!(err.kind, MeasurementErrorKind::ParseFailed);
        assert!(err.stdout.contains("Speedtest by Ookla"));
    }

    #[tokio::test]
    async fn embedded_error_with_zero_exit_is_semantic_failure() {
        let dir = tempfile::tempdir().unwrap();
        let doc = r#"{"ping":{"latency":0},"download":{"bandwidth":0},"upload":{"bandwidth":0},"error":"Cannot open socket"}"#;
        let tool = fake_tool(dir.path(), &format!("echo '{doc}'"));

        let err = SpeedtestCommand::new(tool)
            .invoke(deadline_in(Duration::from_secs(10)))
            .await
            .unwrap_err();
        assert_eq!(err.kind, MeasurementErrorKind::SemanticError);
        assert_eq!(err.message, "Cannot open socket");
    }

    #[tokio::test]
    async fn bare_error_document_is_semantic_failure() {
        let dir = tempfile::tempdir().unwrap();
        let doc = r#"{"type":"log","error":"Configuration - Could not retrieve or read configuration"}"#;
        let tool = fake_tool(dir.path(), &format!("echo '{doc}'"));

        let err = SpeedtestCommand::new(tool)
            .invoke(deadline_in(Duration::from_secs(10)))
            .await
            .unwrap_err();
        assert_eq!(err.kind, MeasurementErrorKind::SemanticError);
        assert!(err.message.starts_with("Configuration"));
        assert!(err.stdout.contains("\"type\":\"log\""));
    }

    #[tokio::test]
    async fn slow_tool_is_killed_at_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(dir.path(), "echo started\nexec sleep 30");

        let timeout = Duration::from_millis(300);
        let t0 = std::time::Instant::now();
        let err = SpeedtestCommand::new(tool)
            .invoke(deadline_in(timeout))
            .await
            .unwrap_err();
        let took = t0.elapsed();

        assert_eq!(err.kind, MeasurementErrorKind::TimedOut);
        assert!(took < timeout + Duration::from_secs(2), "took {took:?}");
    }
}
