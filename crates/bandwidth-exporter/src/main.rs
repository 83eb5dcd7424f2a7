mod auth;
mod handlers;
mod state;

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::task::JoinError;
use tower_http::compression::CompressionLayer;
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

use bandwidth_core::fmt::{format_bits_rate, format_duration};
use bandwidth_core::metrics::DEFAULT_NAMESPACE;
use bandwidth_core::scheduler::DEFAULT_STARTUP_ATTEMPTS;
use bandwidth_core::util::parse_duration;
use bandwidth_core::{
    ExporterConfig, MetricsRegistry, Scheduler, SchedulerConfig, SchedulerError, SpeedtestCommand,
};

use auth::Credentials;

// ============================================================
// CLI
// ============================================================

#[derive(Parser, Debug)]
#[command(
    name = "bandwidth-exporter",
    about = "Runs periodic speed tests and exposes the results as Prometheus metrics",
    version = bandwidth_core::VERSION
)]
struct Args {
    /// Time between measurements (e.g. 900, 15m, 1h30m).
    #[arg(long, default_value = "15m", value_parser = parse_duration, env = "BANDWIDTH_INTERVAL")]
    interval: Duration,

    /// Listen address of the metrics endpoint.
    #[arg(long, default_value = "0.0.0.0:9516", env = "BANDWIDTH_LISTEN")]
    listen: SocketAddr,

    /// Expected download rate in bits/s, exported as a baseline.
    #[arg(long, env = "BANDWIDTH_EXPECT_DOWNLOAD")]
    expect_download: Option<f64>,

    /// Expected upload rate in bits/s, exported as a baseline.
    #[arg(long, env = "BANDWIDTH_EXPECT_UPLOAD")]
    expect_upload: Option<f64>,

    /// Network interface the measurement runs over.
    #[arg(long, env = "BANDWIDTH_INTERFACE")]
    interface: Option<String>,

    /// Measurement server to use instead of the closest one.
    #[arg(long, env = "BANDWIDTH_SERVER_ID")]
    server_id: Option<String>,

    /// Path or name of the speedtest binary.
    #[arg(long, default_value = "speedtest", env = "BANDWIDTH_SPEEDTEST_BIN")]
    speedtest_bin: String,

    /// Upper bound of the per-measurement timeout.
    #[arg(long, default_value = "5m", value_parser = parse_duration, env = "BANDWIDTH_MAX_TIMEOUT")]
    max_timeout: Duration,

    /// Attempts allowed for the first measurement before giving up.
    #[arg(long, default_value_t = DEFAULT_STARTUP_ATTEMPTS, env = "BANDWIDTH_STARTUP_ATTEMPTS")]
    startup_attempts: u32,

    /// Prefix of every exported metric name.
    #[arg(long, default_value = DEFAULT_NAMESPACE, env = "BANDWIDTH_NAMESPACE")]
    namespace: String,

    /// Basic Auth username. If set, --auth-password is also required.
    #[arg(long, env = "BANDWIDTH_AUTH_USER")]
    auth_user: Option<String>,

    /// Basic Auth password.
    #[arg(long, env = "BANDWIDTH_AUTH_PASSWORD")]
    auth_password: Option<String>,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

// ============================================================
// Errors
// ============================================================

#[derive(Debug)]
enum AppError {
    Config(String),
    Registry(prometheus::Error),
    Runtime(io::Error),
    Transport(io::Error),
    Startup(SchedulerError),
    Task(JoinError),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(msg) => write!(f, "invalid configuration: {msg}"),
            AppError::Registry(e) => write!(f, "metrics registry: {e}"),
            AppError::Runtime(e) => write!(f, "failed to build tokio runtime: {e}"),
            AppError::Transport(e) => write!(f, "http server: {e}"),
            AppError::Startup(e) => write!(f, "{e}"),
            AppError::Task(e) => write!(f, "scheduler task: {e}"),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Config(_) => None,
            AppError::Registry(e) => Some(e),
            AppError::Runtime(e) | AppError::Transport(e) => Some(e),
            AppError::Startup(e) => Some(e),
            AppError::Task(e) => Some(e),
        }
    }
}

impl From<prometheus::Error> for AppError {
    fn from(e: prometheus::Error) -> Self {
        AppError::Registry(e)
    }
}

impl From<SchedulerError> for AppError {
    fn from(e: SchedulerError) -> Self {
        AppError::Startup(e)
    }
}

// ============================================================
// Configuration
// ============================================================

/// Longest accepted `--interval` and `--max-timeout`.
const MAX_DURATION: Duration = Duration::from_secs(365 * 24 * 3600);

/// Validated runtime configuration.
struct Settings {
    listen: SocketAddr,
    namespace: String,
    command: SpeedtestCommand,
    exporter: ExporterConfig,
    scheduler: SchedulerConfig,
    credentials: Option<Arc<Credentials>>,
}

impl Settings {
    fn from_args(args: Args) -> Result<Self, AppError> {
        if args.interval.is_zero() {
            return Err(AppError::Config("--interval must be greater than zero".into()));
        }
        if args.max_timeout.is_zero() {
            return Err(AppError::Config("--max-timeout must be greater than zero".into()));
        }
        for (flag, value) in [
            ("--interval", args.interval),
            ("--max-timeout", args.max_timeout),
        ] {
            if value > MAX_DURATION {
                return Err(AppError::Config(format!(
                    "{flag} must not exceed {}",
                    format_duration(MAX_DURATION)
                )));
            }
        }
        if args.startup_attempts == 0 {
            return Err(AppError::Config("--startup-attempts must be at least 1".into()));
        }
        for (flag, value) in [
            ("--expect-download", args.expect_download),
            ("--expect-upload", args.expect_upload),
        ] {
            if value.is_some_and(|v| !v.is_finite() || v < 0.0) {
                return Err(AppError::Config(format!("{flag} must be a non-negative rate")));
            }
        }

        let credentials = match (args.auth_user, args.auth_password) {
            (Some(user), Some(password)) => Some(Arc::new(Credentials { user, password })),
            (None, None) => None,
            _ => {
                return Err(AppError::Config(
                    "--auth-user and --auth-password must both be set".into(),
                ));
            }
        };

        let mut command = SpeedtestCommand::new(args.speedtest_bin);
        if let Some(interface) = args.interface {
            command = command.with_interface(interface);
        }
        if let Some(server_id) = args.server_id {
            command = command.with_server_id(server_id);
        }

        Ok(Self {
            listen: args.listen,
            namespace: args.namespace,
            command,
            exporter: ExporterConfig::new(args.expect_download, args.expect_upload),
            scheduler: SchedulerConfig {
                interval: args.interval,
                max_timeout: args.max_timeout,
                startup_attempts: args.startup_attempts,
            },
            credentials,
        })
    }
}

/// Initializes the tracing subscriber with the appropriate log level.
/// RUST_LOG, when set, takes precedence over -v/-q.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("bandwidth_exporter={level},bandwidth_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

// ============================================================
// Main
// ============================================================

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), AppError> {
    let settings = Settings::from_args(args)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(AppError::Runtime)?
        .block_on(async_main(settings))
}

async fn async_main(settings: Settings) -> Result<(), AppError> {
    let metrics = Arc::new(MetricsRegistry::new(&settings.namespace)?);

    let scheduler = Scheduler::new(
        settings.command,
        settings.exporter,
        &metrics,
        settings.scheduler,
    );
    info!(
        version = bandwidth_core::VERSION,
        interval = %format_duration(settings.scheduler.interval),
        timeout = %format_duration(scheduler.timeout()),
        startup_attempts = settings.scheduler.startup_attempts,
        namespace = %settings.namespace,
        "starting"
    );
    if let Some(rate) = settings.exporter.expected_download {
        info!(expected = %format_bits_rate(rate), "download baseline");
    }
    if let Some(rate) = settings.exporter.expected_upload {
        info!(expected = %format_bits_rate(rate), "upload baseline");
    }
    if settings.credentials.is_some() {
        info!("basic auth enabled");
    }

    let listener = tokio::net::TcpListener::bind(settings.listen)
        .await
        .map_err(AppError::Transport)?;
    info!(addr = %settings.listen, "listening");

    let mut collector = tokio::spawn(scheduler.run());

    let app = handlers::router(metrics, settings.credentials)
        .layer(CompressionLayer::new())
        .into_make_service_with_connect_info::<SocketAddr>();
    let server = async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
    };

    let result = tokio::select! {
        served = server => served.map_err(AppError::Transport),
        joined = &mut collector => match joined {
            Ok(Err(e)) => Err(AppError::Startup(e)),
            Ok(Ok(never)) => match never {},
            Err(e) => Err(AppError::Task(e)),
        },
    };

    // Dropping the task kills an in-flight measurement.
    collector.abort();
    if result.is_ok() {
        info!("shut down");
    }
    result
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received interrupt, shutting down"),
        Err(e) => error!(error = %e, "failed to listen for interrupt"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["bandwidth-exporter"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    fn config_error(extra: &[&str]) -> String {
        match Settings::from_args(parse(extra)) {
            Err(AppError::Config(msg)) => msg,
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("configuration was accepted"),
        }
    }

    #[test]
    fn defaults() {
        let settings = Settings::from_args(parse(&[])).unwrap();
        assert_eq!(settings.scheduler.interval, Duration::from_secs(900));
        assert_eq!(settings.scheduler.max_timeout, Duration::from_secs(300));
        assert_eq!(settings.scheduler.startup_attempts, 6);
        assert_eq!(settings.listen.port(), 9516);
        assert_eq!(settings.namespace, "bandwidth");
        assert_eq!(settings.command.program(), "speedtest");
        assert!(settings.credentials.is_none());
    }

    #[test]
    fn flags_reach_the_command_and_exporter() {
        let settings = Settings::from_args(parse(&[
            "--interval",
            "1h30m",
            "--interface",
            "eth1",
            "--server-id",
            "4242",
            "--expect-download",
            "500000000",
            "--expect-upload",
            "0",
        ]))
        .unwrap();
        assert_eq!(settings.scheduler.interval, Duration::from_secs(5400));
        let args = settings.command.args();
        assert!(args.contains(&"--interface=eth1".to_string()));
        assert!(args.contains(&"--server-id=4242".to_string()));
        assert_eq!(settings.exporter.expected_download, Some(5e8));
        assert_eq!(settings.exporter.expected_upload, None);
    }

    #[test]
    fn rejects_invalid_combinations() {
        assert!(config_error(&["--interval", "0"]).contains("--interval"));
        assert!(config_error(&["--startup-attempts", "0"]).contains("--startup-attempts"));
        assert!(config_error(&["--auth-user", "prom"]).contains("--auth-password"));
        assert!(config_error(&["--expect-upload=-1"]).contains("--expect-upload"));
        assert!(config_error(&["--interval", "400d"]).contains("--interval"));
        assert!(config_error(&["--max-timeout", "18446744073709551615s"]).contains("--max-timeout"));
    }

    #[test]
    fn unparsable_duration_is_a_usage_error() {
        assert!(Args::try_parse_from(["bandwidth-exporter", "--interval", "15x"]).is_err());
        let overflow = ["bandwidth-exporter", "--interval", "18446744073709551615s1s"];
        assert!(Args::try_parse_from(overflow).is_err());
    }

    #[test]
    fn auth_pair_builds_credentials() {
        let settings =
            Settings::from_args(parse(&["--auth-user", "prom", "--auth-password", "pw"])).unwrap();
        let creds = settings.credentials.unwrap();
        assert_eq!(creds.user, "prom");
        assert_eq!(creds.password, "pw");
    }
}
