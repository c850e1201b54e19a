//! Sensor Reporter - resident telemetry agent
//!
//! Samples an environmental sensor and submits every reading to a remote
//! collector, riding out network outages without flooding its log.
//!
//! ## Features
//!
//! - Connectivity gating with a bounded-timeout probe
//! - Authenticated form POST of each reading
//! - Periodic remote retention trim
//! - Deduplicated durable log
//! - Graceful shutdown on SIGINT and SIGTERM
//!
//! ## Configuration
//!
//! - `SENSOR_REPORTER_CONFIG`: TOML config file (default: reporter.toml)
//! - `SENSOR_REPORTER_REQUEST_TIMEOUT_SECS`: submit/trim timeout (default: 10)
//! - `SENSOR_REPORTER_PROBE_TIMEOUT_MS`: probe timeout (default: 1000)
//! - `SENSOR_REPORTER_TRIM_THRESHOLD`: cycles between trims (default: 100)
//! - `SENSOR_REPORTER_POLL_INTERVAL_MS`: pause after a failed probe or a
//!   collector failure (default: 0)
//! - `SENSOR_REPORTER_REPORT_INTERVAL_MS`: pause between readings (default: 0)
//! - `RUST_LOG`: console logging filter (default: info)
//!
//! ## Exit codes
//!
//! - `0`: stopped by SIGINT or SIGTERM
//! - `1`: startup failure
//! - `2`: the collector rejected the key

use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use sensor_reporter::client::CollectorClient;
use sensor_reporter::config::Config;
use sensor_reporter::connectivity::ConnectivityProbe;
use sensor_reporter::dedup_log::{DedupLogger, LogLevel};
use sensor_reporter::exit_code;
use sensor_reporter::reporting::{LoopSettings, ReportingLoop};
use sensor_reporter::sensor::{SensorReader, SimulatedDriver};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Initialize tracing subscriber with environment filter
    init_tracing();

    info!("Starting sensor reporter...");

    let config = match Config::load() {
        Ok(config) => {
            info!(
                submit_url = %config.submit_url,
                trim_url = %config.trim_url,
                probe_url = %config.probe_url,
                log_path = %config.log_path.display(),
                trim_threshold = config.trim_threshold,
                "Configuration loaded"
            );
            config
        }
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            std::process::exit(exit_code::STARTUP_FAILURE);
        }
    };

    let mut log = match DedupLogger::open(&config.log_path) {
        Ok(log) => log,
        Err(e) => {
            warn!(
                error = %e,
                path = %config.log_path.display(),
                "Cannot open durable log, writing it to stderr instead"
            );
            DedupLogger::new(Box::new(std::io::stderr()))
        }
    };

    log.log("New run starting...", LogLevel::Info);
    log.log("Program started", LogLevel::Info);

    let probe = match ConnectivityProbe::new(&config) {
        Ok(probe) => {
            info!(target_url = %probe.target(), "Connectivity probe initialized");
            probe
        }
        Err(e) => {
            error!(error = %e, "Failed to create connectivity probe");
            std::process::exit(exit_code::STARTUP_FAILURE);
        }
    };

    let collector = match CollectorClient::new(&config) {
        Ok(collector) => {
            info!(
                submit_url = %collector.submit_url(),
                trim_url = %collector.trim_url(),
                timeout_secs = collector.timeout().as_secs(),
                "HTTP client initialized"
            );
            collector
        }
        Err(e) => {
            error!(error = %e, "Failed to create HTTP client");
            std::process::exit(exit_code::STARTUP_FAILURE);
        }
    };

    let reader =
        SensorReader::with_calibration(SimulatedDriver::with_defaults(), config.calibration_offset);
    debug!(calibration_offset = reader.calibration_offset(), "Sensor reader ready");

    let mut reporting = ReportingLoop::new(
        probe,
        reader,
        collector,
        log,
        LoopSettings::from(&config),
    );

    info!("Sensor reporter running. Press Ctrl+C to stop.");

    let fatal = tokio::select! {
        fatal = reporting.run() => Some(fatal),
        () = shutdown_signal() => None,
    };

    let stats = reporting.stats().clone();
    info!(
        probes = stats.probes,
        cycles = stats.cycles,
        accepted = stats.accepted,
        trims = stats.trims,
        disconnections = stats.disconnections,
        driver_failures = stats.driver_failures,
        "Loop statistics"
    );

    match fatal {
        Some(fatal) => {
            error!(reason = %fatal, "Authentication rejected, exiting");
            std::process::exit(exit_code::AUTH_REJECTED);
        }
        None => {
            reporting.log_mut().log("Program stopped", LogLevel::Info);
            info!("Sensor reporter stopped");
            std::process::exit(exit_code::CLEAN);
        }
    }
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

/// Resolves on SIGINT or SIGTERM. A handler that cannot be installed is
/// logged and never fires; the other one still does.
async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, stopping..."),
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGINT");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received SIGTERM, stopping...");
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
