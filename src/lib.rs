//! Sensor Reporter Library
//!
//! Components of a resident telemetry agent that samples an environmental
//! sensor and reports readings to a remote collector over HTTP:
//!
//! - **config**: TOML file plus environment overrides
//! - **dedup_log**: durable log that suppresses immediate repeats
//! - **connectivity**: bounded-timeout reachability probe
//! - **sensor**: driver abstraction, calibration, simulated driver
//! - **client**: authenticated submit and trim requests to the collector
//! - **reporting**: the offline / online state machine tying it together
//!
//! # Example
//!
//! ```no_run
//! use sensor_reporter::client::CollectorClient;
//! use sensor_reporter::config::Config;
//! use sensor_reporter::connectivity::ConnectivityProbe;
//! use sensor_reporter::dedup_log::DedupLogger;
//! use sensor_reporter::reporting::{LoopSettings, ReportingLoop};
//! use sensor_reporter::sensor::{SensorReader, SimulatedDriver};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let config = Config::load().expect("Failed to load config");
//!
//!     let reader =
//!         SensorReader::with_calibration(SimulatedDriver::with_defaults(), config.calibration_offset);
//!
//!     let mut reporting = ReportingLoop::new(
//!         ConnectivityProbe::new(&config).expect("Failed to create probe"),
//!         reader,
//!         CollectorClient::new(&config).expect("Failed to create client"),
//!         DedupLogger::open(&config.log_path).expect("Failed to open log"),
//!         LoopSettings::from(&config),
//!     );
//!
//!     let fatal = reporting.run().await;
//!     eprintln!("stopped: {}", fatal);
//! }
//! ```

// Module declarations
pub mod client;
pub mod config;
pub mod connectivity;
pub mod dedup_log;
pub mod reporting;
pub mod sensor;

// Re-export commonly used types at crate root for convenience
pub use client::{ClientError, Collector, CollectorClient, SubmitResult, TrimResult};
pub use config::{Config, ConfigError, Credential};
pub use connectivity::{Connectivity, ConnectivityProbe};
pub use dedup_log::{DedupLogger, LogLevel};
pub use reporting::{Fatal, LoopSettings, LoopState, LoopStats, ReportingLoop, Step};
pub use sensor::{
    DriverError, RawReading, ReadingSnapshot, SensorDriver, SensorReader, SimulatedDriver,
    SimulationConfig,
};

/// Process exit codes.
pub mod exit_code {
    /// Stopped by a signal.
    pub const CLEAN: i32 = 0;

    /// Configuration or client setup failed before the loop started.
    pub const STARTUP_FAILURE: i32 = 1;

    /// The collector rejected the credential.
    pub const AUTH_REJECTED: i32 = 2;
}
