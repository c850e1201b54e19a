//! Configuration module for the sensor reporter.
//!
//! Settings come from two places: a TOML file holding the collector
//! credential and endpoints, and environment variables tuning timeouts and
//! loop cadence.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::sensor::DEFAULT_CALIBRATION_OFFSET;

/// Config file read when `SENSOR_REPORTER_CONFIG` is unset
const DEFAULT_CONFIG_PATH: &str = "reporter.toml";

/// Default reading submission endpoint
const DEFAULT_SUBMIT_URL: &str = "http://localhost/php/data_receiver.php";

/// Default retention trim endpoint
const DEFAULT_TRIM_URL: &str = "http://localhost/php/db_cleaner.php";

/// Default connectivity probe target
const DEFAULT_PROBE_URL: &str = "https://www.google.com";

/// The collector answers 403 to requests without a browser-like user agent
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_11_5) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/50.0.2661.102 Safari/537.36";

/// Default durable log location
const DEFAULT_LOG_PATH: &str = "error.log";

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const MAX_REQUEST_TIMEOUT_SECS: u64 = 120;

const DEFAULT_PROBE_TIMEOUT_MS: u64 = 1_000;

/// The probe must stay cheap: it runs on every offline iteration
const MAX_PROBE_TIMEOUT_MS: u64 = 1_000;

const DEFAULT_TRIM_THRESHOLD: u32 = 100;

const DEFAULT_POLL_INTERVAL_MS: u64 = 0;
const MAX_POLL_INTERVAL_MS: u64 = 60_000;

const DEFAULT_REPORT_INTERVAL_MS: u64 = 0;
const MAX_REPORT_INTERVAL_MS: u64 = 3_600_000;

/// Opaque client token sent with every collector request.
///
/// `Debug` never prints the token itself.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Configuration for the sensor reporter.
#[derive(Debug, Clone)]
pub struct Config {
    /// Token authenticating this device to the collector
    pub credential: Credential,

    /// URL receiving reading submissions
    pub submit_url: String,

    /// URL receiving retention trim requests
    pub trim_url: String,

    /// `User-Agent` header sent to the collector
    pub user_agent: String,

    /// URL used as the connectivity probe target
    pub probe_url: String,

    /// Path of the durable log file
    pub log_path: PathBuf,

    /// Temperature correction added to every raw reading
    pub calibration_offset: f64,

    /// Timeout for submit and trim requests
    pub request_timeout: Duration,

    /// Timeout for a single connectivity probe
    pub probe_timeout: Duration,

    /// A trim is requested once the cycle counter exceeds this value
    pub trim_threshold: u32,

    /// Pause after a failed connectivity probe or a collector failure
    pub poll_interval: Duration,

    /// Pause after each accepted reading
    pub report_interval: Duration,
}

/// Error type for configuration loading failures
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source_name: Option<String>,
}

impl ConfigError {
    fn new(message: impl Into<String>, source_name: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source_name: Some(source_name.into()),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.source_name {
            Some(name) => write!(f, "Configuration error for {}: {}", name, self.message),
            None => write!(f, "Configuration error: {}", self.message),
        }
    }
}

impl std::error::Error for ConfigError {}

/// On-disk layout of the config file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    collector: CollectorSection,
    #[serde(default)]
    probe: ProbeSection,
    #[serde(default)]
    sensor: SensorSection,
    #[serde(default)]
    log: LogSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct CollectorSection {
    key: String,
    submit_url: Option<String>,
    trim_url: Option<String>,
    user_agent: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProbeSection {
    url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SensorSection {
    calibration_offset: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LogSection {
    path: Option<PathBuf>,
}

impl Config {
    /// Load the config file named by `SENSOR_REPORTER_CONFIG` (default
    /// `reporter.toml`) and apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file is missing or malformed, the
    /// credential is empty, or an override is out of range.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use sensor_reporter::config::Config;
    ///
    /// let config = Config::load().expect("Failed to load config");
    /// println!("Submitting to: {}", config.submit_url);
    /// ```
    pub fn load() -> Result<Self, ConfigError> {
        let path = env::var("SENSOR_REPORTER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

        let mut config = Self::from_file(&path)?;
        config.apply_overrides(|name| env::var(name).ok())?;
        Ok(config)
    }

    /// Read and parse a config file without looking at the environment.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::new(format!("cannot read file: {}", e), path.display().to_string())
        })?;

        Self::from_toml_str(&text)
            .map_err(|e| ConfigError::new(e.message, path.display().to_string()))
    }

    /// Parse config file contents.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let file: FileConfig = toml::from_str(text).map_err(|e| ConfigError {
            message: e.message().to_string(),
            source_name: None,
        })?;

        let key = file.collector.key.trim();
        if key.is_empty() {
            return Err(ConfigError {
                message: "collector key must not be empty".to_string(),
                source_name: None,
            });
        }

        let mut config = Self::default();
        config.credential = Credential::new(key);

        if let Some(url) = file.collector.submit_url {
            config.submit_url = url;
        }
        if let Some(url) = file.collector.trim_url {
            config.trim_url = url;
        }
        if let Some(agent) = file.collector.user_agent {
            config.user_agent = agent;
        }
        if let Some(url) = file.probe.url {
            config.probe_url = url;
        }
        if let Some(offset) = file.sensor.calibration_offset {
            config.calibration_offset = offset;
        }
        if let Some(path) = file.log.path {
            config.log_path = path;
        }

        Ok(config)
    }

    /// Apply tuning overrides looked up through `lookup`.
    ///
    /// `lookup` is `std::env::var` in production; tests pass a map.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(secs) = parse_bounded(
            &lookup,
            "SENSOR_REPORTER_REQUEST_TIMEOUT_SECS",
            1,
            MAX_REQUEST_TIMEOUT_SECS,
        )? {
            self.request_timeout = Duration::from_secs(secs);
        }

        if let Some(ms) = parse_bounded(
            &lookup,
            "SENSOR_REPORTER_PROBE_TIMEOUT_MS",
            1,
            MAX_PROBE_TIMEOUT_MS,
        )? {
            self.probe_timeout = Duration::from_millis(ms);
        }

        if let Some(threshold) = parse_bounded(
            &lookup,
            "SENSOR_REPORTER_TRIM_THRESHOLD",
            1,
            u32::MAX as u64,
        )? {
            self.trim_threshold = threshold as u32;
        }

        if let Some(ms) = parse_bounded(
            &lookup,
            "SENSOR_REPORTER_POLL_INTERVAL_MS",
            0,
            MAX_POLL_INTERVAL_MS,
        )? {
            self.poll_interval = Duration::from_millis(ms);
        }

        if let Some(ms) = parse_bounded(
            &lookup,
            "SENSOR_REPORTER_REPORT_INTERVAL_MS",
            0,
            MAX_REPORT_INTERVAL_MS,
        )? {
            self.report_interval = Duration::from_millis(ms);
        }

        Ok(())
    }
}

/// Parse an optional integer variable and check it against `[min, max]`.
fn parse_bounded<F>(lookup: &F, name: &str, min: u64, max: u64) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = lookup(name) else {
        return Ok(None);
    };

    let parsed: u64 = value
        .trim()
        .parse()
        .map_err(|_| ConfigError::new(format!("'{}' is not a valid number", value), name))?;

    if parsed < min {
        return Err(ConfigError::new(
            format!("{} is below minimum ({})", parsed, min),
            name,
        ));
    }

    if parsed > max {
        return Err(ConfigError::new(
            format!("{} exceeds maximum ({})", parsed, max),
            name,
        ));
    }

    Ok(Some(parsed))
}

impl Default for Config {
    /// Defaults for every setting; the credential is empty.
    ///
    /// This is useful for testing. Production code goes through [`Config::load`],
    /// which refuses an empty credential.
    fn default() -> Self {
        Self {
            credential: Credential::new(""),
            submit_url: DEFAULT_SUBMIT_URL.to_string(),
            trim_url: DEFAULT_TRIM_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            probe_url: DEFAULT_PROBE_URL.to_string(),
            log_path: PathBuf::from(DEFAULT_LOG_PATH),
            calibration_offset: DEFAULT_CALIBRATION_OFFSET,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            probe_timeout: Duration::from_millis(DEFAULT_PROBE_TIMEOUT_MS),
            trim_threshold: DEFAULT_TRIM_THRESHOLD,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            report_interval: Duration::from_millis(DEFAULT_REPORT_INTERVAL_MS),
        }
    }
}
