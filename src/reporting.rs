//! The reporting loop.
//!
//! Two states drive the agent:
//!
//! - **Offline**: probe connectivity on every step until the network answers.
//! - **OnlineReporting**: read the sensor, submit the reading, and once the
//!   cycle counter passes the trim threshold ask the collector to trim.
//!
//! A transport failure while online drops back to `Offline`. An
//! authentication rejection from either endpoint is the only fatal outcome;
//! it is returned to the caller, which decides how to end the process.

use std::time::Duration;

use tracing::{debug, warn};

use crate::client::{Collector, SubmitResult, TrimResult};
use crate::config::Config;
use crate::connectivity::Connectivity;
use crate::dedup_log::{DedupLogger, LogLevel};
use crate::sensor::{SensorDriver, SensorReader};

/// Where the loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Offline,
    OnlineReporting,
}

/// Unrecoverable outcome: the collector refused our credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fatal {
    SubmitAuthRejected,
    TrimAuthRejected,
}

impl std::fmt::Display for Fatal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Fatal::SubmitAuthRejected => write!(f, "collector rejected the key on submit"),
            Fatal::TrimAuthRejected => write!(f, "collector rejected the key on trim"),
        }
    }
}

/// Result of a single [`ReportingLoop::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Fatal(Fatal),
}

/// Timing knobs of the loop.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    /// A trim is requested once the cycle counter exceeds this value
    pub trim_threshold: u32,

    /// Pause after a failed probe and after falling back to `Offline`;
    /// zero means probe again immediately
    pub poll_interval: Duration,

    /// Pause after an accepted reading
    pub report_interval: Duration,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for LoopSettings {
    fn from(config: &Config) -> Self {
        Self {
            trim_threshold: config.trim_threshold,
            poll_interval: config.poll_interval,
            report_interval: config.report_interval,
        }
    }
}

/// Counters describing what the loop has done since start.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopStats {
    /// Connectivity probes performed
    pub probes: u64,

    /// Reporting cycles started
    pub cycles: u64,

    /// Readings accepted by the collector
    pub accepted: u64,

    /// Successful trims
    pub trims: u64,

    /// Times the loop fell back to `Offline`
    pub disconnections: u64,

    /// Sensor reads that failed
    pub driver_failures: u64,
}

/// Orchestrates probe, sensor, collector and durable log.
pub struct ReportingLoop<P, D, C> {
    probe: P,
    reader: SensorReader<D>,
    collector: C,
    log: DedupLogger,
    settings: LoopSettings,
    state: LoopState,
    counter: u32,
    stats: LoopStats,
}

impl<P, D, C> ReportingLoop<P, D, C>
where
    P: Connectivity,
    D: SensorDriver,
    C: Collector,
{
    pub fn new(
        probe: P,
        reader: SensorReader<D>,
        collector: C,
        log: DedupLogger,
        settings: LoopSettings,
    ) -> Self {
        Self {
            probe,
            reader,
            collector,
            log,
            settings,
            state: LoopState::Offline,
            counter: 0,
            stats: LoopStats::default(),
        }
    }

    /// Run until the collector rejects the credential.
    ///
    /// There is no other way out: outages and unexpected replies only move
    /// the loop back to probing.
    pub async fn run(&mut self) -> Fatal {
        loop {
            if let Step::Fatal(fatal) = self.step().await {
                return fatal;
            }
        }
    }

    /// Perform one iteration: a probe when offline, a reporting cycle when
    /// online.
    pub async fn step(&mut self) -> Step {
        match self.state {
            LoopState::Offline => {
                self.probe_once().await;
                Step::Continue
            }
            LoopState::OnlineReporting => self.report_once().await,
        }
    }

    async fn probe_once(&mut self) {
        self.stats.probes += 1;

        if self.probe.is_online(&mut self.log).await {
            debug!(counter = self.counter, "Connectivity restored");
            self.state = LoopState::OnlineReporting;
        } else {
            pause(self.settings.poll_interval).await;
        }
    }

    async fn report_once(&mut self) -> Step {
        self.counter = self.counter.saturating_add(1);
        self.stats.cycles += 1;

        let reading = match self.reader.read() {
            Ok(reading) => reading,
            Err(e) => {
                // the sensor is independent of the network: skip, stay online
                self.stats.driver_failures += 1;
                self.log.log(format!("Sensor read failed: {}", e), LogLevel::Error);
                return Step::Continue;
            }
        };

        match self.collector.submit(&reading, &mut self.log).await {
            SubmitResult::Accepted => self.stats.accepted += 1,
            SubmitResult::TransportFailed => {
                self.go_offline().await;
                return Step::Continue;
            }
            SubmitResult::AuthRejected => return Step::Fatal(Fatal::SubmitAuthRejected),
        }

        if self.counter > self.settings.trim_threshold {
            match self.collector.trim(&mut self.log).await {
                TrimResult::Trimmed => {
                    self.stats.trims += 1;
                    self.counter = 0;
                }
                TrimResult::TransportFailed => {
                    self.go_offline().await;
                    return Step::Continue;
                }
                TrimResult::AuthRejected => return Step::Fatal(Fatal::TrimAuthRejected),
            }
        }

        pause(self.settings.report_interval).await;

        Step::Continue
    }

    /// The cycle counter survives the transition. Waits `poll_interval`
    /// before the next probe, like a failed probe does.
    async fn go_offline(&mut self) {
        warn!(counter = self.counter, "Collector unreachable, back to probing");
        self.stats.disconnections += 1;
        self.state = LoopState::Offline;
        pause(self.settings.poll_interval).await;
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Reporting cycles since the last successful trim.
    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    /// Durable log, for lines written outside the loop (startup, shutdown).
    pub fn log_mut(&mut self) -> &mut DedupLogger {
        &mut self.log
    }
}

async fn pause(interval: Duration) {
    if !interval.is_zero() {
        tokio::time::sleep(interval).await;
    }
}
