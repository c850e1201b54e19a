//! Durable, deduplicating log sink.
//!
//! Every component of the agent reports through a [`DedupLogger`]. A message
//! identical to the one emitted immediately before it is dropped, so a
//! sustained outage produces a single line instead of one per loop iteration.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use chrono::Local;
use tracing::{error, info, warn};

/// Timestamp layout of the durable log, e.g. `16-10-2026 14:03:59`.
const TIMESTAMP_FORMAT: &str = "%d-%m-%Y %H:%M:%S";

/// Severity levels accepted by the durable log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // `pad` so width specifiers in the line format apply
        f.pad(self.as_str())
    }
}

/// Append-only log that suppresses immediate repeats.
///
/// The suppression state (the last emitted message) belongs to the logger
/// instance, so independent loggers never interfere with each other.
///
/// # Example
///
/// ```
/// use sensor_reporter::dedup_log::{DedupLogger, LogLevel};
///
/// let mut log = DedupLogger::new(Box::new(std::io::sink()));
///
/// assert!(log.log("OFFLINE", LogLevel::Warning));
/// assert!(!log.log("OFFLINE", LogLevel::Warning));
/// assert!(log.log("Internet is on", LogLevel::Info));
/// ```
pub struct DedupLogger {
    sink: Box<dyn Write + Send>,
    last: Option<String>,
}

impl DedupLogger {
    /// Create a logger writing to an arbitrary sink.
    pub fn new(sink: Box<dyn Write + Send>) -> Self {
        Self { sink, last: None }
    }

    /// Open (or create) `path` in append mode.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the file cannot be opened for appending.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file: File = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        Ok(Self::new(Box::new(file)))
    }

    /// Log `message` at `level` unless it repeats the previous message.
    ///
    /// Returns `true` when a line was emitted. Sink failures are reported on
    /// stderr and otherwise swallowed; the suppression state is still
    /// updated so a broken sink does not cause a storm of stderr output.
    pub fn log(&mut self, message: impl AsRef<str>, level: LogLevel) -> bool {
        let message = message.as_ref();

        if self.last.as_deref() == Some(message) {
            return false;
        }

        mirror_to_tracing(message, level);

        let timestamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
        let written = writeln!(self.sink, "{:<21} {:<8} {}", timestamp, level, message)
            .and_then(|()| self.sink.flush());

        if let Err(e) = written {
            eprintln!("sensor-reporter: durable log write failed: {e}; message was: {message}");
        }

        self.last = Some(message.to_string());
        true
    }

    /// Overwrite the suppression state without emitting anything.
    ///
    /// Used when a caller emits several related lines but wants a later
    /// repeat of the *first* one to be suppressed.
    pub fn force_last(&mut self, message: impl Into<String>) {
        self.last = Some(message.into());
    }

    /// The most recently emitted (or forced) message.
    pub fn last_message(&self) -> Option<&str> {
        self.last.as_deref()
    }
}

impl std::fmt::Debug for DedupLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupLogger")
            .field("last", &self.last)
            .finish_non_exhaustive()
    }
}

fn mirror_to_tracing(message: &str, level: LogLevel) {
    match level {
        LogLevel::Info => info!(target: "durable", "{}", message),
        LogLevel::Warning => warn!(target: "durable", "{}", message),
        LogLevel::Error => error!(target: "durable", "{}", message),
        LogLevel::Critical => error!(target: "durable", critical = true, "{}", message),
    }
}
