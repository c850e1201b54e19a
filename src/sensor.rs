//! Environmental sensor access.
//!
//! The physical driver lives behind [`SensorDriver`]; [`SensorReader`] turns
//! its raw output into calibrated [`ReadingSnapshot`]s. A [`SimulatedDriver`]
//! stands in for real hardware on development hosts.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Additive temperature correction applied to every raw reading (°C).
pub const DEFAULT_CALIBRATION_OFFSET: f64 = -1.5;

/// Number of decimal places kept for every reported value.
pub const ROUNDING_PRECISION: i32 = 2;

/// Uncalibrated values as delivered by the driver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawReading {
    pub temperature: f64,
    pub pressure: f64,
    pub humidity: f64,
}

/// One calibrated sample, ready to be submitted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReadingSnapshot {
    /// Calibrated temperature in °C
    pub temperature: f64,

    /// Pressure in millibar
    pub pressure: f64,

    /// Relative humidity in percent
    pub humidity: f64,
}

impl std::fmt::Display for ReadingSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Temperature: {}C | Pressure: {} millibars | Humidity: {}%",
            self.temperature, self.pressure, self.humidity
        )
    }
}

/// Failure reported by the sensor driver (bus error, missing device, ...).
#[derive(Debug)]
pub enum DriverError {
    /// The bus transaction failed
    Bus(String),

    /// The device answered with something that is not a measurement
    InvalidData(String),
}

impl std::fmt::Display for DriverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriverError::Bus(e) => write!(f, "sensor bus error: {}", e),
            DriverError::InvalidData(e) => write!(f, "invalid sensor data: {}", e),
        }
    }
}

impl std::error::Error for DriverError {}

/// A source of raw environmental readings.
pub trait SensorDriver {
    fn read_raw(&mut self) -> Result<RawReading, DriverError>;
}

/// Applies calibration and rounding on top of a [`SensorDriver`].
#[derive(Debug)]
pub struct SensorReader<D> {
    driver: D,
    calibration_offset: f64,
}

impl<D: SensorDriver> SensorReader<D> {
    pub fn new(driver: D) -> Self {
        Self::with_calibration(driver, DEFAULT_CALIBRATION_OFFSET)
    }

    pub fn with_calibration(driver: D, calibration_offset: f64) -> Self {
        Self {
            driver,
            calibration_offset,
        }
    }

    /// Take one calibrated sample.
    ///
    /// # Errors
    ///
    /// Propagates the driver's [`DriverError`] untouched.
    pub fn read(&mut self) -> Result<ReadingSnapshot, DriverError> {
        let raw = self.driver.read_raw()?;

        if !(raw.temperature.is_finite() && raw.pressure.is_finite() && raw.humidity.is_finite()) {
            return Err(DriverError::InvalidData(format!("{:?}", raw)));
        }

        Ok(ReadingSnapshot {
            temperature: round_to_precision(raw.temperature + self.calibration_offset),
            pressure: round_to_precision(raw.pressure),
            humidity: round_to_precision(raw.humidity),
        })
    }

    pub fn calibration_offset(&self) -> f64 {
        self.calibration_offset
    }
}

fn round_to_precision(value: f64) -> f64 {
    let scale = 10f64.powi(ROUNDING_PRECISION);
    (value * scale).round() / scale
}

/// Configuration for the simulated driver.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Mean raw temperature (°C)
    pub base_temperature: f64,

    /// Mean pressure (millibar)
    pub base_pressure: f64,

    /// Mean relative humidity (%)
    pub base_humidity: f64,

    /// Probability (0.0 - 1.0) that a read fails with a bus error
    pub failure_rate: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            base_temperature: 22.0,
            base_pressure: 1013.25,
            base_humidity: 45.0,
            failure_rate: 0.0,
        }
    }
}

/// Random-walk stand-in for a BME280-class sensor.
///
/// Each read nudges the previous value and pulls it back toward the
/// configured mean, so consecutive samples look like a slowly drifting room.
pub struct SimulatedDriver {
    config: SimulationConfig,
    rng: StdRng,
    current: RawReading,
}

impl SimulatedDriver {
    pub fn new(config: SimulationConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Deterministic driver for tests.
    pub fn seeded(config: SimulationConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    pub fn with_defaults() -> Self {
        Self::new(SimulationConfig::default())
    }

    fn with_rng(config: SimulationConfig, rng: StdRng) -> Self {
        let current = RawReading {
            temperature: config.base_temperature,
            pressure: config.base_pressure,
            humidity: config.base_humidity,
        };
        Self {
            config,
            rng,
            current,
        }
    }

    fn drift(rng: &mut StdRng, value: f64, mean: f64, step: f64) -> f64 {
        // 10% mean reversion per sample
        let reverted = value + (mean - value) * 0.1;
        reverted + rng.gen_range(-step..=step)
    }
}

impl SensorDriver for SimulatedDriver {
    fn read_raw(&mut self) -> Result<RawReading, DriverError> {
        if self.config.failure_rate > 0.0 && self.rng.gen_bool(self.config.failure_rate.min(1.0)) {
            return Err(DriverError::Bus("simulated I2C NACK".to_string()));
        }

        let c = &self.config;
        let rng = &mut self.rng;
        self.current = RawReading {
            temperature: Self::drift(rng, self.current.temperature, c.base_temperature, 0.2),
            pressure: Self::drift(rng, self.current.pressure, c.base_pressure, 0.5),
            humidity: Self::drift(rng, self.current.humidity, c.base_humidity, 1.0)
                .clamp(0.0, 100.0),
        };

        Ok(self.current)
    }
}
