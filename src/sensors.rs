//! CPU temperature sampling.
//!
//! Turns the raw sensor table of the management interface into one
//! representative temperature: the hottest CPU reading.

use std::{fmt, sync::Arc};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transport::{CommandFailure, ManagementInterface};

/// Temperature in degrees Celsius.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Temperature(pub f32);

impl fmt::Display for Temperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}°C", self.0)
    }
}

/// What to do with a sensor reported as `na`.
///
/// A BMC reports CPU sensors as `na` while the host is powered off, which
/// is also the moment the machine may be about to heat up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnavailablePolicy {
    /// Count the sensor as a 0.0 °C reading.
    #[default]
    TreatAsZero,
    /// Ignore the sensor.
    Skip,
}

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("sensor query failed: {0}")]
    CommandFailed(#[from] CommandFailure),

    #[error("no temperature data found")]
    NoData,
}

/// Why a candidate line yielded no reading.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LineError {
    #[error("no decimal value in sensor line")]
    NoValue,
}

/// Line-oriented parser for `ipmitool sensor` style output.
///
/// Records look like `CPU1 Temp | 45.000 | degrees C | ok | ...`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingParser {
    /// Every token must appear in a line for it to be considered.
    pub filters: Vec<String>,
    /// Token marking a line as a temperature record.
    pub marker: String,
    pub unavailable: UnavailablePolicy,
}

impl Default for ReadingParser {
    fn default() -> Self {
        Self {
            filters: vec!["CPU".into(), "Temp".into()],
            marker: "Temp".into(),
            unavailable: UnavailablePolicy::default(),
        }
    }
}

impl ReadingParser {
    /// Extracts every temperature reading from `raw`.
    ///
    /// Lines that fail to parse are logged and skipped.
    pub fn parse(&self, raw: &str) -> Vec<f32> {
        raw.lines()
            .filter_map(|line| match self.parse_line(line) {
                Ok(reading) => reading,
                Err(e) => {
                    warn!("Error processing line: {line}: {e}");
                    None
                }
            })
            .collect()
    }

    /// Parses a single line.
    ///
    /// `Ok(None)` means the line is not a CPU temperature record.
    pub fn parse_line(&self, line: &str) -> Result<Option<f32>, LineError> {
        if line.trim().is_empty() || !self.filters.iter().all(|f| line.contains(f.as_str())) {
            return Ok(None);
        }

        if !line.contains(self.marker.as_str()) {
            return Ok(None);
        }

        let Some(value) = line.split('|').nth(1).map(str::trim) else {
            return Ok(None);
        };

        if value == "na" {
            return Ok(match self.unavailable {
                UnavailablePolicy::TreatAsZero => {
                    info!("The system is off, temperature is na");
                    Some(0.0)
                }
                UnavailablePolicy::Skip => {
                    debug!("Skipping unavailable sensor: {}", line.trim());
                    None
                }
            });
        }

        find_decimal(line).map(Some).ok_or(LineError::NoValue)
    }
}

/// First `\d+\.\d+` number in `line`.
fn find_decimal(line: &str) -> Option<f32> {
    let bytes = line.as_bytes();
    let digits_from = |i: usize| bytes[i..].iter().take_while(|b| b.is_ascii_digit()).count();

    let mut start = 0;
    while start < bytes.len() {
        if !bytes[start].is_ascii_digit() {
            start += 1;
            continue;
        }
        let int_end = start + digits_from(start);
        if bytes.get(int_end) == Some(&b'.')
            && bytes.get(int_end + 1).is_some_and(u8::is_ascii_digit)
        {
            let end = int_end + 1 + digits_from(int_end + 1);
            return line[start..end].parse().ok();
        }
        start = int_end;
    }
    None
}

/// The hottest of `readings`, if any.
pub fn representative(readings: &[f32]) -> Option<Temperature> {
    readings
        .iter()
        .copied()
        .reduce(f32::max)
        .map(Temperature)
}

/// Reads the CPU temperature through the management interface.
pub struct SensorReader {
    interface: Arc<dyn ManagementInterface>,
    parser: ReadingParser,
}

impl SensorReader {
    pub fn new(interface: Arc<dyn ManagementInterface>, parser: ReadingParser) -> Self {
        Self { interface, parser }
    }

    /// Queries the sensors and returns the hottest CPU reading.
    ///
    /// # Errors
    ///
    /// [`SensorError::CommandFailed`] when the query exits non-zero or cannot
    /// be run, [`SensorError::NoData`] when no reading could be extracted.
    pub async fn read_cpu_temperature(&self) -> Result<Temperature, SensorError> {
        let output = self
            .interface
            .invoke_sensor_query()
            .await
            .map_err(CommandFailure::from)?
            .into_result()?;

        let readings = self.parser.parse(&output.stdout);
        debug!("Parsed {} CPU temperature readings: {readings:?}", readings.len());

        representative(&readings).ok_or(SensorError::NoData)
    }
}
