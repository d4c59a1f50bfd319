//! Reading value type and its CSV line format
//!
//! Log rows and live updates share one line format:
//!
//! ```text
//! <time>,<humidity>,<temperature>,<heat index>,<adc raw>,<voltage>\r\n
//! ```
//!
//! The header row written at the top of a new log lists the columns in a
//! different order (`Time,ADC Value,Voltage,...`). Existing logs carry that
//! header, so it is reproduced byte for byte rather than corrected.

use core::fmt::{Display, Write};

use super::StorageError;

/// Line terminator of every row in the log and on the wire
pub const LINE_TERMINATOR: &str = "\r\n";

/// Header row written once at the top of an empty log
pub const HEADER_LINE: &str = "Time,ADC Value,Voltage,Humidity,Temperature,Heat Index\r\n";

/// Maximum length of one encoded row, terminator included
pub const MAX_RECORD_LEN: usize = 128;

/// One set of sensor and ADC values captured in a single sampling cycle.
///
/// Humidity, temperature and heat index are either all valid or no
/// `Reading` exists at all; the sampler never builds a partial one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// Seconds since boot
    pub timestamp_secs: u64,
    /// Relative humidity in percent
    pub humidity_percent: f32,
    /// Temperature in °C
    pub temperature_celsius: f32,
    /// Heat index in °C
    pub heat_index_celsius: f32,
    /// Raw ADC counts, `0..=4095` for the 12-bit converter
    pub adc_raw: u16,
    /// `adc_raw` converted to volts
    pub voltage: f32,
}

impl Display for Reading {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "[Reading] t: {}s, humidity: {:.2}%, temperature: {:.2}°C, heat index: {:.2}°C, adc: {} ({:.2} V)",
            self.timestamp_secs,
            self.humidity_percent,
            self.temperature_celsius,
            self.heat_index_celsius,
            self.adc_raw,
            self.voltage
        )
    }
}

/// Serialized form of a [`Reading`]: one terminated CSV row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    line: heapless::String<MAX_RECORD_LEN>,
}

impl LogRecord {
    pub fn from_reading(reading: &Reading) -> Result<Self, StorageError> {
        let mut line = heapless::String::new();
        write!(
            line,
            "{},{:.2},{:.2},{:.2},{},{:.2}{}",
            reading.timestamp_secs,
            reading.humidity_percent,
            reading.temperature_celsius,
            reading.heat_index_celsius,
            reading.adc_raw,
            reading.voltage,
            LINE_TERMINATOR
        )
        .map_err(|_| StorageError::RecordTooLong)?;

        Ok(Self { line })
    }

    pub fn as_str(&self) -> &str {
        self.line.as_str()
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.line.as_bytes()
    }

    pub fn len(&self) -> usize {
        self.line.len()
    }

    pub fn is_empty(&self) -> bool {
        self.line.is_empty()
    }
}

impl TryFrom<&Reading> for LogRecord {
    type Error = StorageError;

    fn try_from(reading: &Reading) -> Result<Self, Self::Error> {
        Self::from_reading(reading)
    }
}
