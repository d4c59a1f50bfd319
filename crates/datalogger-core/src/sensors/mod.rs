pub mod heat_index;

use log::{debug, warn};
use thiserror_no_std::Error;

use crate::config::LoggerConfig;
use crate::storage::Reading;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    #[error("Sensor returned no valid humidity/temperature reading")]
    NoReading,
}

/// Humidity/temperature sensor collaborator (DHT-style driver).
///
/// Reads signal failure with `f32::NAN`, matching what the drivers report
/// when a transfer times out or fails its checksum.
pub trait ClimateSensor {
    /// Relative humidity in percent, or NaN
    fn read_humidity(&mut self) -> f32;

    /// Temperature in °C, or NaN
    fn read_temperature(&mut self) -> f32;

    fn compute_heat_index(&self, temperature: f32, humidity: f32, is_fahrenheit: bool) -> f32 {
        heat_index::compute_heat_index(temperature, humidity, is_fahrenheit)
    }
}

/// Analog-to-digital converter collaborator
pub trait AnalogInput {
    /// Raw conversion result for `channel`
    fn read_raw(&mut self, channel: u8) -> u16;
}

/// Produces one [`Reading`] per call from the climate sensor and the ADC.
pub struct SensorSampler<C, A> {
    climate: C,
    adc: A,
    channel: u8,
    full_scale: u16,
    volts_per_count: f32,
}

impl<C: ClimateSensor, A: AnalogInput> SensorSampler<C, A> {
    pub fn new(climate: C, adc: A, config: &LoggerConfig) -> Self {
        Self {
            climate,
            adc,
            channel: config.adc_channel,
            full_scale: config.adc_full_scale,
            volts_per_count: config.volts_per_count(),
        }
    }

    /// Take one sample stamped with `timestamp_secs`.
    ///
    /// When humidity or temperature is NaN nothing else is read and no
    /// reading is produced, so a partial triplet never leaves the sampler.
    pub fn sample(&mut self, timestamp_secs: u64) -> Result<Reading, SensorError> {
        let humidity = self.climate.read_humidity();
        let temperature = self.climate.read_temperature();

        if humidity.is_nan() || temperature.is_nan() {
            warn!("Failed to read from climate sensor");
            return Err(SensorError::NoReading);
        }

        let heat_index = self.climate.compute_heat_index(temperature, humidity, false);
        if heat_index.is_nan() {
            warn!("Climate sensor produced an invalid heat index");
            return Err(SensorError::NoReading);
        }

        let mut adc_raw = self.adc.read_raw(self.channel);
        if adc_raw > self.full_scale {
            debug!("ADC value {} above full scale, clamping", adc_raw);
            adc_raw = self.full_scale;
        }

        Ok(Reading {
            timestamp_secs,
            humidity_percent: humidity,
            temperature_celsius: temperature,
            heat_index_celsius: heat_index,
            adc_raw,
            voltage: self.adc_to_voltage(adc_raw),
        })
    }

    pub fn adc_to_voltage(&self, adc_raw: u16) -> f32 {
        adc_raw as f32 * self.volts_per_count
    }

    pub fn climate(&self) -> &C {
        &self.climate
    }

    pub fn adc(&self) -> &A {
        &self.adc
    }
}
