//! Fixed settings of the logger and their persisted form
//!
//! The firmware runs from the compile-time constants below. Hosts that want
//! to keep settings across runs (the simulator) store a [`LoggerConfig`]
//! encoded with postcard and protected by a CRC-32.

use alloc::vec::Vec;

use crc::{CRC_32_ISCSI, Crc};
use embassy_time::Duration;
use log::{error, info};
use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

/// Sampling period of the scheduler.
///
/// Older firmware notes mention a five second interval; the deployed
/// behaviour has always been one sample per second.
pub const SAMPLE_PERIOD_MS: u64 = 1000;

/// Size of each chunk sent during a bulk log transfer
pub const TRANSFER_CHUNK_SIZE: u32 = 2048;

/// Analog channel sampled every cycle
pub const ADC_CHANNEL: u8 = 34;

/// ADC reference voltage in volts
pub const REFERENCE_VOLTAGE: f32 = 3.3;

/// Highest raw value of the 12-bit ADC
pub const ADC_FULL_SCALE: u16 = 4095;

/// Quiet time after which an unterminated command line is considered complete
pub const COMMAND_IDLE_MS: u64 = 1000;

/// Name of the log file on the storage volume (8.3 for FAT)
pub const LOG_FILE_NAME: &str = "DATALOG.CSV";

/// Upper bound for an encoded [`LoggerConfig`]
pub const CONFIG_BUF_SIZE: usize = 64;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Cannot encode config")]
    Encode,
    #[error("Cannot decode config")]
    Decode,
    #[error("Invalid config: {0}")]
    Invalid(&'static str),
}

/// Runtime view of the logger settings
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoggerConfig {
    /// Period between two sampling cycles, always [`SAMPLE_PERIOD_MS`]
    pub sample_period_ms: u64,
    /// Chunk size used by the bulk transfer
    pub chunk_size: u32,
    /// Analog channel passed to the ADC collaborator
    pub adc_channel: u8,
    /// Reference voltage of the ADC
    pub reference_voltage: f32,
    /// Raw value corresponding to the reference voltage
    pub adc_full_scale: u16,
    /// Idle time that completes a pending command line
    pub command_idle_ms: u64,
}

impl LoggerConfig {
    pub const DEFAULT: Self = Self {
        sample_period_ms: SAMPLE_PERIOD_MS,
        chunk_size: TRANSFER_CHUNK_SIZE,
        adc_channel: ADC_CHANNEL,
        reference_voltage: REFERENCE_VOLTAGE,
        adc_full_scale: ADC_FULL_SCALE,
        command_idle_ms: COMMAND_IDLE_MS,
    };

    pub fn sample_period(&self) -> Duration {
        Duration::from_millis(self.sample_period_ms)
    }

    pub fn command_idle(&self) -> Duration {
        Duration::from_millis(self.command_idle_ms)
    }

    /// Linear scale from raw ADC counts to volts
    pub fn volts_per_count(&self) -> f32 {
        self.reference_voltage / self.adc_full_scale as f32
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_period_ms != SAMPLE_PERIOD_MS {
            return Err(ConfigError::Invalid("sampling period is fixed at one second"));
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk size must be non-zero"));
        }
        if self.adc_full_scale == 0 {
            return Err(ConfigError::Invalid("ADC full scale must be non-zero"));
        }
        Ok(())
    }

    /// Encode into a CRC protected postcard blob.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ConfigError> {
        let mut buf = [0u8; CONFIG_BUF_SIZE];
        let crc = Crc::<u32>::new(&CRC_32_ISCSI);
        let encoded = postcard::to_slice_crc32(self, &mut buf, crc.digest()).map_err(|e| {
            error!("Cannot encode config to buffer: {e:?}");
            ConfigError::Encode
        })?;
        info!("Encoded config to {} bytes", encoded.len());
        Ok(encoded.to_vec())
    }

    /// Decode a blob produced by [`LoggerConfig::to_bytes`].
    ///
    /// A blob with a bad checksum, a truncated blob and a blob carrying
    /// invalid settings are all rejected.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ConfigError> {
        let crc = Crc::<u32>::new(&CRC_32_ISCSI);
        let config: LoggerConfig =
            postcard::from_bytes_crc32(bytes, crc.digest()).map_err(|e| {
                error!("Cannot parse config: {e:?}");
                ConfigError::Decode
            })?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_deployed_firmware() {
        let config = LoggerConfig::default();
        assert_eq!(config.sample_period(), Duration::from_secs(1));
        assert_eq!(config.chunk_size, 2048);
        assert_eq!(config.adc_full_scale, 4095);
        assert!((config.volts_per_count() - 3.3 / 4095.0).abs() < 1e-9);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_persisted_config_survives_reload() {
        let config = LoggerConfig {
            chunk_size: 512,
            command_idle_ms: 250,
            ..LoggerConfig::DEFAULT
        };

        let bytes = config.to_bytes().unwrap();
        assert!(bytes.len() <= CONFIG_BUF_SIZE);
        assert_eq!(LoggerConfig::from_bytes(&bytes), Ok(config));
    }

    #[test]
    fn test_corrupted_config_is_rejected() {
        let mut bytes = LoggerConfig::DEFAULT.to_bytes().unwrap();
        bytes[0] ^= 0xff;
        assert_eq!(LoggerConfig::from_bytes(&bytes), Err(ConfigError::Decode));
        assert_eq!(LoggerConfig::from_bytes(&[]), Err(ConfigError::Decode));
    }

    #[test]
    fn test_sampling_period_cannot_be_changed() {
        for sample_period_ms in [0, 500, 5000] {
            let config = LoggerConfig {
                sample_period_ms,
                ..LoggerConfig::DEFAULT
            };
            assert!(config.validate().is_err());

            let bytes = config.to_bytes().unwrap();
            assert_eq!(
                LoggerConfig::from_bytes(&bytes),
                Err(ConfigError::Invalid("sampling period is fixed at one second"))
            );
        }
    }

    #[test]
    fn test_zero_chunk_size_is_invalid() {
        let config = LoggerConfig {
            chunk_size: 0,
            ..LoggerConfig::DEFAULT
        };
        let bytes = config.to_bytes().unwrap();
        assert!(matches!(
            LoggerConfig::from_bytes(&bytes),
            Err(ConfigError::Invalid(_))
        ));
    }
}
