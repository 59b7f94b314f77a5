use keycard_core::constants::{
    DEFAULT_BAUD_RATE, DEFAULT_MAC_ADDRESS, DEFAULT_SECTOR, DEFAULT_START_BLOCK,
    DEVICE_READY_TIMEOUT_MS, EJECT_TIMEOUT_MS, INTER_BLOCK_DELAY_MS, MOVE_TIMEOUT_MS,
    POLL_INTERVAL_MS, SETTLE_DELAY_MS, WAIT_POSITION_TIMEOUT_MS,
};
use keycard_core::{EncoderModel, EncodingTarget, KeyType, SectorKey};
use keycard_hardware::{LinkConfig, TransportTimings};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::ConfigError;

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub dispenser: DispenserConfig,
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub encoding: EncodingConfig,
    #[serde(default)]
    pub sdk: SdkConfig,
    #[serde(default)]
    pub timing: TimingConfig,
}

impl Config {
    /// Ports and bus address for the link manager.
    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            dispenser_port: self.dispenser.port.clone(),
            dispenser_baud: self.dispenser.baud,
            encoder_port: self.encoder.port.clone(),
            mac_address: self.dispenser.mac_address,
        }
    }
}

/// K720 dispenser connection
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DispenserConfig {
    #[serde(default = "default_dispenser_port")]
    pub port: String,
    #[serde(default = "default_baud")]
    pub baud: u32,
    /// Encoder bus address, shared by every encoder call.
    #[serde(default = "default_mac_address")]
    pub mac_address: u8,
}

impl Default for DispenserConfig {
    fn default() -> Self {
        Self {
            port: default_dispenser_port(),
            baud: default_baud(),
            mac_address: default_mac_address(),
        }
    }
}

fn default_dispenser_port() -> String {
    LinkConfig::default_dispenser_port().to_string()
}

fn default_baud() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_mac_address() -> u8 {
    DEFAULT_MAC_ADDRESS
}

/// RFID encoder connection
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EncoderConfig {
    #[serde(default = "default_encoder_port")]
    pub port: String,
    #[serde(default)]
    pub model: EncoderModel,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            port: default_encoder_port(),
            model: EncoderModel::default(),
        }
    }
}

fn default_encoder_port() -> String {
    LinkConfig::default_encoder_port().to_string()
}

/// Where and with which key the payload is written
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EncodingConfig {
    #[serde(default = "default_sector")]
    pub sector: u8,
    /// First block address of the payload.
    #[serde(default = "default_block")]
    pub block: u8,
    /// Sector key as 12 hex characters.
    #[serde(default = "default_key")]
    pub key: String,
    #[serde(default)]
    pub key_type: KeyType,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            sector: default_sector(),
            block: default_block(),
            key: default_key(),
            key_type: KeyType::default(),
        }
    }
}

impl EncodingConfig {
    /// Decode the key and build the write target.
    ///
    /// # Errors
    /// Returns `ValidationError` if the key is not 6 hex-encoded bytes.
    pub fn target(&self) -> Result<EncodingTarget, ConfigError> {
        let key = SectorKey::from_hex(&self.key)
            .map_err(|e| ConfigError::ValidationError(format!("encoding.key: {e}")))?;
        Ok(EncodingTarget {
            sector: self.sector,
            start_block: self.block,
            key,
            key_type: self.key_type,
        })
    }
}

fn default_sector() -> u8 {
    DEFAULT_SECTOR
}

fn default_block() -> u8 {
    DEFAULT_START_BLOCK
}

fn default_key() -> String {
    "FFFFFFFFFFFF".to_string()
}

/// Which driver implementation backs the devices
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SdkBackend {
    /// In-process simulated dispenser and encoder.
    #[default]
    Simulated,
    /// Vendor shared libraries (requires the `vendor-sdk` feature).
    Vendor,
}

/// Vendor SDK location
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SdkConfig {
    #[serde(default)]
    pub backend: SdkBackend,
    /// Directory holding the vendor shared libraries.
    #[serde(default = "default_sdk_path")]
    pub path: PathBuf,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            backend: SdkBackend::default(),
            path: default_sdk_path(),
        }
    }
}

fn default_sdk_path() -> PathBuf {
    PathBuf::from("./hardware")
}

/// Polling and timeout budgets, in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TimingConfig {
    pub poll_interval_ms: u64,
    pub move_timeout_ms: u64,
    pub wait_position_timeout_ms: u64,
    pub eject_timeout_ms: u64,
    pub device_ready_timeout_ms: u64,
    pub settle_delay_ms: u64,
    pub inter_block_delay_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: POLL_INTERVAL_MS,
            move_timeout_ms: MOVE_TIMEOUT_MS,
            wait_position_timeout_ms: WAIT_POSITION_TIMEOUT_MS,
            eject_timeout_ms: EJECT_TIMEOUT_MS,
            device_ready_timeout_ms: DEVICE_READY_TIMEOUT_MS,
            settle_delay_ms: SETTLE_DELAY_MS,
            inter_block_delay_ms: INTER_BLOCK_DELAY_MS,
        }
    }
}

impl TimingConfig {
    pub fn transport_timings(&self) -> TransportTimings {
        TransportTimings {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            move_timeout: Duration::from_millis(self.move_timeout_ms),
            eject_timeout: Duration::from_millis(self.eject_timeout_ms),
            device_ready_timeout: Duration::from_millis(self.device_ready_timeout_ms),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
        }
    }

    pub fn wait_position_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_position_timeout_ms)
    }

    pub fn inter_block_delay(&self) -> Duration {
        Duration::from_millis(self.inter_block_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_hardware_defaults() {
        let config = Config::default();

        assert_eq!(config.link_config(), LinkConfig::default());
        assert_eq!(config.timing.transport_timings(), TransportTimings::default());
        assert_eq!(config.timing.wait_position_timeout(), Duration::from_secs(5));
        assert_eq!(config.sdk.backend, SdkBackend::Simulated);
    }

    #[test]
    fn test_default_target() {
        let target = EncodingConfig::default().target().unwrap();
        assert_eq!(target, EncodingTarget::default());
    }

    #[test]
    fn test_target_rejects_short_key() {
        let encoding = EncodingConfig {
            key: "FFFF".to_string(),
            ..EncodingConfig::default()
        };

        let err = encoding.target().unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(msg) if msg.starts_with("encoding.key")));
    }
}
