use keycard_core::SectorKey;

use super::{ConfigError, types::Config};

/// Validate configuration
/// Currently validates:
/// - Ports are not empty
/// - Baud rate and poll interval are not 0
/// - Sector key decodes to 6 bytes
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.dispenser.port.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "dispenser.port cannot be empty".to_string(),
        ));
    }
    if config.encoder.port.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "encoder.port cannot be empty".to_string(),
        ));
    }
    if config.dispenser.baud == 0 {
        return Err(ConfigError::ValidationError(
            "dispenser.baud cannot be 0".to_string(),
        ));
    }
    if config.timing.poll_interval_ms == 0 {
        return Err(ConfigError::ValidationError(
            "timing.poll_interval_ms cannot be 0".to_string(),
        ));
    }

    SectorKey::from_hex(&config.encoding.key)
        .map_err(|e| ConfigError::ValidationError(format!("encoding.key: {e}")))?;

    Ok(())
}
