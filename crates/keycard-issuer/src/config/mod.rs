//! Kiosk configuration.
//!
//! Read once at startup from a TOML file, with `KEYCARD_`-prefixed
//! environment variables layered on top. Nested keys are separated by a
//! double underscore, so `KEYCARD_DISPENSER__PORT` overrides
//! `dispenser.port`. Every field has a default.

mod loader;
mod types;
mod validate;

pub use loader::{ENV_PREFIX, load_config, load_config_from_str, load_default_config};
pub use types::*;
pub use validate::validate_config;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
