use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use std::path::Path;

use super::{ConfigError, types::Config, validate::validate_config};

/// Prefix of environment variables that override file values.
pub const ENV_PREFIX: &str = "KEYCARD_";

/// Load configuration from file with environment variable overrides
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    extract(
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__")),
    )
}

/// Load built-in defaults with environment variable overrides
pub fn load_default_config() -> Result<Config, ConfigError> {
    extract(
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Env::prefixed(ENV_PREFIX).split("__")),
    )
}

/// Load configuration from TOML string (useful for testing)
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    let config: Config =
        toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

fn extract(figment: Figment) -> Result<Config, ConfigError> {
    let config: Config = figment
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SdkBackend;
    use keycard_core::{EncoderModel, KeyType};
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config_from_str_valid() {
        let toml = r#"
[dispenser]
port = "COM5"
baud = 19200

[encoder]
model = "m600"

[encoding]
sector = 2
key_type = "b"
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.dispenser.port, "COM5");
        assert_eq!(config.dispenser.baud, 19200);
        assert_eq!(config.encoder.model, EncoderModel::M600);
        assert_eq!(config.encoding.sector, 2);
        assert_eq!(config.encoding.key_type, KeyType::B);
        assert_eq!(config.encoding.block, 0);
    }

    #[test]
    fn test_load_config_from_str_empty_uses_defaults() {
        let config = load_config_from_str("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_config_from_str_unknown_backend() {
        let toml = r#"
[sdk]
backend = "serial"
"#;
        let err = load_config_from_str(toml).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_load_config_from_str_invalid_key() {
        let toml = r#"
[encoding]
key = "not-hex"
"#;
        let err = load_config_from_str(toml).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/keycard.toml"));
        assert!(matches!(result.unwrap_err(), ConfigError::FileNotFound(_)));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
[encoder]
port = "/dev/ttyS1"

[sdk]
backend = "vendor"
path = "/opt/kiosk/sdk"
"#
        )
        .unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.encoder.port, "/dev/ttyS1");
        assert_eq!(config.sdk.backend, SdkBackend::Vendor);
        assert_eq!(config.sdk.path, Path::new("/opt/kiosk/sdk"));
    }

    #[test]
    fn test_env_overrides_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "keycard.toml",
                r#"
[dispenser]
port = "COM7"
baud = 9600
"#,
            )?;
            jail.set_env("KEYCARD_DISPENSER__BAUD", "38400");
            jail.set_env("KEYCARD_TIMING__MOVE_TIMEOUT_MS", "12000");

            let config = load_config(Path::new("keycard.toml")).map_err(|e| e.to_string())?;
            assert_eq!(config.dispenser.port, "COM7");
            assert_eq!(config.dispenser.baud, 38400);
            assert_eq!(config.timing.move_timeout_ms, 12000);
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("KEYCARD_ENCODER__PORT", "COM9");

            let config = load_default_config().map_err(|e| e.to_string())?;
            assert_eq!(config.encoder.port, "COM9");
            Ok(())
        });
    }
}
