//! Configuration parsing and deletion-window policies
//!
//! Supports TOML configuration with:
//! - Versioned schema
//! - Whitelist/blacklist hours compiled into a [`WindowPolicy`]
//! - Node label filters
//! - Validation that reports every problem at once

mod schema;
mod settings;
mod validation;
mod window;

pub use schema::*;
pub use settings::*;
pub use validation::*;
pub use window::*;

use std::path::Path;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation failed: {errors:?}")]
    ValidationFailed { errors: Vec<ValidationError> },

    #[error("Unsupported config version: {0}")]
    UnsupportedVersion(u32),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Load and validate configuration from a TOML file
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<Settings> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse and validate configuration from a TOML string
pub fn parse_config(content: &str) -> ConfigResult<Settings> {
    let raw: RawConfig = toml::from_str(content)?;

    if raw.config_version != CURRENT_CONFIG_VERSION {
        return Err(ConfigError::UnsupportedVersion(raw.config_version));
    }

    let errors = validate_config(&raw);
    if !errors.is_empty() {
        return Err(ConfigError::ValidationFailed { errors });
    }

    Ok(Settings::from_raw(raw))
}

/// Current supported config version
pub const CURRENT_CONFIG_VERSION: u32 = 1;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn parse_minimal_config() {
        let settings = parse_config("config_version = 1").unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn parse_full_config() {
        let config = r#"
            config_version = 1
            whitelist_hours = "09:00 - 12:00, 13:00 - 18:00"
            blacklist_hours = "10:00 - 11:00"
            drain_timeout_seconds = 120
            interval_seconds = 300

            [filters]
            "cloud.google.com/gke-nodepool" = "spot"
        "#;

        let settings = parse_config(config).unwrap();
        assert_eq!(settings.drain_timeout, Duration::from_secs(120));
        assert_eq!(settings.interval, Duration::from_secs(300));
        assert_eq!(settings.label_filters["cloud.google.com/gke-nodepool"], "spot");
        assert_eq!(settings.window_policy().unwrap().allowed_seconds_per_day(), 25_200);
    }

    #[test]
    fn parse_filters_as_string() {
        let config = r#"
            config_version = 1
            filters = "pool: spot; team: infra"
        "#;
        let settings = parse_config(config).unwrap();
        assert_eq!(settings.label_filters.len(), 2);
    }

    #[test]
    fn reject_wrong_version() {
        let result = parse_config("config_version = 99");
        assert!(matches!(result, Err(ConfigError::UnsupportedVersion(99))));
    }

    #[test]
    fn reject_invalid_windows() {
        let config = r#"
            config_version = 1
            whitelist_hours = "09:00 - 12:00"
            blacklist_hours = "08:00 - 13:00"
        "#;
        let result = parse_config(config);
        assert!(matches!(
            result,
            Err(ConfigError::ValidationFailed { ref errors })
                if matches!(errors.as_slice(), [ValidationError::NoAllowedTime])
        ));
    }

    #[test]
    fn load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "config_version = 1").unwrap();
        writeln!(file, "drain_timeout_seconds = 30").unwrap();

        let settings = load_config(file.path()).unwrap();
        assert_eq!(settings.drain_timeout, Duration::from_secs(30));
    }

    #[test]
    fn load_config_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_config(dir.path().join("absent.toml"));
        assert!(matches!(result, Err(ConfigError::ReadError(_))));
    }
}
