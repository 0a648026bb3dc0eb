//! Configuration validation

use reaper_util::WallClock;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::schema::{RawConfig, RawFilters};
use crate::window::{WindowError, WindowPolicy};

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("{field}: {message}")]
    InvalidWindow { field: &'static str, message: String },

    #[error("Invalid label filter '{value}': {message}")]
    InvalidFilter { value: String, message: String },

    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },

    #[error("Whitelist minus blacklist leaves no allowed time in the day")]
    NoAllowedTime,
}

/// Validate a raw configuration
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = validate_windows(
        config.whitelist_hours.as_deref().unwrap_or_default(),
        config.blacklist_hours.as_deref().unwrap_or_default(),
    );

    if config.interval_seconds == Some(0) {
        errors.push(ValidationError::ZeroDuration {
            field: "interval_seconds",
        });
    }

    match &config.filters {
        Some(RawFilters::Spec(spec)) => {
            if let Err(e) = parse_label_filters(spec) {
                errors.push(e);
            }
        }
        Some(RawFilters::Table(table)) => {
            for (key, value) in table {
                if key.is_empty() || value.is_empty() {
                    errors.push(ValidationError::InvalidFilter {
                        value: format!("{key}: {value}"),
                        message: "key and value cannot be empty".into(),
                    });
                }
            }
        }
        None => {}
    }

    errors
}

/// Check that a whitelist/blacklist pair builds a usable policy
pub fn validate_windows(whitelist: &str, blacklist: &str) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    for (field, spec) in [("whitelist_hours", whitelist), ("blacklist_hours", blacklist)] {
        if let Err(e) = crate::window::parse_hour_ranges(spec) {
            errors.push(ValidationError::InvalidWindow {
                field,
                message: e.to_string(),
            });
        }
    }

    if errors.is_empty() {
        match WindowPolicy::configure(whitelist, blacklist) {
            Ok(_) => {}
            Err(WindowError::NoAllowedTime) => errors.push(ValidationError::NoAllowedTime),
            Err(e) => errors.push(ValidationError::InvalidWindow {
                field: "whitelist_hours",
                message: e.to_string(),
            }),
        }
    }

    errors
}

/// Parse time in strict `HH:MM` format (two digits each side)
pub fn parse_time(s: &str) -> Result<WallClock, String> {
    let Some((hour, minute)) = s.split_once(':') else {
        return Err("Expected HH:MM format".into());
    };

    let two_digits = |part: &str| part.len() == 2 && part.bytes().all(|b| b.is_ascii_digit());
    if !two_digits(hour) || !two_digits(minute) {
        return Err("Expected HH:MM format".into());
    }

    let hour: u8 = hour.parse().map_err(|_| "Invalid hour".to_string())?;
    let minute: u8 = minute.parse().map_err(|_| "Invalid minute".to_string())?;

    if hour >= 24 {
        return Err("Hour must be 0-23".into());
    }
    if minute >= 60 {
        return Err("Minute must be 0-59".into());
    }

    WallClock::new(hour, minute).ok_or_else(|| "Invalid time".to_string())
}

/// Parse label filters in the form `key1: value1[; key2: value2 ...]`
pub fn parse_label_filters(spec: &str) -> Result<BTreeMap<String, String>, ValidationError> {
    let compact: String = spec.chars().filter(|c| !c.is_whitespace()).collect();
    let mut filters = BTreeMap::new();
    if compact.is_empty() {
        return Ok(filters);
    }

    for pair in compact.split(';').filter(|p| !p.is_empty()) {
        let key_value: Vec<&str> = pair.split(':').collect();
        match key_value.as_slice() {
            [key, value] if !key.is_empty() && !value.is_empty() => {
                filters.insert(key.to_string(), value.to_string());
            }
            _ => {
                return Err(ValidationError::InvalidFilter {
                    value: pair.to_string(),
                    message: "should be of the form `label_key: label_value`".into(),
                });
            }
        }
    }

    Ok(filters)
}
