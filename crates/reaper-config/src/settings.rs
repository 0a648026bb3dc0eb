//! Validated daemon settings

use std::collections::BTreeMap;
use std::time::Duration;

use crate::schema::{RawConfig, RawFilters};
use crate::validation::{ValidationError, parse_label_filters, validate_windows};
use crate::window::{WindowError, WindowPolicy};

/// Default max time to wait for a node to drain
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(300);

/// Default time between node checks
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(600);

/// Settings ready for use by the daemon
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub whitelist_hours: String,
    pub blacklist_hours: String,
    pub drain_timeout: Duration,
    pub interval: Duration,
    pub label_filters: BTreeMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            whitelist_hours: String::new(),
            blacklist_hours: String::new(),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            interval: DEFAULT_INTERVAL,
            label_filters: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        let defaults = Self::default();

        let label_filters = match raw.filters {
            Some(RawFilters::Spec(spec)) => parse_label_filters(&spec).unwrap_or_default(),
            Some(RawFilters::Table(table)) => table,
            None => BTreeMap::new(),
        };

        Self {
            whitelist_hours: raw.whitelist_hours.unwrap_or_default(),
            blacklist_hours: raw.blacklist_hours.unwrap_or_default(),
            drain_timeout: raw
                .drain_timeout_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.drain_timeout),
            interval: raw
                .interval_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.interval),
            label_filters,
        }
    }

    /// Re-check settings after command-line overrides were applied
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = validate_windows(&self.whitelist_hours, &self.blacklist_hours);
        if self.interval.is_zero() {
            errors.push(ValidationError::ZeroDuration { field: "interval" });
        }
        errors
    }

    /// Build the deletion-window policy described by these settings
    pub fn window_policy(&self) -> Result<WindowPolicy, WindowError> {
        WindowPolicy::configure(&self.whitelist_hours, &self.blacklist_hours)
    }
}
