//! Time utilities for the reaper
//!
//! All scheduling decisions are made in UTC. Window policies work on
//! integer seconds into the day, so this module also provides the
//! conversions between wall-clock instants and day offsets.
//!
//! # Shifted clock
//!
//! In debug builds, the `REAPER_MOCK_TIME` environment variable can be set
//! to an RFC 3339 timestamp to shift the clock used by the poll loop. The
//! mocked clock advances at the same rate as real time.
//!
//! Example:
//! ```bash
//! REAPER_MOCK_TIME="2017-11-12T09:30:00Z" reaperd --kube-api-url http://127.0.0.1:8001
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;

/// Environment variable name for mock time (debug builds only)
pub const MOCK_TIME_ENV_VAR: &str = "REAPER_MOCK_TIME";

/// Seconds in one UTC day
pub const SECONDS_PER_DAY: i64 = 86_400;

static MOCK_TIME_OFFSET: OnceLock<Option<chrono::Duration>> = OnceLock::new();

/// Offset between `REAPER_MOCK_TIME` and the real clock, read once
fn mock_offset() -> Option<chrono::Duration> {
    *MOCK_TIME_OFFSET.get_or_init(|| {
        if !cfg!(debug_assertions) {
            return None;
        }
        let raw = std::env::var(MOCK_TIME_ENV_VAR).ok()?;
        let Some(target) = parse_rfc3339(&raw) else {
            tracing::warn!(value = %raw, "Ignoring {MOCK_TIME_ENV_VAR}: not an RFC 3339 timestamp");
            return None;
        };
        let offset = target.signed_duration_since(Utc::now());
        tracing::info!(target_time = %raw, shift_secs = offset.num_seconds(), "Clock shifted");
        Some(offset)
    })
}

/// True when the clock is shifted by `REAPER_MOCK_TIME`
pub fn is_mock_time_active() -> bool {
    mock_offset().is_some()
}

/// Current UTC time, respecting `REAPER_MOCK_TIME` in debug builds.
pub fn now() -> DateTime<Utc> {
    let real = Utc::now();
    mock_offset().map_or(real, |shift| real + shift)
}

/// Parse an RFC 3339 timestamp into UTC
pub fn parse_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Format an instant as RFC 3339 with whole seconds and a `Z` suffix
pub fn format_rfc3339(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Midnight UTC of the day containing `dt`, as epoch seconds
pub fn day_start_seconds(dt: &DateTime<Utc>) -> i64 {
    dt.timestamp().div_euclid(SECONDS_PER_DAY) * SECONDS_PER_DAY
}

/// Seconds elapsed since midnight UTC, in `[0, 86400)`
pub fn seconds_into_day(dt: &DateTime<Utc>) -> i64 {
    dt.timestamp().rem_euclid(SECONDS_PER_DAY)
}

/// Wall-clock time of day (UTC), minute resolution.
///
/// Field order makes the derived ordering chronological.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WallClock {
    pub hour: u8,
    pub minute: u8,
}

impl WallClock {
    pub fn new(hour: u8, minute: u8) -> Option<Self> {
        (hour < 24 && minute < 60).then_some(Self { hour, minute })
    }

    pub fn as_seconds_from_midnight(&self) -> i64 {
        i64::from(self.hour) * 3600 + i64::from(self.minute) * 60
    }
}

impl fmt::Display for WallClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// Compact duration for log fields, e.g. `1h2m3s`, `45s` or `250ms`
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs == 0 {
        return match d.subsec_millis() {
            0 => "0s".to_string(),
            ms => format!("{ms}ms"),
        };
    }

    let mut out = String::new();
    let (h, m, s) = (secs / 3600, secs / 60 % 60, secs % 60);
    if h > 0 {
        out.push_str(&format!("{h}h"));
    }
    if h > 0 || m > 0 {
        out.push_str(&format!("{m}m"));
    }
    out.push_str(&format!("{s}s"));
    out
}
