//! Deletion-window policy
//!
//! Whitelist and blacklist hours describe a repeating daily pattern in UTC.
//! The pattern is stored as an [`IntervalSet`] over a two-day reference
//! window (`[0, 2 * 86400)` seconds) holding two identical copies of the
//! day, so a range that crosses midnight becomes one contiguous span and any
//! 24h lookup starting inside the first day stays inside the set.

use chrono::{DateTime, Utc};
use reaper_util::{
    IntervalSet, ReaperError, SECONDS_PER_DAY, WallClock, day_start_seconds, seconds_into_day,
};
use std::ops::ControlFlow;
use thiserror::Error;

use crate::validation::parse_time;

/// Number of day copies held in the reference window
pub const REFERENCE_DAYS: i64 = 2;

/// Errors raised while building a window policy
#[derive(Debug, Error)]
pub enum WindowError {
    #[error("Range '{range}' should be of the form `09:00 - 11:00[, 21:00 - 23:00[, ...]]`")]
    MalformedRange { range: String },

    #[error("Invalid time '{value}': {message}")]
    InvalidTime { value: String, message: String },

    #[error("Direction expected to be + or - but got '{0}'")]
    InvalidDirection(String),

    #[error("Whitelist minus blacklist leaves no allowed time in the day")]
    NoAllowedTime,

    #[error(transparent)]
    Span(#[from] ReaperError),
}

/// Whether a range adds to or removes from the allowed hours
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Add,
    Subtract,
}

impl Direction {
    /// Parse the `+` / `-` flag used by the range grammar
    pub fn from_flag(flag: &str) -> Result<Self, WindowError> {
        match flag {
            "+" => Ok(Self::Add),
            "-" => Ok(Self::Subtract),
            other => Err(WindowError::InvalidDirection(other.to_string())),
        }
    }
}

/// One `HH:MM - HH:MM` range; `end < start` means it crosses midnight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HourRange {
    pub start: WallClock,
    pub end: WallClock,
}

impl HourRange {
    pub fn crosses_midnight(&self) -> bool {
        self.end < self.start
    }
}

/// Parse a comma-separated list of `HH:MM - HH:MM` ranges.
///
/// Whitespace is ignored and an empty input yields no ranges.
pub fn parse_hour_ranges(input: &str) -> Result<Vec<HourRange>, WindowError> {
    let compact: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return Ok(Vec::new());
    }

    compact
        .split(',')
        .map(|range| {
            let times: Vec<&str> = range.split('-').collect();
            let [start, end] = times.as_slice() else {
                return Err(WindowError::MalformedRange {
                    range: range.to_string(),
                });
            };
            Ok(HourRange {
                start: parse_clock(start)?,
                end: parse_clock(end)?,
            })
        })
        .collect()
}

fn parse_clock(value: &str) -> Result<WallClock, WindowError> {
    parse_time(value).map_err(|message| WindowError::InvalidTime {
        value: value.to_string(),
        message,
    })
}

/// Allowed deletion hours: whitelist minus blacklist over a reference day
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowPolicy {
    whitelist: String,
    blacklist: String,
    allowed_hours: IntervalSet,
    allowed_seconds_per_day: i64,
}

impl WindowPolicy {
    /// Build the policy from whitelist and blacklist specifications.
    ///
    /// An empty whitelist allows the whole day, so a blacklist alone still
    /// restricts deletions. A policy with no allowed time is rejected.
    pub fn configure(whitelist: &str, blacklist: &str) -> Result<Self, WindowError> {
        let mut allowed_hours = IntervalSet::new();

        let whitelist_ranges = parse_hour_ranges(whitelist)?;
        if whitelist_ranges.is_empty() {
            allowed_hours.insert(0, REFERENCE_DAYS * SECONDS_PER_DAY)?;
        } else {
            merge_ranges(&mut allowed_hours, &whitelist_ranges, Direction::Add)?;
        }
        merge_ranges(&mut allowed_hours, &parse_hour_ranges(blacklist)?, Direction::Subtract)?;

        let allowed_seconds_per_day = allowed_hours.total_covered_seconds(0, SECONDS_PER_DAY);
        if allowed_seconds_per_day == 0 {
            return Err(WindowError::NoAllowedTime);
        }

        tracing::debug!(
            whitelist,
            blacklist,
            allowed_seconds_per_day,
            "Window policy configured"
        );

        Ok(Self {
            whitelist: whitelist.to_string(),
            blacklist: blacklist.to_string(),
            allowed_hours,
            allowed_seconds_per_day,
        })
    }

    pub fn whitelist(&self) -> &str {
        &self.whitelist
    }

    pub fn blacklist(&self) -> &str {
        &self.blacklist
    }

    /// Allowed spans over the two-day reference window
    pub fn allowed_hours(&self) -> &IntervalSet {
        &self.allowed_hours
    }

    pub fn allowed_seconds_per_day(&self) -> i64 {
        self.allowed_seconds_per_day
    }

    /// Whether deletion is allowed at instant `t`
    pub fn is_allowed(&self, t: &DateTime<Utc>) -> bool {
        self.allowed_hours.contains(seconds_into_day(t))
    }

    /// Allowed spans of one reference day, as `(start, end)` seconds from
    /// midnight. A span crossing midnight ends past 86400.
    pub fn daily_spans(&self) -> Vec<(i64, i64)> {
        let wraps = self.allowed_hours.contains(SECONDS_PER_DAY - 1);
        self.allowed_hours
            .spans()
            .iter()
            .filter(|s| s.start < SECONDS_PER_DAY)
            // the morning tail of a midnight-crossing span is reported with its head
            .filter(|s| !(wraps && s.start == 0 && s.end < SECONDS_PER_DAY))
            .map(|s| (s.start, s.end.min(s.start + SECONDS_PER_DAY)))
            .collect()
    }

    /// Advance `seconds_to_add` allowed seconds from `creation`.
    ///
    /// Disallowed gaps consume no budget. The result is never before
    /// `creation` and always falls inside an allowed span, wrapping to the
    /// following days as often as the budget requires.
    pub fn expiry_from(
        &self,
        creation: &DateTime<Utc>,
        seconds_to_add: i64,
    ) -> reaper_util::Result<DateTime<Utc>> {
        if seconds_to_add < 0 {
            return Err(ReaperError::internal(format!(
                "negative expiry budget: {seconds_to_add}s"
            )));
        }
        if self.allowed_seconds_per_day <= 0 {
            return Err(ReaperError::config("window policy has no allowed time"));
        }

        // Round sub-second creation times up so the result never precedes them.
        let creation_secs =
            creation.timestamp() + i64::from(creation.timestamp_subsec_nanos() > 0);
        let creation_at = DateTime::from_timestamp(creation_secs, 0)
            .ok_or_else(|| ReaperError::internal("creation time out of range"))?;
        let day_start = day_start_seconds(&creation_at);
        let projected = seconds_into_day(&creation_at);

        // Each pass walks exactly one day of the pattern and so consumes
        // `allowed_seconds_per_day`; the answer lies in pass
        // `seconds_to_add / allowed_seconds_per_day`.
        let max_passes = seconds_to_add / self.allowed_seconds_per_day + 1;
        let mut remaining = seconds_to_add;

        for pass in 0..max_passes {
            let landed = self.allowed_hours.for_each_span(
                projected,
                projected + SECONDS_PER_DAY,
                |start, end| {
                    let duration = end - start;
                    if remaining < duration {
                        return ControlFlow::Break(start + remaining);
                    }
                    remaining -= duration;
                    ControlFlow::Continue(())
                },
            );

            if let ControlFlow::Break(reference) = landed {
                let expiry = day_start + pass * SECONDS_PER_DAY + reference;
                return DateTime::from_timestamp(expiry, 0)
                    .ok_or_else(|| ReaperError::internal("expiry time out of range"));
            }
        }

        Err(ReaperError::internal(format!(
            "expiry projection of {seconds_to_add}s did not land within {max_passes} day(s)"
        )))
    }
}

/// Merge every range into `set`, once per reference day.
fn merge_ranges(
    set: &mut IntervalSet,
    ranges: &[HourRange],
    direction: Direction,
) -> Result<(), WindowError> {
    for range in ranges {
        let start = range.start.as_seconds_from_midnight();
        let end = range.end.as_seconds_from_midnight();

        for day in 0..REFERENCE_DAYS {
            let base = day * SECONDS_PER_DAY;
            if range.crosses_midnight() {
                merge_timespan(set, base + start, base + SECONDS_PER_DAY, direction)?;
                merge_timespan(set, base, base + end, direction)?;
            } else {
                merge_timespan(set, base + start, base + end, direction)?;
            }
        }
    }
    Ok(())
}

fn merge_timespan(
    set: &mut IntervalSet,
    start: i64,
    end: i64,
    direction: Direction,
) -> Result<(), WindowError> {
    match direction {
        Direction::Add => set.insert(start, end)?,
        Direction::Subtract => set.remove(start, end)?,
    }
    Ok(())
}
