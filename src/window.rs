//! Fetch window planning
//!
//! The time-series endpoint is queried one day at a time. A requested range is
//! cut into consecutive half-open windows of at most 24 hours; the last one is
//! clamped to the end of the range.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use std::fmt;

use crate::error::ConfigError;

const LOCAL_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Half-open interval `[start, end)` fetched in one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
}

impl TimeWindow {
    pub fn duration(&self) -> Duration {
        self.end.signed_duration_since(self.start)
    }

    /// ISO-8601 start with offset, as sent to the platform
    pub fn start_iso(&self) -> String {
        iso_with_offset(&self.start)
    }

    pub fn end_iso(&self) -> String {
        iso_with_offset(&self.end)
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start_iso(), self.end_iso())
    }
}

fn iso_with_offset(dt: &DateTime<Tz>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%:z").to_string()
}

/// Split `[start, end)` into windows of at most 24 hours.
///
/// Returns an empty list when `start >= end`.
pub fn split_into_daily_windows(start: DateTime<Tz>, end: DateTime<Tz>) -> Vec<TimeWindow> {
    let step = Duration::hours(24);
    let mut windows = Vec::new();
    let mut current = start;

    while current < end {
        let next = std::cmp::min(current + step, end);
        windows.push(TimeWindow { start: current, end: next });
        current = next;
    }

    windows
}

/// Attach a timezone to a local wall-clock time.
///
/// Ambiguous times (DST fold) resolve to the earlier instant; times that do
/// not exist in the zone are rejected.
pub fn localize(naive: NaiveDateTime, tz: Tz) -> Result<DateTime<Tz>, ConfigError> {
    tz.from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| ConfigError::InvalidRange(format!("{} does not exist in {}", naive, tz.name())))
}

/// Which end of a range a bare date stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeBound {
    Start,
    End,
}

/// Parse `YYYY-MM-DD HH:MM:SS` or a bare `YYYY-MM-DD`.
///
/// A bare start date means `00:00:00`; a bare end date means `23:59:59`.
pub fn parse_local_bound(input: &str, bound: RangeBound) -> Result<NaiveDateTime, ConfigError> {
    let input = input.trim();
    if let Ok(dt) = NaiveDateTime::parse_from_str(input, LOCAL_FORMAT) {
        return Ok(dt);
    }

    let date = NaiveDate::parse_from_str(input, DATE_FORMAT)
        .map_err(|_| ConfigError::InvalidRange(format!("cannot parse '{}' as a date", input)))?;
    let dt = match bound {
        RangeBound::Start => date.and_hms_opt(0, 0, 0),
        RangeBound::End => date.and_hms_opt(23, 59, 59),
    };
    dt.ok_or_else(|| ConfigError::InvalidRange(format!("invalid time for {}", date)))
}

/// Resolve a requested local range into zone-aware instants
pub fn resolve_range(start: &str, end: &str, tz: Tz) -> Result<(DateTime<Tz>, DateTime<Tz>), ConfigError> {
    let start = localize(parse_local_bound(start, RangeBound::Start)?, tz)?;
    let end = localize(parse_local_bound(end, RangeBound::End)?, tz)?;
    if start >= end {
        return Err(ConfigError::InvalidRange(format!(
            "start {} is not before end {}",
            iso_with_offset(&start),
            iso_with_offset(&end)
        )));
    }
    Ok((start, end))
}
