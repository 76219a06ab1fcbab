//! Timestamp rounding to the sampling interval

use chrono::{Duration, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ConfigError;

/// Sampling intervals the platform export supports, in minutes
pub const SUPPORTED_INTERVALS: [u32; 6] = [1, 5, 10, 15, 30, 60];

/// Validated sampling interval in minutes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct SampleInterval(u32);

impl SampleInterval {
    pub fn new(minutes: u32) -> Result<Self, ConfigError> {
        if SUPPORTED_INTERVALS.contains(&minutes) {
            Ok(Self(minutes))
        } else {
            Err(ConfigError::UnsupportedInterval(minutes))
        }
    }

    pub fn minutes(self) -> u32 {
        self.0
    }

    /// Value of the `interval` field in time-series queries
    pub fn seconds(self) -> u32 {
        self.0 * 60
    }
}

impl Default for SampleInterval {
    fn default() -> Self {
        Self(5)
    }
}

impl TryFrom<u32> for SampleInterval {
    type Error = ConfigError;

    fn try_from(minutes: u32) -> Result<Self, Self::Error> {
        Self::new(minutes)
    }
}

impl From<SampleInterval> for u32 {
    fn from(interval: SampleInterval) -> Self {
        interval.0
    }
}

impl fmt::Display for SampleInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}m", self.0)
    }
}

/// Snap a local timestamp to the nearest interval boundary.
///
/// The bucket is `floor(minute / interval) * interval`, advanced by one
/// interval when the remainder is at least half the interval. Seconds and
/// sub-seconds are dropped. Advancing past minute 59 carries into the next
/// hour, and from 23:xx into the next day.
pub fn round_to_interval(local: NaiveDateTime, interval: SampleInterval) -> NaiveDateTime {
    let step = interval.minutes();
    let minute = local.minute();
    let mut bucket = (minute / step) * step;
    if 2 * (minute % step) >= step {
        bucket += step;
    }

    let hour_start = local
        .with_minute(0)
        .and_then(|dt| dt.with_second(0))
        .and_then(|dt| dt.with_nanosecond(0))
        .unwrap_or(local);
    hour_start + Duration::minutes(i64::from(bucket))
}
