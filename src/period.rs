use chrono::{DateTime, NaiveDate, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::Ms;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 60 * MINUTE_MS;
pub const DAY_MS: Ms = 24 * HOUR_MS;

const RANGE_SEPARATOR: &str = " - ";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("missing \" - \" separator in {0:?}")]
    MissingSeparator(String),
    #[error("invalid time {0:?}, expected HH:MM")]
    InvalidTime(String),
    #[error("invalid date {0:?}, expected YYYY-MM-DD")]
    InvalidDate(String),
}

/// A contiguous time range. `start <= end` is not enforced: a diff may leave
/// the period inverted, which queries treat as empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimePeriod {
    pub start: Ms,
    pub end: Ms,
}

impl TimePeriod {
    pub fn new(start: Ms, end: Ms) -> Self {
        Self { start, end }
    }

    /// Whole minutes, floored. Negative for inverted periods.
    pub fn duration(&self) -> i64 {
        (self.end - self.start).div_euclid(MINUTE_MS)
    }

    pub fn is_empty(&self) -> bool {
        self.duration() <= 0
    }

    /// Strict overlap: touching endpoints do not intersect.
    pub fn intersects(&self, other: &TimePeriod) -> bool {
        self.start < other.end && self.end > other.start
    }

    pub fn is_subperiod_of(&self, other: &TimePeriod) -> bool {
        self.start >= other.start && self.end <= other.end
    }

    pub fn intersection(&self, other: &TimePeriod) -> Option<TimePeriod> {
        self.intersects(other).then(|| {
            TimePeriod::new(self.start.max(other.start), self.end.min(other.end))
        })
    }

    /// Grow to cover `other`. Callers check that the two intersect or touch.
    pub fn merge(&mut self, other: &TimePeriod) {
        self.start = self.start.min(other.start);
        self.end = self.end.max(other.end);
    }

    /// Single-sided subtraction: keeps the left remainder when `other` starts
    /// inside `self`, otherwise the right remainder. A hole punched in the
    /// middle is not handled here, see [`TimePeriod::split_by`].
    pub fn diff(&mut self, other: &TimePeriod) {
        if self.start < other.start && other.start < self.end {
            self.end = other.start;
        } else if other.end > self.start {
            self.start = other.end;
        }
    }

    /// The parts of `self` left and right of `other`, whichever have length.
    pub fn split_by(&self, other: &TimePeriod) -> Vec<TimePeriod> {
        let mut parts = Vec::with_capacity(2);
        let left = TimePeriod::new(self.start, other.start.min(self.end));
        if left.start < left.end {
            parts.push(left);
        }
        let right = TimePeriod::new(other.end.max(self.start), self.end);
        if right.start < right.end {
            parts.push(right);
        }
        parts
    }

    /// Push `start` earlier and `end` later, e.g. for buffer-before/after.
    pub fn expand(&mut self, before_minutes: i64, after_minutes: i64) {
        self.start -= before_minutes * MINUTE_MS;
        self.end += after_minutes * MINUTE_MS;
    }

    pub fn expanded(mut self, before_minutes: i64, after_minutes: i64) -> Self {
        self.expand(before_minutes, after_minutes);
        self
    }

    /// Shift a time-of-day period onto an absolute calendar date.
    pub fn on_date(&self, date: NaiveDate) -> TimePeriod {
        let base = day_start_ms(date);
        TimePeriod::new(base + self.start, base + self.end)
    }

    /// Parse `"HH:MM - HH:MM"` into a time-of-day period (ms since midnight).
    pub fn parse_time_range(s: &str) -> Result<Self, ParseError> {
        let (start, end) = split_range(s)?;
        Ok(TimePeriod::new(parse_time(start)?, parse_time(end)?))
    }

    /// Parse `"YYYY-MM-DD - YYYY-MM-DD"` into midnight-to-midnight UTC instants.
    pub fn parse_date_range(s: &str) -> Result<Self, ParseError> {
        let (start, end) = split_range(s)?;
        Ok(TimePeriod::new(
            day_start_ms(parse_date(start)?),
            day_start_ms(parse_date(end)?),
        ))
    }

    pub fn to_time_string(&self) -> String {
        format!("{}{RANGE_SEPARATOR}{}", format_time(self.start), format_time(self.end))
    }

    pub fn to_date_string(&self) -> String {
        format!("{}{RANGE_SEPARATOR}{}", format_date(self.start), format_date(self.end))
    }
}

pub fn day_start_ms(date: NaiveDate) -> Ms {
    date.and_hms_opt(0, 0, 0)
        .unwrap_or_default()
        .and_utc()
        .timestamp_millis()
}

fn split_range(s: &str) -> Result<(&str, &str), ParseError> {
    s.trim()
        .split_once(RANGE_SEPARATOR)
        .map(|(a, b)| (a.trim(), b.trim()))
        .ok_or_else(|| ParseError::MissingSeparator(s.to_string()))
}

fn parse_time(s: &str) -> Result<Ms, ParseError> {
    let t = NaiveTime::parse_from_str(s, "%H:%M")
        .map_err(|_| ParseError::InvalidTime(s.to_string()))?;
    Ok(t.num_seconds_from_midnight() as Ms * 1000)
}

fn parse_date(s: &str) -> Result<NaiveDate, ParseError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| ParseError::InvalidDate(s.to_string()))
}

/// Time of day. Values outside one day, such as a buffer reaching past
/// midnight or an absolute instant, wrap into it.
fn format_time(ms: Ms) -> String {
    let minutes = ms.rem_euclid(DAY_MS).div_euclid(MINUTE_MS);
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

fn format_date(ms: Ms) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| ms.to_string())
}
