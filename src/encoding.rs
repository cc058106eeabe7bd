//! Compact numeric encodings for meeting days, meeting times and statuses
//!
//! Days are a bitmask (Monday=1 … Friday=16). Times are compressed into a
//! small numeric range where one unit is ten minutes and `0` is 8:00 AM, so
//! two times compare with ordinary numeric comparison and overlap tests reduce
//! to interval arithmetic.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::utils::error::EncodingError;

pub const HOUR_FACTOR: f64 = 6.0;
pub const MINUTE_FACTOR: f64 = 0.1;
pub const ZERO_ADJUST: f64 = 48.0;

/// Encoded value for a meeting without a scheduled time.
///
/// Valid encodings span `[-48.0, 95.9]` (12:00 AM to 11:59 PM).
pub const NULL_TIME: f64 = -420.0;

pub const MONDAY: u8 = 1;
pub const TUESDAY: u8 = 2;
pub const WEDNESDAY: u8 = 4;
pub const THURSDAY: u8 = 8;
pub const FRIDAY: u8 = 16;

const WEEKDAY_COUNT: u8 = 5;

// ============================================================================
// Days
// ============================================================================

/// Bit flag for a single upstream day token. Weekend days map to zero.
pub fn day_flag(token: &str) -> Result<u8, EncodingError> {
    match token.trim().to_ascii_uppercase().as_str() {
        "M" | "MON" => Ok(MONDAY),
        "T" | "TU" | "TUE" => Ok(TUESDAY),
        "W" | "WED" => Ok(WEDNESDAY),
        "TH" | "R" | "THU" => Ok(THURSDAY),
        "F" | "FRI" => Ok(FRIDAY),
        "S" | "SA" | "SAT" | "U" | "SU" | "SUN" => Ok(0),
        _ => Err(EncodingError::UnknownDay(token.to_string())),
    }
}

/// Bitwise OR of the flags for every day in `days`
pub fn days_to_value<S: AsRef<str>>(days: &[S]) -> Result<u8, EncodingError> {
    days.iter()
        .try_fold(0u8, |acc, day| Ok(acc | day_flag(day.as_ref())?))
}

/// Day indices (Monday=1 … Friday=5) of every set bit, ascending
pub fn value_to_days(value: u8) -> Vec<u8> {
    (0..WEEKDAY_COUNT)
        .filter(|bit| value & (1 << bit) != 0)
        .map(|bit| bit + 1)
        .collect()
}

// ============================================================================
// Times
// ============================================================================

fn time_pattern() -> &'static Regex {
    static TIME_RE: OnceLock<Regex> = OnceLock::new();
    TIME_RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(\d{1,2}):(\d{2})\s*([ap])\.?m\.?\s*$").expect("Invalid regex pattern")
    })
}

fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Encode a 12-hour clock string such as `"1:30 PM"`.
///
/// `None` encodes as [`NULL_TIME`].
pub fn time_to_value(time: Option<&str>) -> Result<f64, EncodingError> {
    let Some(time) = time else {
        return Ok(NULL_TIME);
    };

    let invalid = || EncodingError::InvalidTime(time.to_string());
    let caps = time_pattern().captures(time).ok_or_else(invalid)?;

    let hour: u32 = caps[1].parse().map_err(|_| invalid())?;
    let minute: u32 = caps[2].parse().map_err(|_| invalid())?;
    if !(1..=12).contains(&hour) || minute > 59 {
        return Err(invalid());
    }

    let hour = if hour == 12 { 0 } else { hour };
    let mut raw = f64::from(hour) * HOUR_FACTOR + f64::from(minute) * MINUTE_FACTOR - ZERO_ADJUST;
    if caps[3].eq_ignore_ascii_case("p") {
        raw += 12.0 * HOUR_FACTOR;
    }

    Ok(round_tenth(raw))
}

/// Integer form of an encoded time (tenths of a unit, i.e. minutes from 8:00 AM)
pub fn time_key(value: f64) -> i32 {
    (value * 10.0).round() as i32
}

/// Decode an encoded time into a 24-hour `(hour, minute)` pair
pub fn value_to_time(value: f64) -> Option<(u8, u8)> {
    if time_key(value) == time_key(NULL_TIME) {
        return None;
    }

    let minutes = time_key(value) + (ZERO_ADJUST * 10.0) as i32;
    if !(0..24 * 60).contains(&minutes) {
        return None;
    }

    Some(((minutes / 60) as u8, (minutes % 60) as u8))
}

/// Render an encoded time as `"H:MM AM/PM"`
pub fn format_time(value: f64) -> Option<String> {
    let (hour, minute) = value_to_time(value)?;
    let meridiem = if hour >= 12 { "PM" } else { "AM" };
    let display_hour = match hour % 12 {
        0 => 12,
        h => h,
    };
    Some(format!("{display_hour}:{minute:02} {meridiem}"))
}

/// A weekly meeting in encoded form
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Meeting {
    pub days: u8,
    pub start: f64,
    pub end: f64,
}

impl Meeting {
    pub fn is_scheduled(&self) -> bool {
        self.days != 0 && time_key(self.start) != time_key(NULL_TIME)
    }
}

/// Two meetings conflict when they share a day and their time ranges overlap.
/// Unscheduled meetings never conflict.
pub fn meetings_conflict(a: &Meeting, b: &Meeting) -> bool {
    a.is_scheduled()
        && b.is_scheduled()
        && a.days & b.days != 0
        && time_key(a.start) < time_key(b.end)
        && time_key(b.start) < time_key(a.end)
}

// ============================================================================
// Status
// ============================================================================

/// Enrollment status shared by sections and courses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Open,
    Closed,
    Canceled,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Open => "open",
            Status::Closed => "closed",
            Status::Canceled => "canceled",
        }
    }

    /// Upstream status with unrecognized values treated as closed.
    pub fn from_upstream(raw: Option<&str>) -> Self {
        match raw.map(str::parse::<Status>) {
            Some(Ok(status)) => status,
            Some(Err(_)) => {
                tracing::warn!(status = ?raw, "Unrecognized section status, treating as closed");
                Status::Closed
            }
            None => {
                tracing::warn!("Missing section status, treating as closed");
                Status::Closed
            }
        }
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "open" => Ok(Status::Open),
            "closed" => Ok(Status::Closed),
            "canceled" | "cancelled" => Ok(Status::Canceled),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Section category: the first character of the section title ("L01" → 'L')
pub fn section_category(title: &str) -> char {
    title
        .trim()
        .chars()
        .next()
        .map(|c| c.to_ascii_uppercase())
        .unwrap_or('?')
}

/// Course status from its sections' `(title, status)` pairs.
///
/// Canceled when every section is canceled; open when every category has at
/// least one open section; closed otherwise (including no sections at all).
pub fn derive_course_status<'a, I>(sections: I) -> Status
where
    I: IntoIterator<Item = (&'a str, Status)>,
{
    let mut categories: BTreeMap<char, bool> = BTreeMap::new();
    let mut all_canceled = true;

    for (title, status) in sections {
        let satisfied = categories.entry(section_category(title)).or_insert(false);
        *satisfied |= status == Status::Open;
        all_canceled &= status == Status::Canceled;
    }

    if categories.is_empty() {
        Status::Closed
    } else if all_canceled {
        Status::Canceled
    } else if categories.values().all(|open| *open) {
        Status::Open
    } else {
        Status::Closed
    }
}
