use chrono::{DateTime, Datelike, NaiveDateTime, Timelike, Utc};
use chrono_tz::Tz;
use common::{Error, Result};
use std::str::FromStr;

/// Zone in which epoch timestamps are turned into calendar values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeZonePolicy {
    Utc,
    /// Zone of the executing host. Not portable across machines.
    Local,
    Named(Tz),
}

impl FromStr for TimeZonePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "" | "UTC" | "utc" | "Utc" => Ok(Self::Utc),
            "local" | "Local" | "LOCAL" => Ok(Self::Local),
            name => name
                .parse::<Tz>()
                .map(Self::Named)
                .map_err(|e| Error::InvalidInput(format!("Unknown timezone '{}': {}", name, e))),
        }
    }
}

/// Calendar attributes of one play timestamp.
///
/// `week` is the ISO-8601 week number, `weekday` counts 1 = Sunday through
/// 7 = Saturday.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeParts {
    pub start_time: NaiveDateTime,
    pub hour: i32,
    pub day: i32,
    pub week: i32,
    pub month: i32,
    pub year: i32,
    pub weekday: i32,
}

impl TimeParts {
    /// Wall-clock start time as epoch milliseconds, the storage form of `start_time`.
    pub fn start_time_millis(&self) -> i64 {
        self.start_time.and_utc().timestamp_millis()
    }
}

/// Splits epoch milliseconds into calendar attributes under `policy`.
/// Returns `None` for instants chrono cannot represent.
pub fn decompose(epoch_ms: i64, policy: TimeZonePolicy) -> Option<TimeParts> {
    let instant = DateTime::<Utc>::from_timestamp_millis(epoch_ms)?;
    let start_time = match policy {
        TimeZonePolicy::Utc => instant.naive_utc(),
        TimeZonePolicy::Local => instant.with_timezone(&chrono::Local).naive_local(),
        TimeZonePolicy::Named(tz) => instant.with_timezone(&tz).naive_local(),
    };

    Some(TimeParts {
        start_time,
        hour: start_time.hour() as i32,
        day: start_time.day() as i32,
        week: start_time.iso_week().week() as i32,
        month: start_time.month() as i32,
        year: start_time.year(),
        weekday: start_time.weekday().number_from_sunday() as i32,
    })
}
