use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};

use crate::error::TimestampError;

/// Layouts carrying an explicit UTC offset.
const WITH_OFFSET: &[&str] = &[
    "%d/%b/%Y:%H:%M:%S%.f %z", // access log: 21/Jan/2013:00:00:00 +0000
    "%Y-%m-%d %H:%M:%S%.f %z",
    "%Y-%m-%d %H:%M:%S%.f%z",
];

/// Layouts without an offset, read as UTC.
const NAIVE: &[&str] = &[
    "%d/%b/%Y:%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%a %b %d %H:%M:%S%.f %Y", // apache error log
];

const DATE_ONLY: &[&str] = &["%Y-%m-%d", "%d/%b/%Y"];

/// Convert an embedded log datetime into UTC seconds since the epoch.
pub fn normalize(raw: &str) -> Result<f64, TimestampError> {
    parse_utc(raw)
        .map(|dt| epoch_seconds(&dt))
        .ok_or_else(|| TimestampError(raw.to_string()))
}

pub fn parse_utc(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    let with_offset = WITH_OFFSET
        .iter()
        .find_map(|fmt| DateTime::parse_from_str(s, fmt).ok())
        .or_else(|| DateTime::parse_from_rfc3339(s).ok())
        .or_else(|| DateTime::parse_from_rfc2822(s).ok());
    if let Some(dt) = with_offset {
        return Some(to_utc(dt));
    }

    if let Some(naive) = NAIVE
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
    {
        return Some(naive.and_utc());
    }

    DATE_ONLY
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn to_utc(dt: DateTime<FixedOffset>) -> DateTime<Utc> {
    dt.with_timezone(&Utc)
}

fn epoch_seconds(dt: &DateTime<Utc>) -> f64 {
    dt.timestamp() as f64 + f64::from(dt.timestamp_subsec_nanos()) / 1e9
}
