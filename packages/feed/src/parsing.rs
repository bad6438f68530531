//! Coordinate and timestamp parsing for feed items.

use std::sync::LazyLock;

use chrono::{DateTime, Local, NaiveDateTime};
use regex::Regex;

/// Field widths for the joined `datum` + `tijd` pair. chrono accepts
/// single-digit values for every field; only the hour may have one here.
static DATE_TIME_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9]{2}-[0-9]{2}-[0-9]{4} [0-9]{1,2}:[0-9]{2}(:[0-9]{2})?$")
        .unwrap_or_else(|_| unreachable!())
});

/// Date/time layouts accepted for the `datum` + `tijd` pair, joined by a
/// single space.
const DATE_TIME_FORMATS: [&str; 2] = ["%d-%m-%Y %H:%M:%S", "%d-%m-%Y %H:%M"];

/// Parses a `"lat,lng"` pair. Surrounding whitespace around either number
/// is ignored; anything past the second number is ignored.
///
/// Returns `None` if fewer than two numbers are present or either is not a
/// finite decimal.
#[must_use]
pub fn parse_lat_lng(s: &str) -> Option<(f64, f64)> {
    let mut parts = s.split(',').map(str::trim).filter(|p| !p.is_empty());
    let lat = parse_coordinate(parts.next()?)?;
    let lng = parse_coordinate(parts.next()?)?;
    Some((lat, lng))
}

fn parse_coordinate(s: &str) -> Option<f64> {
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parses the feed's separate date (`dd-MM-yyyy`) and time (`HH:mm:ss`,
/// `H:mm:ss`, `HH:mm`, `H:mm`) fields as local wall-clock time. Values
/// are taken as given; surrounding whitespace is a mismatch.
#[must_use]
pub fn parse_date_time(datum: &str, tijd: &str) -> Option<NaiveDateTime> {
    let joined = format!("{datum} {tijd}");
    if !DATE_TIME_SHAPE.is_match(&joined) {
        return None;
    }
    DATE_TIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(&joined, format).ok())
}

/// Parses a decimal string of seconds since the Unix epoch and converts it
/// to local wall-clock time.
#[must_use]
pub fn parse_epoch_seconds(s: &str) -> Option<NaiveDateTime> {
    let seconds = s.trim().parse::<i64>().ok()?;
    DateTime::from_timestamp(seconds, 0).map(|utc| utc.with_timezone(&Local).naive_local())
}
