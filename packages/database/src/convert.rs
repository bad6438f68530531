//! Row and timestamp conversion between `DuckDB` and the incident models.
//!
//! Timestamps are bound as `YYYY-MM-DD HH:MM:SS` text and read back through
//! `strftime`, so no `DuckDB` chrono integration is needed.

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use wijkagent_incident_models::Incident;

use crate::DbError;

/// Text format used when binding timestamps.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Column list shared by every query that returns full incident rows.
///
/// Order must match [`RawIncidentRow::from_row`].
pub const SELECT_COLUMNS: &str = "id, uid, incident_type, description, street, house_number, \
     postcode, city, province, lat, lng, \
     strftime(incident_at, '%Y-%m-%d %H:%M:%S'), \
     strftime(created_at, '%Y-%m-%d %H:%M:%S')";

/// Formats a timestamp for binding as a query parameter.
#[must_use]
pub fn format_timestamp(at: &NaiveDateTime) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Formats the start of a calendar day for binding as a query parameter.
#[must_use]
pub fn format_day_start(day: NaiveDate) -> String {
    format_timestamp(&day.and_time(chrono::NaiveTime::MIN))
}

/// Parses a `DuckDB` timestamp text representation.
///
/// Accepts values with and without fractional seconds.
#[must_use]
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT) {
        return Some(dt);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(dt);
    }
    log::warn!("Failed to parse timestamp: {s:?}");
    None
}

/// Current local wall-clock time, truncated to whole seconds.
#[must_use]
pub fn now_local() -> NaiveDateTime {
    let now = chrono::Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

/// An incident row as read from `DuckDB`, before timestamp parsing.
pub struct RawIncidentRow {
    id: i64,
    uid: Option<String>,
    incident_type: String,
    description: String,
    street: String,
    house_number: String,
    postcode: String,
    city: String,
    province: String,
    lat: f64,
    lng: f64,
    incident_at: String,
    created_at: String,
}

impl RawIncidentRow {
    /// Reads a row selected with [`SELECT_COLUMNS`].
    ///
    /// # Errors
    ///
    /// Returns a `DuckDB` error if a column has an unexpected type.
    pub fn from_row(row: &duckdb::Row<'_>) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            uid: row.get(1)?,
            incident_type: row.get(2)?,
            description: row.get(3)?,
            street: row.get(4)?,
            house_number: row.get(5)?,
            postcode: row.get(6)?,
            city: row.get(7)?,
            province: row.get(8)?,
            lat: row.get(9)?,
            lng: row.get(10)?,
            incident_at: row.get(11)?,
            created_at: row.get(12)?,
        })
    }

    /// Converts the raw row into an [`Incident`].
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Conversion`] if a stored timestamp cannot be parsed.
    pub fn into_incident(self) -> Result<Incident, DbError> {
        let incident_at = parse_timestamp(&self.incident_at).ok_or_else(|| DbError::Conversion {
            message: format!(
                "incident {} has invalid incident_at {:?}",
                self.id, self.incident_at
            ),
        })?;
        let created_at = parse_timestamp(&self.created_at).ok_or_else(|| DbError::Conversion {
            message: format!(
                "incident {} has invalid created_at {:?}",
                self.id, self.created_at
            ),
        })?;

        Ok(Incident {
            id: self.id,
            uid: self.uid.unwrap_or_default(),
            incident_type: self.incident_type,
            description: self.description,
            street: self.street,
            house_number: self.house_number,
            postcode: self.postcode,
            city: self.city,
            province: self.province,
            lat: self.lat,
            lng: self.lng,
            incident_at,
            created_at,
        })
    }
}

/// Converts a `COUNT(*)` result into an unsigned count.
#[must_use]
pub fn count_to_u64(count: i64) -> u64 {
    u64::try_from(count).unwrap_or(0)
}
