#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Incident entity, query filter, and aggregate statistic types.
//!
//! An [`Incident`] is a recorded criminal or disturbance event with a
//! location, a time, and a short type label. Incidents arrive either from the
//! emergency-dispatch feed poller or from direct user entry. All timestamps
//! are local wall-clock times, matching how the feed reports them.

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Label used by the grouped aggregates for incidents whose type or city is
/// empty or whitespace.
pub const UNKNOWN_LABEL: &str = "Onbekend";

/// Normalizes a description for duplicate detection: trimmed and lower-cased.
#[must_use]
pub fn normalize_description(description: &str) -> String {
    description.trim().to_lowercase()
}

/// A stored incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    /// Store-assigned surrogate key.
    pub id: i64,
    /// External id from the source feed. Empty for manually entered
    /// incidents.
    pub uid: String,
    /// Short type label (e.g. `"Diefstal"`).
    #[serde(rename = "type")]
    pub incident_type: String,
    /// Free-text description.
    pub description: String,
    /// Street name.
    pub street: String,
    /// House number, kept as text (`"12a"`).
    pub house_number: String,
    /// Postal code.
    pub postcode: String,
    /// City.
    pub city: String,
    /// Province or safety region.
    pub province: String,
    /// Latitude (WGS84).
    pub lat: f64,
    /// Longitude (WGS84).
    pub lng: f64,
    /// When the incident occurred.
    pub incident_at: NaiveDateTime,
    /// When the incident was stored. Never changes after insert.
    pub created_at: NaiveDateTime,
}

impl Incident {
    /// Whether this incident carries a usable location. `(0, 0)` is the
    /// "no location" marker.
    #[must_use]
    pub fn has_location(&self) -> bool {
        has_location(self.lat, self.lng)
    }

    /// The normalized description used as a dedupe key.
    #[must_use]
    pub fn description_key(&self) -> String {
        normalize_description(&self.description)
    }
}

/// Returns `false` only for the exact `(0, 0)` "no location" marker.
#[must_use]
#[allow(clippy::float_cmp)]
pub fn has_location(lat: f64, lng: f64) -> bool {
    !(lat == 0.0 && lng == 0.0)
}

/// An incident that has not been stored yet.
///
/// `created_at` is filled in by the repository when left as `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewIncident {
    /// External id from the source feed, or empty.
    pub uid: String,
    /// Short type label.
    #[serde(rename = "type")]
    pub incident_type: String,
    /// Free-text description.
    pub description: String,
    /// Street name.
    pub street: String,
    /// House number.
    pub house_number: String,
    /// Postal code.
    pub postcode: String,
    /// City.
    pub city: String,
    /// Province or safety region.
    pub province: String,
    /// Latitude (WGS84).
    pub lat: f64,
    /// Longitude (WGS84).
    pub lng: f64,
    /// When the incident occurred.
    pub incident_at: NaiveDateTime,
    /// When the incident was stored; `None` means "now".
    pub created_at: Option<NaiveDateTime>,
}

/// Optional, conjunctive filters for listing incidents.
///
/// Unset (or blank) filters match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentFilter {
    /// Inclusive lower bound on `incident_at`.
    pub from: Option<NaiveDateTime>,
    /// Inclusive upper bound on `incident_at`.
    pub to: Option<NaiveDateTime>,
    /// Exact type match.
    #[serde(rename = "type")]
    pub incident_type: Option<String>,
    /// Exact city match.
    pub city: Option<String>,
}

impl IncidentFilter {
    /// Type filter, treating a blank value as unset.
    #[must_use]
    pub fn type_filter(&self) -> Option<&str> {
        non_blank(self.incident_type.as_deref())
    }

    /// City filter, treating a blank value as unset.
    #[must_use]
    pub fn city_filter(&self) -> Option<&str> {
        non_blank(self.city.as_deref())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// One of the four fixed 6-hour windows of the local day.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeSlot {
    /// `[00:00, 06:00)`
    Night,
    /// `[06:00, 12:00)`
    Morning,
    /// `[12:00, 18:00)`
    Afternoon,
    /// `[18:00, 24:00)`
    Evening,
}

impl TimeSlot {
    /// Returns the slot containing the given hour of day (0-23). Hours past
    /// 23 fall into [`TimeSlot::Evening`].
    #[must_use]
    pub const fn from_hour(hour: u32) -> Self {
        match hour {
            0..=5 => Self::Night,
            6..=11 => Self::Morning,
            12..=17 => Self::Afternoon,
            _ => Self::Evening,
        }
    }

    /// Returns the slot containing the time-of-day of `at`.
    #[must_use]
    pub fn of(at: &NaiveDateTime) -> Self {
        Self::from_hour(at.hour())
    }

    /// First hour covered by this slot.
    #[must_use]
    pub const fn start_hour(self) -> u32 {
        match self {
            Self::Night => 0,
            Self::Morning => 6,
            Self::Afternoon => 12,
            Self::Evening => 18,
        }
    }

    /// Human-readable window, e.g. `"06:00-12:00"`.
    #[must_use]
    pub fn window(self) -> String {
        format!("{:02}:00-{:02}:00", self.start_hour(), self.start_hour() + 6)
    }

    /// Returns all variants in time-of-day order.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Night, Self::Morning, Self::Afternoon, Self::Evening]
    }
}

/// Incident count for one label (type or city).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelCount {
    /// The grouped value, or [`UNKNOWN_LABEL`] for blanks.
    pub label: String,
    /// Number of incidents.
    pub count: u64,
}

/// Incident count for one time-of-day window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSlotCount {
    /// The window.
    pub slot: TimeSlot,
    /// Number of incidents.
    pub count: u64,
}

/// Incident count for one calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayCount {
    /// The local calendar day.
    pub date: NaiveDate,
    /// Number of incidents.
    pub count: u64,
}

/// Incident counts for the current and the preceding calendar month.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthComparison {
    /// Count for the current calendar month.
    pub current: u64,
    /// Count for the previous calendar month.
    pub previous: u64,
}

impl MonthComparison {
    /// Signed change from the previous month to the current one.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub const fn difference(self) -> i64 {
        self.current as i64 - self.previous as i64
    }

    /// Percentage change relative to the previous month. `None` when the
    /// previous month had no incidents.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn percent_change(self) -> Option<f64> {
        if self.previous == 0 {
            return None;
        }
        Some(self.difference() as f64 / self.previous as f64 * 100.0)
    }
}
