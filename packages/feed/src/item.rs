//! Typed view of one raw feed item.

use chrono::NaiveDateTime;
use serde_json::Value;
use wijkagent_incident_models::NewIncident;
use wijkagent_ingest_models::SkipReason;

use crate::classify::derive_type;
use crate::parsing::{parse_date_time, parse_epoch_seconds, parse_lat_lng};

/// The string fields of a feed item. Missing fields, and fields whose value
/// is not a JSON string, are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedItem {
    pub uid: Option<String>,
    /// Dispatching service, `dienst`.
    pub service: Option<String>,
    /// Free-text report, `melding`.
    pub description: Option<String>,
    /// `plaats`.
    pub city: Option<String>,
    /// `"lat,lng"` of the incident itself.
    pub latlong: Option<String>,
    /// `"lat,lng"` of the place, used when `latlong` is absent.
    pub place_latlon: Option<String>,
    /// `dd-MM-yyyy`.
    pub date: Option<String>,
    pub time: Option<String>,
    /// Seconds since the Unix epoch, as a string.
    pub timestamp: Option<String>,
    /// `locatie`.
    pub street: Option<String>,
    pub postcode: Option<String>,
    /// `regio`.
    pub province: Option<String>,
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.trim().is_empty())
}

impl FeedItem {
    /// Reads the known fields out of a JSON value. Non-object values yield
    /// an item with every field absent.
    #[must_use]
    pub fn from_json(value: &Value) -> Self {
        Self {
            uid: string_field(value, "uid"),
            service: string_field(value, "dienst"),
            description: string_field(value, "melding"),
            city: string_field(value, "plaats"),
            latlong: string_field(value, "latlong"),
            place_latlon: string_field(value, "plaats_latlon"),
            date: string_field(value, "datum"),
            time: string_field(value, "tijd"),
            timestamp: string_field(value, "timestamp"),
            street: string_field(value, "locatie"),
            postcode: string_field(value, "postcode"),
            province: string_field(value, "regio"),
        }
    }

    /// The external id, if present and not blank.
    #[must_use]
    pub fn uid(&self) -> Option<&str> {
        non_blank(self.uid.as_deref())
    }

    /// Checks the item carries a uid and comes from `service`
    /// (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns [`SkipReason::MissingUid`] or [`SkipReason::WrongService`].
    pub fn screen(&self, service: &str) -> Result<&str, SkipReason> {
        let uid = self.uid().ok_or(SkipReason::MissingUid)?;
        let dienst = self.service.as_deref().unwrap_or_default();
        if dienst.to_lowercase() != service.to_lowercase() {
            return Err(SkipReason::WrongService);
        }
        Ok(uid)
    }

    /// The description as received, or empty.
    #[must_use]
    pub fn description(&self) -> &str {
        self.description.as_deref().unwrap_or_default()
    }

    /// Incident type derived from the description, falling back to the
    /// item's service value.
    #[must_use]
    pub fn incident_type(&self) -> String {
        derive_type(
            self.description(),
            self.service.as_deref().unwrap_or_default(),
        )
    }

    /// Coordinates from `latlong` when it is present and not blank,
    /// otherwise from `plaats_latlon`. Unparseable input yields `(0,0)`.
    #[must_use]
    pub fn coordinates(&self) -> (f64, f64) {
        non_blank(self.latlong.as_deref())
            .or_else(|| non_blank(self.place_latlon.as_deref()))
            .and_then(parse_lat_lng)
            .unwrap_or((0.0, 0.0))
    }

    /// When the incident happened.
    ///
    /// If both `datum` and `tijd` are present they alone decide: an
    /// unparseable pair yields `fallback` and `timestamp` is not consulted.
    /// Otherwise `timestamp` is used, else `fallback`.
    #[must_use]
    pub fn incident_at(&self, fallback: NaiveDateTime) -> NaiveDateTime {
        match (self.date.as_deref(), self.time.as_deref()) {
            (Some(date), Some(time)) => parse_date_time(date, time).unwrap_or(fallback),
            _ => self
                .timestamp
                .as_deref()
                .and_then(parse_epoch_seconds)
                .unwrap_or(fallback),
        }
    }

    /// Builds the incident to store from an item that passed every check.
    #[must_use]
    pub fn into_new_incident(
        self,
        uid: String,
        incident_type: String,
        (lat, lng): (f64, f64),
        incident_at: NaiveDateTime,
    ) -> NewIncident {
        NewIncident {
            uid,
            incident_type,
            description: self.description.unwrap_or_default(),
            street: self.street.unwrap_or_default(),
            house_number: String::new(),
            postcode: self.postcode.unwrap_or_default(),
            city: self.city.unwrap_or_default(),
            province: self.province.unwrap_or_default(),
            lat,
            lng,
            incident_at,
            created_at: None,
        }
    }
}
