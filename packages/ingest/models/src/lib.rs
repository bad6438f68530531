#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Poller configuration, skip reasons, and tick report types.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

/// Poll interval used when none (or zero) is configured.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;

/// HTTP timeout used when none (or zero) is configured.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Feed `dienst` value an item must carry to be ingested.
pub const DEFAULT_SERVICE: &str = "Politie";

/// Configuration for the feed poller.
///
/// Every field has a default so a partial TOML file deserializes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PollerConfig {
    /// Feed endpoint. Required to poll.
    pub api_url: Option<String>,
    /// Seconds between ticks. Zero means the default.
    pub poll_interval_secs: u64,
    /// Seconds before a feed request is abandoned. Zero means the default.
    pub request_timeout_secs: u64,
    /// Accepted value of the feed's `dienst` field, compared
    /// case-insensitively.
    pub service: String,
    /// `DuckDB` file to store incidents in. `None` means the default data
    /// directory.
    pub database_path: Option<PathBuf>,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            service: DEFAULT_SERVICE.to_string(),
            database_path: None,
        }
    }
}

impl PollerConfig {
    /// Effective tick interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        if self.poll_interval_secs == 0 {
            Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS)
        } else {
            Duration::from_secs(self.poll_interval_secs)
        }
    }

    /// Effective HTTP request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        if self.request_timeout_secs == 0 {
            Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)
        } else {
            Duration::from_secs(self.request_timeout_secs)
        }
    }
}

/// Why a feed item was not ingested.
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
    AsRefStr,
    Display,
    EnumIter,
    EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SkipReason {
    /// The item has no `uid`, or it is blank.
    MissingUid,
    /// The item's `dienst` is not the configured service.
    WrongService,
    /// An incident with the same `uid` is already stored.
    DuplicateUid,
    /// An incident with the same normalized description is already stored.
    DuplicateDescription,
    /// The item has no usable coordinates, or they are `(0,0)`.
    NoLocation,
}

/// Outcome of one poll tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    /// The tick did not run because the previous one was still in flight.
    pub skipped_overlap: bool,
    /// The fetch or parse failed and no items were processed.
    pub fetch_failed: bool,
    /// Items received from the feed.
    pub fetched: u64,
    /// Items stored as new incidents.
    pub inserted: u64,
    /// Items rejected by the filter chain, per reason.
    pub skipped: BTreeMap<SkipReason, u64>,
    /// Items whose insert failed.
    pub failed: u64,
    /// Inserted incidents for which at least one subscriber failed.
    pub notify_failures: u64,
}

impl TickReport {
    /// Report for a tick that yielded to one already in flight.
    #[must_use]
    pub fn overlapped() -> Self {
        Self {
            skipped_overlap: true,
            ..Self::default()
        }
    }

    /// Records one rejected item.
    pub fn record_skip(&mut self, reason: SkipReason) {
        *self.skipped.entry(reason).or_insert(0) += 1;
    }

    /// Number of items skipped for `reason`.
    #[must_use]
    pub fn skipped_for(&self, reason: SkipReason) -> u64 {
        self.skipped.get(&reason).copied().unwrap_or(0)
    }

    /// Total number of rejected items.
    #[must_use]
    pub fn total_skipped(&self) -> u64 {
        self.skipped.values().sum()
    }
}

impl std::fmt::Display for TickReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.skipped_overlap {
            return f.write_str("skipped (previous tick still running)");
        }
        if self.fetch_failed {
            return f.write_str("fetch failed");
        }
        write!(
            f,
            "fetched={} inserted={} skipped={} failed={}",
            self.fetched,
            self.inserted,
            self.total_skipped(),
            self.failed
        )?;
        for (reason, count) in &self.skipped {
            write!(f, " {reason}={count}")?;
        }
        if self.notify_failures > 0 {
            write!(f, " notify_failures={}", self.notify_failures)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: PollerConfig =
            toml::from_str("api_url = \"https://example.test/feed\"").unwrap();
        assert_eq!(config.api_url.as_deref(), Some("https://example.test/feed"));
        assert_eq!(config.poll_interval_secs, DEFAULT_POLL_INTERVAL_SECS);
        assert_eq!(config.service, "Politie");
        assert!(config.database_path.is_none());
    }

    #[test]
    fn unknown_toml_keys_are_rejected() {
        assert!(toml::from_str::<PollerConfig>("interval = 5").is_err());
    }

    #[test]
    fn zero_interval_means_default() {
        let config = PollerConfig {
            poll_interval_secs: 0,
            request_timeout_secs: 0,
            ..PollerConfig::default()
        };
        assert_eq!(config.poll_interval(), Duration::from_secs(10));
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn skip_reason_names_round_trip() {
        for reason in SkipReason::iter() {
            assert_eq!(SkipReason::from_str(reason.as_ref()).unwrap(), reason);
        }
        assert_eq!(SkipReason::NoLocation.to_string(), "no_location");
    }

    #[test]
    fn report_counts_skips_per_reason() {
        let mut report = TickReport {
            fetched: 4,
            inserted: 1,
            ..TickReport::default()
        };
        report.record_skip(SkipReason::DuplicateUid);
        report.record_skip(SkipReason::DuplicateUid);
        report.record_skip(SkipReason::WrongService);

        assert_eq!(report.skipped_for(SkipReason::DuplicateUid), 2);
        assert_eq!(report.skipped_for(SkipReason::MissingUid), 0);
        assert_eq!(report.total_skipped(), 3);
        assert_eq!(
            report.to_string(),
            "fetched=4 inserted=1 skipped=3 failed=0 wrong_service=1 duplicate_uid=2"
        );
    }

    #[test]
    fn overlapped_report_says_so() {
        let report = TickReport::overlapped();
        assert!(report.skipped_overlap);
        assert_eq!(report.fetched, 0);
    }
}
