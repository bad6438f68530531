#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Background ingestion of dispatch-feed incidents.
//!
//! A [`Poller`] fetches the feed once per tick, runs every item through the
//! filter chain (uid, service, dedupe, location), stores the survivors in
//! the [`IncidentRepository`], and publishes each stored incident on the
//! [`IncidentNotifier`]. Ticks never overlap: a tick that fires while the
//! previous one is still running is skipped.

pub mod config;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use wijkagent_database::{DbError, IncidentRepository};
use wijkagent_feed::{FeedClient, FeedError, FeedItem, HttpFeedClient};
use wijkagent_incident_models::Incident;
use wijkagent_ingest_models::{PollerConfig, SkipReason, TickReport};
use wijkagent_notifier::IncidentNotifier;

use crate::config::ConfigError;

/// Errors that can occur while setting up or running ingestion.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// Feed client error.
    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// What happened to a single feed item.
#[derive(Debug)]
enum ItemOutcome {
    Inserted {
        incident: Incident,
        notify_failed: bool,
    },
    Skipped(SkipReason),
}

/// Clears the in-flight flag when a tick ends, including by panic.
struct TickGuard<'a>(&'a AtomicBool);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Periodic feed poller.
pub struct Poller {
    repository: Arc<IncidentRepository>,
    notifier: Arc<IncidentNotifier>,
    feed: Arc<dyn FeedClient>,
    service: String,
    running: AtomicBool,
}

impl std::fmt::Debug for Poller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("feed", &self.feed.endpoint())
            .field("service", &self.service)
            .field("running", &self.running.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Poller {
    /// Creates a poller that accepts items whose `dienst` equals `service`
    /// (case-insensitive).
    #[must_use]
    pub fn new(
        repository: Arc<IncidentRepository>,
        notifier: Arc<IncidentNotifier>,
        feed: Arc<dyn FeedClient>,
        service: impl Into<String>,
    ) -> Self {
        Self {
            repository,
            notifier,
            feed,
            service: service.into(),
            running: AtomicBool::new(false),
        }
    }

    /// Creates a poller reading the configured feed URL over HTTP.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Config`] if no feed URL is configured and
    /// [`IngestError::Feed`] if the HTTP client cannot be built.
    pub fn from_config(
        config: &PollerConfig,
        repository: Arc<IncidentRepository>,
        notifier: Arc<IncidentNotifier>,
    ) -> Result<Self, IngestError> {
        let url = config::require_api_url(config)?;
        let feed = HttpFeedClient::new(url, config.request_timeout())?;
        Ok(Self::new(
            repository,
            notifier,
            Arc::new(feed),
            config.service.clone(),
        ))
    }

    /// Whether a tick is currently in flight.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Runs one tick, unless one is already in flight.
    ///
    /// Fetch and parse failures end the tick early and are reported in the
    /// returned [`TickReport`]; per-item failures are counted and the rest
    /// of the batch still runs.
    pub async fn poll_once(&self) -> TickReport {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::debug!("Previous tick still running, skipping this one");
            return TickReport::overlapped();
        }
        let _guard = TickGuard(&self.running);

        self.tick().await
    }

    async fn tick(&self) -> TickReport {
        let mut report = TickReport::default();

        let items = match self.feed.fetch().await {
            Ok(items) => items,
            Err(e) => {
                log::warn!("Failed to fetch {}: {e}", self.feed.endpoint());
                report.fetch_failed = true;
                return report;
            }
        };
        report.fetched = u64::try_from(items.len()).unwrap_or(u64::MAX);

        for value in &items {
            match self.process_item(FeedItem::from_json(value)) {
                Ok(ItemOutcome::Inserted {
                    incident,
                    notify_failed,
                }) => {
                    report.inserted += 1;
                    if notify_failed {
                        report.notify_failures += 1;
                    }
                    log::info!(
                        "Inserted incident {} uid={} ({}) at {},{}",
                        incident.id,
                        incident.uid,
                        incident.incident_type,
                        incident.lat,
                        incident.lng
                    );
                }
                Ok(ItemOutcome::Skipped(reason)) => report.record_skip(reason),
                Err(e) => {
                    log::error!("Failed to process feed item: {e}");
                    report.failed += 1;
                }
            }
        }

        if report.fetched > 0 {
            log::info!("Tick complete: {report}");
        } else {
            log::debug!("Tick complete: {report}");
        }
        report
    }

    fn process_item(&self, item: FeedItem) -> Result<ItemOutcome, IngestError> {
        let uid = match item.screen(&self.service) {
            Ok(uid) => uid.to_string(),
            Err(reason) => {
                log::debug!(
                    "Skipping item uid={:?} dienst={:?}: {reason}",
                    item.uid,
                    item.service
                );
                return Ok(ItemOutcome::Skipped(reason));
            }
        };

        let incident_type = item.incident_type();

        if self.repository.exists_by_uid(&uid)? {
            log::debug!("Skipping existing item uid={uid}");
            return Ok(ItemOutcome::Skipped(SkipReason::DuplicateUid));
        }

        if self.repository.exists_by_description(item.description())? {
            log::debug!("Skipping item uid={uid}: same description already stored");
            return Ok(ItemOutcome::Skipped(SkipReason::DuplicateDescription));
        }

        let coordinates = item.coordinates();
        if !wijkagent_incident_models::has_location(coordinates.0, coordinates.1) {
            log::debug!("Skipping item uid={uid}: coordinates are 0,0");
            return Ok(ItemOutcome::Skipped(SkipReason::NoLocation));
        }

        let incident_at = item.incident_at(chrono::Local::now().naive_local());
        let new = item.into_new_incident(uid, incident_type, coordinates, incident_at);
        let incident = self.repository.add(new)?;

        let notify_failed = match self.notifier.publish(&incident) {
            Ok(_) => false,
            Err(e) => {
                log::warn!("Notifier publish failed for uid={}: {e}", incident.uid);
                true
            }
        };

        Ok(ItemOutcome::Inserted {
            incident,
            notify_failed,
        })
    }

    /// Starts ticking every `interval`, the first tick immediately.
    ///
    /// Each tick runs on its own task, so a slow tick does not delay the
    /// timer; ticks that fire while one is in flight are skipped by
    /// [`Self::poll_once`].
    #[must_use]
    pub fn run(self: Arc<Self>, interval: Duration) -> PollerHandle {
        log::info!(
            "Polling {} every {}s",
            self.feed.endpoint(),
            interval.as_secs_f64()
        );

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let poller = Arc::clone(&self);
                tokio::spawn(async move {
                    poller.poll_once().await;
                });
            }
        });

        PollerHandle { task }
    }
}

/// Handle to a running [`Poller::run`] loop.
#[derive(Debug)]
pub struct PollerHandle {
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Stops scheduling new ticks. A tick already in flight runs to
    /// completion.
    pub fn stop(self) {
        self.task.abort();
        log::info!("Poller stopped");
    }

    /// Whether the timer loop has ended.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
