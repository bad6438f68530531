#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! In-process publish/subscribe for newly stored incidents.
//!
//! An [`IncidentNotifier`] is an ordered registry of [`IncidentSubscriber`]s.
//! [`IncidentNotifier::publish`] delivers synchronously, on the caller's
//! task, to every subscriber registered at the moment of the call, in
//! registration order. There is no buffering: subscribers registered after a
//! publish never see it.
//!
//! The notifier is shared by passing an `Arc<IncidentNotifier>` to whoever
//! needs it; there is no global instance.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use wijkagent_incident_models::Incident;

/// Error type subscribers return when they fail to handle an incident.
pub type SubscriberError = Box<dyn std::error::Error + Send + Sync>;

/// Something interested in newly stored incidents.
///
/// Implementations run on the publisher's task and must not block; a slow
/// subscriber delays the insert path that published the incident.
pub trait IncidentSubscriber: Send + Sync {
    /// Called once for every published incident.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscriber could not handle the incident. The
    /// error is reported to the publisher; other subscribers still receive
    /// the incident. A panic is caught and reported the same way.
    fn on_incident_added(&self, incident: &Incident) -> Result<(), SubscriberError>;
}

impl<F> IncidentSubscriber for F
where
    F: Fn(&Incident) -> Result<(), SubscriberError> + Send + Sync,
{
    fn on_incident_added(&self, incident: &Incident) -> Result<(), SubscriberError> {
        self(incident)
    }
}

/// Handle returned by [`IncidentNotifier::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One failed delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberFailure {
    /// The subscriber that failed.
    pub id: SubscriptionId,
    /// The subscriber's error message.
    pub message: String,
}

/// Errors reported by [`IncidentNotifier::publish`].
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// One or more subscribers returned an error. Every other subscriber
    /// still received the incident.
    #[error("{} of {total} subscriber(s) failed for incident {incident_id}", .failed.len())]
    Subscribers {
        /// Id of the published incident.
        incident_id: i64,
        /// Number of subscribers the incident was delivered to.
        total: usize,
        /// The failed deliveries, in delivery order.
        failed: Vec<SubscriberFailure>,
    },
}

type Registry = Vec<(SubscriptionId, Arc<dyn IncidentSubscriber>)>;

/// Ordered observer registry with synchronous delivery.
#[derive(Default)]
pub struct IncidentNotifier {
    subscribers: RwLock<Registry>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for IncidentNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncidentNotifier")
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}

impl IncidentNotifier {
    /// Creates a notifier with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber at the end of the delivery order.
    pub fn subscribe(&self, subscriber: Arc<dyn IncidentSubscriber>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, subscriber));
        log::debug!("Subscriber {id} registered");
        id
    }

    /// Registers a closure as a subscriber.
    pub fn subscribe_fn<F>(&self, f: F) -> SubscriptionId
    where
        F: Fn(&Incident) -> Result<(), SubscriberError> + Send + Sync + 'static,
    {
        self.subscribe(Arc::new(f))
    }

    /// Removes a subscriber. Returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        let removed = subscribers.len() < before;
        if removed {
            log::debug!("Subscriber {id} unregistered");
        }
        removed
    }

    /// Number of currently registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Delivers `incident` to every current subscriber, in registration
    /// order, and returns how many subscribers it was delivered to.
    ///
    /// Delivery works on a snapshot of the registry, so subscribers may
    /// subscribe or unsubscribe from inside their callback.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Subscribers`] if any subscriber failed or
    /// panicked. The remaining subscribers are still called.
    pub fn publish(&self, incident: &Incident) -> Result<usize, NotifyError> {
        let snapshot: Registry = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut failed = Vec::new();
        for (id, subscriber) in &snapshot {
            let message = match catch_unwind(AssertUnwindSafe(|| {
                subscriber.on_incident_added(incident)
            })) {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(payload) => format!("subscriber panicked: {}", panic_message(&*payload)),
            };
            log::warn!(
                "Subscriber {id} failed for incident {} (uid={}): {message}",
                incident.id,
                incident.uid
            );
            failed.push(SubscriberFailure { id: *id, message });
        }

        if failed.is_empty() {
            Ok(snapshot.len())
        } else {
            Err(NotifyError::Subscribers {
                incident_id: incident.id,
                total: snapshot.len(),
                failed,
            })
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
