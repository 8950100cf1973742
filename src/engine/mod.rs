mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
mod store;

pub use availability::{booked_seats, free_seats, occupancy, seat_map};
pub use error::{ErrorKind, LedgerError};
pub use store::{BookingStore, EventBookings, LedgerStore, Snapshot, StoreError};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::limits::*;
use crate::model::*;
use crate::notify::NotifyHub;

#[derive(Debug, Clone)]
pub struct LedgerSettings {
    /// Upper bound on waiting for another writer of the same event.
    pub lock_wait: Duration,
    /// Attempts per operation before a conflict or storage error is surfaced.
    pub max_attempts: u32,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            lock_wait: Duration::from_millis(2000),
            max_attempts: 3,
        }
    }
}

/// The booking ledger: seat reservations, cancellations and payment outcomes for
/// every published event.
pub struct Ledger {
    pub(super) store: Arc<dyn BookingStore>,
    pub notify: Arc<NotifyHub>,
    /// One writer per event at a time. Different events never contend.
    locks: DashMap<EventId, Arc<Mutex<()>>>,
    pub(super) settings: LedgerSettings,
}

impl Ledger {
    pub fn new(store: Arc<dyn BookingStore>, notify: Arc<NotifyHub>, settings: LedgerSettings) -> Self {
        Self {
            store,
            notify,
            locks: DashMap::new(),
            settings,
        }
    }

    /// Volatile ledger with default settings.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(LedgerStore::in_memory()),
            Arc::new(NotifyHub::new()),
            LedgerSettings::default(),
        )
    }

    pub fn settings(&self) -> &LedgerSettings {
        &self.settings
    }

    /// Take the event's writer lock, giving up after `lock_wait`.
    pub(super) async fn lock_event(&self, event_id: &str) -> Result<OwnedMutexGuard<()>, LedgerError> {
        let lock = self
            .locks
            .entry(event_id.to_string())
            .or_default()
            .value()
            .clone();
        tokio::time::timeout(self.settings.lock_wait, lock.lock_owned())
            .await
            .map_err(|_| {
                tracing::warn!("timed out after {:?} waiting for event {event_id}", self.settings.lock_wait);
                LedgerError::Transient(format!("event {event_id} is busy"))
            })
    }

    /// Drop the event's lock entry unless another task still holds or awaits it.
    /// The caller keeps its guard, which accounts for one reference besides the map's.
    pub(super) fn release_lock(&self, event_id: &str) {
        self.locks
            .remove_if(event_id, |_, lock| Arc::strong_count(lock) <= 2);
    }

    pub(super) async fn require_event(&self, event_id: &str) -> Result<Event, LedgerError> {
        if event_id.len() > MAX_EVENT_ID_LEN {
            return Err(LedgerError::LimitExceeded("event id too long"));
        }
        self.store
            .load_event(event_id)
            .await?
            .ok_or_else(|| LedgerError::EventNotFound(event_id.to_string()))
    }

    /// Run `op` again while it fails with a retryable error, at most `max_attempts`
    /// times in total.
    pub(super) async fn with_retries<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, LedgerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        let max_attempts = self.settings.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    tracing::warn!("{what}: {e}, retrying ({attempt}/{max_attempts})");
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

pub(super) fn require_admin(identity: &Identity) -> Result<(), LedgerError> {
    if identity.is_admin() {
        Ok(())
    } else {
        Err(LedgerError::Forbidden("admin role required"))
    }
}
