use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, RwLock};

use crate::model::*;
use crate::wal::{wal_writer_loop, Wal, WalCommand};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A conditional write lost against a concurrent modification.
    #[error("concurrent modification")]
    Conflict,
    #[error("booking not found: {0}")]
    Missing(BookingId),
    #[error("storage error: {0}")]
    Transient(String),
}

/// Committed bookings of one event plus the version they were read at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub version: u64,
    pub bookings: Vec<Booking>,
}

/// Persistence seam of the ledger. `append_booking` and `update_booking_status` are
/// conditional writes: they fail with `StoreError::Conflict` instead of overwriting a
/// concurrent change.
#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn list_bookings(&self, event_id: &str) -> Result<Snapshot, StoreError>;

    async fn get_booking(&self, id: BookingId) -> Result<Option<Booking>, StoreError>;

    async fn bookings_for_user(&self, user_id: &str) -> Result<Vec<Booking>, StoreError>;

    /// Append iff the event's booking set is still at `expected_version`.
    /// Returns the new version.
    async fn append_booking(&self, booking: Booking, expected_version: u64) -> Result<u64, StoreError>;

    /// Compare-and-swap on the booking status.
    async fn update_booking_status(
        &self,
        id: BookingId,
        previous: BookingStatus,
        next: BookingStatus,
        at: Ms,
    ) -> Result<Booking, StoreError>;

    /// Stamp `paid_at` on a confirmed, not yet paid booking.
    async fn record_payment(&self, id: BookingId, paid_at: Ms) -> Result<Booking, StoreError>;

    async fn load_event(&self, id: &str) -> Result<Option<Event>, StoreError>;

    async fn save_event(&self, event: Event) -> Result<(), StoreError>;

    async fn remove_event(&self, id: &str) -> Result<(), StoreError>;

    async fn list_events(&self) -> Result<Vec<Event>, StoreError>;
}

/// Every booking ever made for one event, in append order.
#[derive(Debug, Default)]
pub struct EventBookings {
    /// Bumped on every append. Status changes only ever free seats, so they don't
    /// invalidate a reader's disjointness check and leave the version alone.
    pub version: u64,
    pub bookings: Vec<Booking>,
}

impl EventBookings {
    fn find(&self, id: BookingId) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    fn apply(&mut self, record: &Record) {
        match record {
            Record::BookingReserved { booking } => {
                self.bookings.push(booking.clone());
                self.version += 1;
            }
            Record::BookingStatusChanged { id, status, at, .. } => {
                if let Some(b) = self.bookings.iter_mut().find(|b| b.id == *id) {
                    b.status = *status;
                    b.closed_at = Some(*at);
                }
            }
            Record::PaymentRecorded { id, paid_at, .. } => {
                if let Some(b) = self.bookings.iter_mut().find(|b| b.id == *id) {
                    b.paid_at = Some(*paid_at);
                }
            }
            // Catalog records live outside the booking tables.
            Record::EventPublished { .. } | Record::EventWithdrawn { .. } => {}
        }
    }
}

pub type SharedEventBookings = Arc<RwLock<EventBookings>>;

/// In-memory ledger state, optionally made durable by a WAL.
pub struct LedgerStore {
    catalog: DashMap<EventId, Event>,
    tables: DashMap<EventId, SharedEventBookings>,
    booking_index: DashMap<BookingId, EventId>,
    user_index: DashMap<UserId, Vec<BookingId>>,
    wal_tx: Option<mpsc::Sender<WalCommand>>,
    /// Mutations hold this shared; compaction holds it exclusively so nothing lands
    /// between the snapshot and the file swap.
    gate: RwLock<()>,
}

impl Default for LedgerStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl LedgerStore {
    /// Volatile store. Nothing survives the process.
    pub fn in_memory() -> Self {
        Self {
            catalog: DashMap::new(),
            tables: DashMap::new(),
            booking_index: DashMap::new(),
            user_index: DashMap::new(),
            wal_tx: None,
            gate: RwLock::new(()),
        }
    }

    /// Replay the WAL at `path` and keep appending to it. Must run inside a tokio
    /// runtime: the group-commit writer is spawned here.
    pub fn open(path: &Path) -> io::Result<Self> {
        let records = Wal::replay(path)?;
        let wal = Wal::open(path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = Self {
            wal_tx: Some(wal_tx),
            ..Self::in_memory()
        };
        let count = records.len();
        store.replay(records);
        tracing::info!(
            "replayed {count} records from {}: {} events, {} bookings",
            path.display(),
            store.catalog.len(),
            store.booking_index.len()
        );
        Ok(store)
    }

    // Sole owner during replay, so tables are built unlocked and wrapped at the end.
    fn replay(&self, records: Vec<Record>) {
        let mut tables: HashMap<EventId, EventBookings> = HashMap::new();
        for record in records {
            match &record {
                Record::EventPublished { event } => {
                    self.catalog.insert(event.id.clone(), event.clone());
                }
                Record::EventWithdrawn { id } => {
                    self.catalog.remove(id);
                }
                Record::BookingReserved { booking } => {
                    // A failed fsync can still leave the bytes behind, and the retry
                    // writes the same booking again.
                    if self.booking_index.contains_key(&booking.id) {
                        tracing::warn!("wal: skipping repeated reservation {}", booking.id);
                        continue;
                    }
                    self.index(booking);
                    tables
                        .entry(booking.event_id.clone())
                        .or_default()
                        .apply(&record);
                }
                other => {
                    tables
                        .entry(other.event_id().to_string())
                        .or_default()
                        .apply(other);
                }
            }
        }
        for (event_id, table) in tables {
            self.tables.insert(event_id, Arc::new(RwLock::new(table)));
        }
    }

    fn index(&self, booking: &Booking) {
        self.booking_index
            .insert(booking.id, booking.event_id.clone());
        self.user_index
            .entry(booking.user_id.clone())
            .or_default()
            .push(booking.id);
    }

    fn table(&self, event_id: &str) -> Option<SharedEventBookings> {
        self.tables.get(event_id).map(|e| e.value().clone())
    }

    fn table_for_booking(&self, id: BookingId) -> Option<SharedEventBookings> {
        let event_id = self.booking_index.get(&id).map(|e| e.value().clone())?;
        self.table(&event_id)
    }

    /// Write through the group-commit WAL writer. No-op for a volatile store.
    async fn persist(&self, record: &Record) -> Result<(), StoreError> {
        let Some(wal_tx) = &self.wal_tx else {
            return Ok(());
        };
        let (tx, rx) = oneshot::channel();
        wal_tx
            .send(WalCommand::Append {
                record: record.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Transient("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Transient("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Transient(e.to_string()))
    }

    pub fn is_durable(&self) -> bool {
        self.wal_tx.is_some()
    }

    /// Rewrite the WAL as the minimal record set: every catalog entry, then every
    /// booking in its current state. Bookings are never dropped.
    pub async fn compact(&self) -> Result<usize, StoreError> {
        let Some(wal_tx) = &self.wal_tx else {
            return Ok(0);
        };
        let _exclusive = self.gate.write().await;

        let mut events: Vec<Event> = self.catalog.iter().map(|e| e.value().clone()).collect();
        events.sort_by(|a, b| a.id.cmp(&b.id));
        let mut records: Vec<Record> = events
            .into_iter()
            .map(|event| Record::EventPublished { event })
            .collect();

        let tables: Vec<SharedEventBookings> =
            self.tables.iter().map(|e| e.value().clone()).collect();
        for table in tables {
            let guard = table.read().await;
            records.extend(
                guard
                    .bookings
                    .iter()
                    .cloned()
                    .map(|booking| Record::BookingReserved { booking }),
            );
        }

        let count = records.len();
        let (tx, rx) = oneshot::channel();
        wal_tx
            .send(WalCommand::Compact {
                records,
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Transient("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Transient("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Transient(e.to_string()))?;
        Ok(count)
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let Some(wal_tx) = &self.wal_tx else {
            return 0;
        };
        let (tx, rx) = oneshot::channel();
        if wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

#[async_trait]
impl BookingStore for LedgerStore {
    async fn list_bookings(&self, event_id: &str) -> Result<Snapshot, StoreError> {
        let Some(table) = self.table(event_id) else {
            return Ok(Snapshot::default());
        };
        let guard = table.read().await;
        Ok(Snapshot {
            version: guard.version,
            bookings: guard.bookings.clone(),
        })
    }

    async fn get_booking(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        let Some(table) = self.table_for_booking(id) else {
            return Ok(None);
        };
        let guard = table.read().await;
        Ok(guard.find(id).cloned())
    }

    async fn bookings_for_user(&self, user_id: &str) -> Result<Vec<Booking>, StoreError> {
        let ids = self
            .user_index
            .get(user_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut bookings = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(b) = self.get_booking(id).await? {
                bookings.push(b);
            }
        }
        Ok(bookings)
    }

    async fn append_booking(&self, booking: Booking, expected_version: u64) -> Result<u64, StoreError> {
        let _shared = self.gate.read().await;
        let table = self
            .tables
            .entry(booking.event_id.clone())
            .or_default()
            .value()
            .clone();
        let mut guard = table.write().await;
        if guard.version != expected_version || self.booking_index.contains_key(&booking.id) {
            return Err(StoreError::Conflict);
        }

        let record = Record::BookingReserved {
            booking: booking.clone(),
        };
        self.persist(&record).await?;
        self.index(&booking);
        guard.apply(&record);
        Ok(guard.version)
    }

    async fn update_booking_status(
        &self,
        id: BookingId,
        previous: BookingStatus,
        next: BookingStatus,
        at: Ms,
    ) -> Result<Booking, StoreError> {
        let _shared = self.gate.read().await;
        let table = self.table_for_booking(id).ok_or(StoreError::Missing(id))?;
        let mut guard = table.write().await;
        let current = guard.find(id).ok_or(StoreError::Missing(id))?;
        if current.status != previous {
            return Err(StoreError::Conflict);
        }

        let record = Record::BookingStatusChanged {
            id,
            event_id: current.event_id.clone(),
            status: next,
            at,
        };
        self.persist(&record).await?;
        guard.apply(&record);
        guard.find(id).cloned().ok_or(StoreError::Missing(id))
    }

    async fn record_payment(&self, id: BookingId, paid_at: Ms) -> Result<Booking, StoreError> {
        let _shared = self.gate.read().await;
        let table = self.table_for_booking(id).ok_or(StoreError::Missing(id))?;
        let mut guard = table.write().await;
        let current = guard.find(id).ok_or(StoreError::Missing(id))?;
        if !current.is_confirmed() || current.is_paid() {
            return Err(StoreError::Conflict);
        }

        let record = Record::PaymentRecorded {
            id,
            event_id: current.event_id.clone(),
            paid_at,
        };
        self.persist(&record).await?;
        guard.apply(&record);
        guard.find(id).cloned().ok_or(StoreError::Missing(id))
    }

    async fn load_event(&self, id: &str) -> Result<Option<Event>, StoreError> {
        Ok(self.catalog.get(id).map(|e| e.value().clone()))
    }

    async fn save_event(&self, event: Event) -> Result<(), StoreError> {
        let _shared = self.gate.read().await;
        let record = Record::EventPublished {
            event: event.clone(),
        };
        self.persist(&record).await?;
        self.catalog.insert(event.id.clone(), event);
        Ok(())
    }

    async fn remove_event(&self, id: &str) -> Result<(), StoreError> {
        let _shared = self.gate.read().await;
        let record = Record::EventWithdrawn { id: id.to_string() };
        self.persist(&record).await?;
        self.catalog.remove(id);
        Ok(())
    }

    async fn list_events(&self) -> Result<Vec<Event>, StoreError> {
        let mut events: Vec<Event> = self.catalog.iter().map(|e| e.value().clone()).collect();
        events.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::Money;
    use crate::seatmap::SeatId;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("seatledger_test_store");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn event() -> Event {
        Event::new(
            "jazz",
            "Jazz Fest",
            vec![TicketTier::new("Silver", Money::from_minor(1500), &["C", "D"])],
        )
    }

    fn booking(user: &str, seats: &[(&str, u16)]) -> Booking {
        Booking {
            id: Ulid::new(),
            event_id: "jazz".into(),
            user_id: user.into(),
            tier_name: "Silver".into(),
            seats: seats.iter().map(|(r, n)| SeatId::new(*r, *n)).collect(),
            total_amount: Money::from_minor(1500 * seats.len() as u64),
            created_at: 1,
            status: BookingStatus::Confirmed,
            token: format!("TKT-jazz-{}", Ulid::new()),
            paid_at: None,
            closed_at: None,
        }
    }

    #[tokio::test]
    async fn append_requires_current_version() {
        let store = LedgerStore::in_memory();
        assert_eq!(store.list_bookings("jazz").await.unwrap().version, 0);

        let v1 = store.append_booking(booking("u1", &[("C", 1)]), 0).await.unwrap();
        assert_eq!(v1, 1);

        // Second writer read version 0 before the first committed.
        let stale = store.append_booking(booking("u2", &[("C", 2)]), 0).await;
        assert_eq!(stale, Err(StoreError::Conflict));

        let snap = store.list_bookings("jazz").await.unwrap();
        assert_eq!(snap.version, 1);
        assert_eq!(snap.bookings.len(), 1);
    }

    #[tokio::test]
    async fn status_update_is_compare_and_swap() {
        let store = LedgerStore::in_memory();
        let b = booking("u1", &[("C", 1)]);
        store.append_booking(b.clone(), 0).await.unwrap();

        let refunded = store
            .update_booking_status(b.id, BookingStatus::Confirmed, BookingStatus::Refunded, 10)
            .await
            .unwrap();
        assert_eq!(refunded.status, BookingStatus::Refunded);
        assert_eq!(refunded.closed_at, Some(10));

        let again = store
            .update_booking_status(b.id, BookingStatus::Confirmed, BookingStatus::Refunded, 11)
            .await;
        assert_eq!(again, Err(StoreError::Conflict));

        // Status changes don't bump the append version.
        assert_eq!(store.list_bookings("jazz").await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn missing_booking_is_reported() {
        let store = LedgerStore::in_memory();
        let id = Ulid::new();
        assert_eq!(store.get_booking(id).await.unwrap(), None);
        assert_eq!(store.record_payment(id, 1).await, Err(StoreError::Missing(id)));
    }

    #[tokio::test]
    async fn payment_stamped_once() {
        let store = LedgerStore::in_memory();
        let b = booking("u1", &[("C", 1)]);
        store.append_booking(b.clone(), 0).await.unwrap();

        let paid = store.record_payment(b.id, 5).await.unwrap();
        assert_eq!(paid.paid_at, Some(5));
        assert_eq!(store.record_payment(b.id, 6).await, Err(StoreError::Conflict));
        assert_eq!(store.get_booking(b.id).await.unwrap().unwrap().paid_at, Some(5));
    }

    #[tokio::test]
    async fn user_index_spans_events() {
        let store = LedgerStore::in_memory();
        let mut other = booking("u1", &[("A", 1)]);
        other.event_id = "summit".into();
        store.append_booking(booking("u1", &[("C", 1)]), 0).await.unwrap();
        store.append_booking(other, 0).await.unwrap();
        store.append_booking(booking("u2", &[("C", 2)]), 1).await.unwrap();

        assert_eq!(store.bookings_for_user("u1").await.unwrap().len(), 2);
        assert_eq!(store.bookings_for_user("u2").await.unwrap().len(), 1);
        assert!(store.bookings_for_user("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reopen_replays_wal() {
        let path = test_wal_path("reopen.wal");
        let b = booking("u1", &[("C", 1), ("C", 2)]);
        {
            let store = LedgerStore::open(&path).unwrap();
            store.save_event(event()).await.unwrap();
            store.append_booking(b.clone(), 0).await.unwrap();
            store
                .update_booking_status(b.id, BookingStatus::Confirmed, BookingStatus::Refunded, 9)
                .await
                .unwrap();
            assert_eq!(store.appends_since_compact().await, 3);
        }

        let store = LedgerStore::open(&path).unwrap();
        assert_eq!(store.load_event("jazz").await.unwrap(), Some(event()));
        let replayed = store.get_booking(b.id).await.unwrap().unwrap();
        assert_eq!(replayed.status, BookingStatus::Refunded);
        assert_eq!(replayed.seats, b.seats);
        assert_eq!(store.list_bookings("jazz").await.unwrap().version, 1);
        assert_eq!(store.bookings_for_user("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn replay_skips_repeated_reservation() {
        let path = test_wal_path("repeated.wal");
        let b = booking("u1", &[("C", 1)]);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&Record::EventPublished { event: event() }).unwrap();
            wal.append(&Record::BookingReserved { booking: b.clone() }).unwrap();
            wal.append(&Record::BookingReserved { booking: b.clone() }).unwrap();
            wal.append(&Record::PaymentRecorded {
                id: b.id,
                event_id: "jazz".into(),
                paid_at: 5,
            })
            .unwrap();
        }

        let store = LedgerStore::open(&path).unwrap();
        let snapshot = store.list_bookings("jazz").await.unwrap();
        assert_eq!(snapshot.version, 1);
        assert_eq!(snapshot.bookings.len(), 1);
        assert_eq!(snapshot.bookings[0].paid_at, Some(5));
        assert_eq!(store.bookings_for_user("u1").await.unwrap().len(), 1);
        assert!(crate::engine::booked_seats("jazz", &snapshot.bookings).is_ok());
    }

    #[tokio::test]
    async fn compaction_keeps_final_state() {
        let path = test_wal_path("compact.wal");
        let paid = booking("u1", &[("C", 1)]);
        let refunded = booking("u2", &[("C", 2)]);
        {
            let store = LedgerStore::open(&path).unwrap();
            store.save_event(event()).await.unwrap();
            store.append_booking(paid.clone(), 0).await.unwrap();
            store.append_booking(refunded.clone(), 1).await.unwrap();
            store.record_payment(paid.id, 7).await.unwrap();
            store
                .update_booking_status(refunded.id, BookingStatus::Confirmed, BookingStatus::Refunded, 8)
                .await
                .unwrap();
            store.remove_event("gone").await.unwrap();

            let written = store.compact().await.unwrap();
            assert_eq!(written, 3);
            assert_eq!(store.appends_since_compact().await, 0);
        }

        let store = LedgerStore::open(&path).unwrap();
        let a = store.get_booking(paid.id).await.unwrap().unwrap();
        let b = store.get_booking(refunded.id).await.unwrap().unwrap();
        assert_eq!(a.paid_at, Some(7));
        assert_eq!(b.status, BookingStatus::Refunded);
        assert_eq!(store.list_events().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn volatile_store_has_nothing_to_compact() {
        let store = LedgerStore::in_memory();
        assert!(!store.is_durable());
        assert_eq!(store.compact().await.unwrap(), 0);
        assert_eq!(store.appends_since_compact().await, 0);
    }
}
