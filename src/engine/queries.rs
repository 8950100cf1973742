use std::collections::BTreeSet;

use crate::model::*;
use crate::seatmap::SeatId;

use super::availability::{booked_seats, free_seats, occupancy, seat_map};
use super::{require_admin, Ledger, LedgerError};

impl Ledger {
    pub async fn booking(&self, id: BookingId) -> Result<Option<Booking>, LedgerError> {
        Ok(self.store.get_booking(id).await?)
    }

    /// "My tickets": every booking the user ever made, oldest first.
    pub async fn bookings_for_user(&self, user_id: &str) -> Result<Vec<Booking>, LedgerError> {
        let mut bookings = self.store.bookings_for_user(user_id).await?;
        bookings.sort_by_key(|b| b.id);
        Ok(bookings)
    }

    pub async fn bookings_for_event(&self, identity: &Identity, event_id: &str) -> Result<Vec<Booking>, LedgerError> {
        require_admin(identity)?;
        Ok(self.store.list_bookings(event_id).await?.bookings)
    }

    pub async fn event(&self, event_id: &str) -> Result<Option<Event>, LedgerError> {
        Ok(self.store.load_event(event_id).await?)
    }

    pub async fn list_events(&self) -> Result<Vec<Event>, LedgerError> {
        Ok(self.store.list_events().await?)
    }

    pub async fn free_seats(&self, event_id: &str) -> Result<BTreeSet<SeatId>, LedgerError> {
        let (event, bookings) = self.event_with_bookings(event_id).await?;
        free_seats(&event, &bookings)
    }

    pub async fn seat_map(&self, event_id: &str) -> Result<Vec<SeatView>, LedgerError> {
        let (event, bookings) = self.event_with_bookings(event_id).await?;
        seat_map(&event, &bookings)
    }

    pub async fn occupancy(&self, event_id: &str) -> Result<Occupancy, LedgerError> {
        let (event, bookings) = self.event_with_bookings(event_id).await?;
        occupancy(&event, &bookings)
    }

    async fn event_with_bookings(&self, event_id: &str) -> Result<(Event, Vec<Booking>), LedgerError> {
        let event = self.require_event(event_id).await?;
        let snapshot = self.store.list_bookings(event_id).await?;
        Ok((event, snapshot.bookings))
    }

    /// Recompute the booked seats of every event. Returns one violation per
    /// double-booked event; an empty list means the ledger is consistent.
    pub async fn verify_integrity(&self) -> Result<Vec<LedgerError>, LedgerError> {
        let mut violations = Vec::new();
        let events = self.store.list_events().await?;
        for event in &events {
            let snapshot = self.store.list_bookings(&event.id).await?;
            if let Err(e) = booked_seats(&event.id, &snapshot.bookings) {
                violations.push(e);
            }
        }
        tracing::info!(
            "integrity check over {} events: {} violations",
            events.len(),
            violations.len()
        );
        Ok(violations)
    }
}
