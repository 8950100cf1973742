use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{CANCELLATIONS_TOTAL, RESERVATIONS_TOTAL, RESERVE_RETRIES_TOTAL};
use crate::pricing::price_for;
use crate::seatmap::{tier_of, validate_layout, SeatId};

use super::availability::booked_seats;
use super::conflict::{check_identity, check_no_conflict, check_request_shape, new_token, now_ms, validate_request};
use super::{require_admin, Ledger, LedgerError, StoreError};

fn reservation_outcome(result: &Result<Booking, LedgerError>) -> &'static str {
    match result {
        Ok(_) => "confirmed",
        Err(LedgerError::SeatUnavailable(_)) => "unavailable",
        Err(e) if e.is_retryable() => "transient",
        Err(_) => "rejected",
    }
}

impl Ledger {
    /// Book `seats` of one tier for the caller. All seats or none.
    pub async fn reserve(
        &self,
        identity: &Identity,
        event_id: &str,
        tier_name: &str,
        seats: Vec<SeatId>,
    ) -> Result<Booking, LedgerError> {
        let result = self.try_reserve(identity, event_id, tier_name, seats).await;
        metrics::counter!(RESERVATIONS_TOTAL, "outcome" => reservation_outcome(&result)).increment(1);
        if let Err(e) = &result {
            tracing::debug!("reserve by {} on {event_id} refused: {e}", identity.user_id);
        }
        result
    }

    async fn try_reserve(
        &self,
        identity: &Identity,
        event_id: &str,
        tier_name: &str,
        seats: Vec<SeatId>,
    ) -> Result<Booking, LedgerError> {
        check_identity(identity)?;
        check_request_shape(&seats)?;
        // Unknown events never get a lock entry.
        self.require_event(event_id).await?;

        let _guard = self.lock_event(event_id).await?;
        // Reloaded under the lock: the layout may have been republished meanwhile.
        let event = self.require_event(event_id).await?;
        let tier = validate_request(&event, tier_name, &seats)?;
        let total_amount = price_for(&event, &tier.name, seats.len())?;

        let booking = Booking {
            id: Ulid::new(),
            event_id: event.id.clone(),
            user_id: identity.user_id.clone(),
            tier_name: tier.name.clone(),
            seats,
            total_amount,
            created_at: now_ms(),
            status: BookingStatus::Confirmed,
            token: new_token(&event.id),
            paid_at: None,
            closed_at: None,
        };

        let max_attempts = self.settings.max_attempts.max(1);
        let mut last_err = None;
        for attempt in 1..=max_attempts {
            if attempt > 1 {
                metrics::counter!(RESERVE_RETRIES_TOTAL).increment(1);
            }
            let snapshot = match self.store.list_bookings(event_id).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    tracing::warn!("reserve on {event_id}: read failed ({e}), attempt {attempt}/{max_attempts}");
                    last_err = Some(LedgerError::from(e));
                    continue;
                }
            };
            let booked = booked_seats(event_id, &snapshot.bookings)?;
            check_no_conflict(&booking.seats, &booked)?;

            match self.store.append_booking(booking.clone(), snapshot.version).await {
                Ok(version) => {
                    tracing::info!(
                        "booking {} confirmed: {} x{} {} on {event_id} for {} (v{version})",
                        booking.id,
                        booking.tier_name,
                        booking.seats.len(),
                        booking.total_amount,
                        booking.user_id
                    );
                    self.notify.send(
                        event_id,
                        &Record::BookingReserved {
                            booking: booking.clone(),
                        },
                    );
                    return Ok(booking);
                }
                Err(StoreError::Conflict) => {
                    tracing::warn!(
                        "reserve on {event_id}: bookings moved past v{}, attempt {attempt}/{max_attempts}",
                        snapshot.version
                    );
                    last_err = None;
                }
                Err(e) => {
                    tracing::warn!("reserve on {event_id}: append failed ({e}), attempt {attempt}/{max_attempts}");
                    last_err = Some(LedgerError::from(e));
                }
            }
        }

        match last_err {
            Some(e) => Err(e),
            None => Err(self.unavailable_after_conflicts(event_id, &booking.seats).await),
        }
    }

    /// Name the seats that beat us, or all requested seats if the competing writes
    /// have since been undone.
    async fn unavailable_after_conflicts(&self, event_id: &str, requested: &[SeatId]) -> LedgerError {
        let snapshot = match self.store.list_bookings(event_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => return e.into(),
        };
        match booked_seats(event_id, &snapshot.bookings) {
            Ok(booked) => match check_no_conflict(requested, &booked) {
                Err(e) => e,
                Ok(()) => LedgerError::SeatUnavailable(requested.to_vec()),
            },
            Err(e) => e,
        }
    }

    /// Cancel by the ticket holder. The booking is kept with status `Refunded`.
    pub async fn cancel(&self, identity: &Identity, booking_id: BookingId) -> Result<Booking, LedgerError> {
        self.with_retries("cancel", || self.try_cancel(identity, booking_id))
            .await
    }

    async fn try_cancel(&self, identity: &Identity, booking_id: BookingId) -> Result<Booking, LedgerError> {
        let booking = self
            .store
            .get_booking(booking_id)
            .await?
            .ok_or(LedgerError::BookingNotFound(booking_id))?;
        if booking.user_id != identity.user_id {
            return Err(LedgerError::Forbidden("only the ticket holder can cancel a booking"));
        }
        if booking.status.is_terminal() {
            return Err(LedgerError::AlreadyCancelled(booking_id));
        }

        let at = now_ms();
        match self
            .store
            .update_booking_status(booking_id, BookingStatus::Confirmed, BookingStatus::Refunded, at)
            .await
        {
            Ok(refunded) => {
                metrics::counter!(CANCELLATIONS_TOTAL).increment(1);
                tracing::info!(
                    "booking {booking_id} refunded: {} released on {}, {} back to {}",
                    refunded.seat_list(),
                    refunded.event_id,
                    refunded.total_amount,
                    refunded.user_id
                );
                self.notify.send(
                    &refunded.event_id,
                    &Record::BookingStatusChanged {
                        id: booking_id,
                        event_id: refunded.event_id.clone(),
                        status: BookingStatus::Refunded,
                        at,
                    },
                );
                Ok(refunded)
            }
            // Someone else closed it between our read and the swap.
            Err(StoreError::Conflict) => Err(LedgerError::AlreadyCancelled(booking_id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Success callback of the payment channel. Idempotent.
    ///
    /// `Ok(None)` for an unknown booking; terminal or already paid bookings come back
    /// unchanged.
    pub async fn confirm_payment(&self, booking_id: BookingId, token: &str) -> Result<Option<Booking>, LedgerError> {
        if token.len() > MAX_TOKEN_LEN {
            return Err(LedgerError::LimitExceeded("token too long"));
        }
        self.with_retries("confirm_payment", || self.try_confirm_payment(booking_id, token))
            .await
    }

    async fn try_confirm_payment(&self, booking_id: BookingId, token: &str) -> Result<Option<Booking>, LedgerError> {
        let Some((booking, _guard)) = self.locked_payment_target(booking_id, token).await? else {
            return Ok(None);
        };
        if booking.status.is_terminal() || booking.is_paid() {
            return Ok(Some(booking));
        }

        let paid_at = now_ms();
        match self.store.record_payment(booking_id, paid_at).await {
            Ok(paid) => {
                tracing::info!("booking {booking_id} paid: {}", paid.total_amount);
                self.notify.send(
                    &paid.event_id,
                    &Record::PaymentRecorded {
                        id: booking_id,
                        event_id: paid.event_id.clone(),
                        paid_at,
                    },
                );
                Ok(Some(paid))
            }
            Err(StoreError::Conflict) => Ok(self.store.get_booking(booking_id).await?),
            Err(e) => Err(e.into()),
        }
    }

    /// Failure callback of the payment channel: releases the seats of an unpaid
    /// booking. Terminal bookings come back unchanged.
    pub async fn decline_payment(&self, booking_id: BookingId, token: &str) -> Result<Option<Booking>, LedgerError> {
        if token.len() > MAX_TOKEN_LEN {
            return Err(LedgerError::LimitExceeded("token too long"));
        }
        self.with_retries("decline_payment", || self.try_decline_payment(booking_id, token))
            .await
    }

    async fn try_decline_payment(&self, booking_id: BookingId, token: &str) -> Result<Option<Booking>, LedgerError> {
        let Some((booking, _guard)) = self.locked_payment_target(booking_id, token).await? else {
            return Ok(None);
        };
        if booking.status.is_terminal() {
            return Ok(Some(booking));
        }
        if booking.is_paid() {
            return Err(LedgerError::PaymentSettled(booking_id));
        }

        let at = now_ms();
        match self
            .store
            .update_booking_status(booking_id, BookingStatus::Confirmed, BookingStatus::Cancelled, at)
            .await
        {
            Ok(cancelled) => {
                tracing::info!(
                    "booking {booking_id} cancelled after declined payment: {} released on {}",
                    cancelled.seat_list(),
                    cancelled.event_id
                );
                self.notify.send(
                    &cancelled.event_id,
                    &Record::BookingStatusChanged {
                        id: booking_id,
                        event_id: cancelled.event_id.clone(),
                        status: BookingStatus::Cancelled,
                        at,
                    },
                );
                Ok(Some(cancelled))
            }
            Err(StoreError::Conflict) => Ok(self.store.get_booking(booking_id).await?),
            Err(e) => Err(e.into()),
        }
    }

    /// Look the booking up, check the token and re-read it under the event lock so a
    /// payment and a decline for the same booking can't interleave.
    async fn locked_payment_target(
        &self,
        booking_id: BookingId,
        token: &str,
    ) -> Result<Option<(Booking, tokio::sync::OwnedMutexGuard<()>)>, LedgerError> {
        let Some(booking) = self.store.get_booking(booking_id).await? else {
            tracing::debug!("payment callback for unknown booking {booking_id}");
            return Ok(None);
        };
        if booking.token != token {
            return Err(LedgerError::Forbidden("payment token does not match the booking"));
        }
        let guard = self.lock_event(&booking.event_id).await?;
        let current = self
            .store
            .get_booking(booking_id)
            .await?
            .ok_or(LedgerError::BookingNotFound(booking_id))?;
        Ok(Some((current, guard)))
    }

    /// Publish or republish a catalog entry.
    ///
    /// A republished layout must still place every confirmed booking's seats inside
    /// that booking's tier.
    pub async fn publish_event(&self, identity: &Identity, event: Event) -> Result<(), LedgerError> {
        require_admin(identity)?;
        validate_layout(&event)?;

        let _guard = self.lock_event(&event.id).await?;
        let snapshot = self.store.list_bookings(&event.id).await?;
        for booking in snapshot.bookings.iter().filter(|b| b.is_confirmed()) {
            for seat in &booking.seats {
                match tier_of(&event, seat) {
                    Some(tier) if tier.name == booking.tier_name => {}
                    _ => {
                        return Err(LedgerError::Config(format!(
                            "booking {} holds {seat}, which the new layout takes out of tier {}",
                            booking.id, booking.tier_name
                        )));
                    }
                }
            }
        }

        self.store.save_event(event.clone()).await?;
        tracing::info!(
            "event {} published by {}: {} tiers, {} seats",
            event.id,
            identity.user_id,
            event.tiers.len(),
            event.total_seats()
        );
        let event_id = event.id.clone();
        self.notify.send(&event_id, &Record::EventPublished { event });
        Ok(())
    }

    /// Remove an event from the catalog. Refused while it has confirmed bookings.
    pub async fn withdraw_event(&self, identity: &Identity, event_id: &str) -> Result<(), LedgerError> {
        require_admin(identity)?;
        self.require_event(event_id).await?;

        let _guard = self.lock_event(event_id).await?;
        self.require_event(event_id).await?;
        let snapshot = self.store.list_bookings(event_id).await?;
        if snapshot.bookings.iter().any(|b| b.is_confirmed()) {
            return Err(LedgerError::HasBookings(event_id.to_string()));
        }

        self.store.remove_event(event_id).await?;
        tracing::info!("event {event_id} withdrawn by {}", identity.user_id);
        self.notify.send(
            event_id,
            &Record::EventWithdrawn {
                id: event_id.to_string(),
            },
        );
        self.notify.remove(event_id);
        self.release_lock(event_id);
        Ok(())
    }
}
