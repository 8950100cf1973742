use std::collections::{BTreeSet, HashSet};

use crate::model::*;
use crate::observability::INVARIANT_VIOLATIONS_TOTAL;
use crate::pricing::Money;
use crate::seatmap::{all_seats, seats_for_tier, SeatId};

use super::LedgerError;

/// Union of the seats of all confirmed bookings.
///
/// A seat appearing twice means the ledger has double-booked. That is reported, never
/// repaired here.
pub fn booked_seats(event_id: &str, bookings: &[Booking]) -> Result<HashSet<SeatId>, LedgerError> {
    let mut booked = HashSet::new();
    for booking in bookings.iter().filter(|b| b.is_confirmed()) {
        for seat in &booking.seats {
            if !booked.insert(seat.clone()) {
                tracing::error!(
                    "event {event_id}: seat {seat} is held by more than one confirmed booking (seen again in {})",
                    booking.id
                );
                metrics::counter!(INVARIANT_VIOLATIONS_TOTAL).increment(1);
                return Err(LedgerError::InvariantViolation {
                    event_id: event_id.to_string(),
                    seat: seat.clone(),
                });
            }
        }
    }
    Ok(booked)
}

pub fn free_seats(event: &Event, bookings: &[Booking]) -> Result<BTreeSet<SeatId>, LedgerError> {
    let booked = booked_seats(&event.id, bookings)?;
    let mut seats = all_seats(event)?;
    seats.retain(|s| !booked.contains(s));
    Ok(seats)
}

/// Every seat in tier then row order, with its tier and status.
pub fn seat_map(event: &Event, bookings: &[Booking]) -> Result<Vec<SeatView>, LedgerError> {
    let booked = booked_seats(&event.id, bookings)?;
    let mut views = Vec::with_capacity(event.total_seats());
    for tier in &event.tiers {
        for seat in seats_for_tier(tier, event.seats_per_row) {
            let status = if booked.contains(&seat) {
                SeatStatus::Taken
            } else {
                SeatStatus::Available
            };
            views.push(SeatView {
                seat,
                tier: tier.name.clone(),
                status,
            });
        }
    }
    Ok(views)
}

pub fn occupancy(event: &Event, bookings: &[Booking]) -> Result<Occupancy, LedgerError> {
    let booked = booked_seats(&event.id, bookings)?;
    let seats = all_seats(event)?;
    let booked_seats = seats.iter().filter(|s| booked.contains(*s)).count();

    let mut confirmed_bookings = 0;
    let mut revenue = Money::ZERO;
    for booking in bookings.iter().filter(|b| b.is_confirmed()) {
        confirmed_bookings += 1;
        revenue = revenue
            .checked_add(booking.total_amount)
            .ok_or(LedgerError::LimitExceeded("revenue overflows"))?;
    }

    Ok(Occupancy {
        event_id: event.id.clone(),
        total_seats: seats.len(),
        booked_seats,
        free_seats: seats.len() - booked_seats,
        confirmed_bookings,
        revenue,
    })
}
