use std::collections::HashSet;

use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::seatmap::{tier_of, SeatId};

use super::LedgerError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

pub(crate) fn check_identity(identity: &Identity) -> Result<(), LedgerError> {
    if identity.user_id.is_empty() {
        return Err(LedgerError::Forbidden("no user identity"));
    }
    if identity.user_id.len() > MAX_USER_ID_LEN {
        return Err(LedgerError::LimitExceeded("user id too long"));
    }
    Ok(())
}

/// Checks that need no catalog: non-empty, bounded, no seat twice.
pub(crate) fn check_request_shape(seats: &[SeatId]) -> Result<(), LedgerError> {
    if seats.is_empty() {
        return Err(LedgerError::InvalidSeat {
            seat: String::new(),
            reason: "no seats requested",
        });
    }
    if seats.len() > MAX_SEATS_PER_BOOKING {
        return Err(LedgerError::LimitExceeded("too many seats in one booking"));
    }
    let mut seen = HashSet::with_capacity(seats.len());
    for seat in seats {
        if !seen.insert(seat) {
            return Err(LedgerError::InvalidSeat {
                seat: seat.to_string(),
                reason: "requested more than once",
            });
        }
    }
    Ok(())
}

/// Every requested seat must exist and belong to `tier_name`.
pub(crate) fn validate_request<'a>(
    event: &'a Event,
    tier_name: &str,
    seats: &[SeatId],
) -> Result<&'a TicketTier, LedgerError> {
    let tier = event
        .tier(tier_name)
        .ok_or_else(|| LedgerError::UnknownTier(tier_name.to_string()))?;
    for seat in seats {
        match tier_of(event, seat) {
            Some(owner) if owner.name == tier.name => {}
            Some(_) => {
                return Err(LedgerError::InvalidSeat {
                    seat: seat.to_string(),
                    reason: "seat belongs to a different tier",
                });
            }
            None => {
                return Err(LedgerError::InvalidSeat {
                    seat: seat.to_string(),
                    reason: "no such seat at this event",
                });
            }
        }
    }
    Ok(tier)
}

/// Fails with every requested seat that is already booked.
pub(crate) fn check_no_conflict(requested: &[SeatId], booked: &HashSet<SeatId>) -> Result<(), LedgerError> {
    let taken: Vec<SeatId> = requested
        .iter()
        .filter(|s| booked.contains(*s))
        .cloned()
        .collect();
    if taken.is_empty() {
        Ok(())
    } else {
        Err(LedgerError::SeatUnavailable(taken))
    }
}

/// Independent of the booking id so knowing one doesn't reveal the other.
pub(crate) fn new_token(event_id: &str) -> String {
    format!("TKT-{event_id}-{}", Ulid::new())
}
