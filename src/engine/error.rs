use thiserror::Error;

use crate::model::{BookingId, EventId};
use crate::seatmap::SeatId;

use super::store::StoreError;

/// Coarse error taxonomy exposed to callers and mapped onto wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    InvalidSeat,
    SeatUnavailable,
    UnknownTier,
    NotFound,
    Forbidden,
    AlreadyCancelled,
    /// Request is valid but the booking/event is in the wrong state for it.
    WrongState,
    InvariantViolation,
    TransientStorage,
    LimitExceeded,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid event layout: {0}")]
    Config(String),
    #[error("invalid seat {seat}: {reason}")]
    InvalidSeat { seat: String, reason: &'static str },
    #[error("seats unavailable: {}", join_seats(.0))]
    SeatUnavailable(Vec<SeatId>),
    #[error("unknown tier: {0}")]
    UnknownTier(String),
    #[error("event not found: {0}")]
    EventNotFound(EventId),
    #[error("booking not found: {0}")]
    BookingNotFound(BookingId),
    #[error("forbidden: {0}")]
    Forbidden(&'static str),
    #[error("booking {0} is already cancelled")]
    AlreadyCancelled(BookingId),
    #[error("booking {0} has a settled payment")]
    PaymentSettled(BookingId),
    #[error("event {0} still has confirmed bookings")]
    HasBookings(EventId),
    #[error("seat {seat} is claimed by more than one confirmed booking of event {event_id}")]
    InvariantViolation { event_id: EventId, seat: SeatId },
    #[error("storage unavailable: {0}")]
    Transient(String),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
}

fn join_seats(seats: &[SeatId]) -> String {
    seats
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::Config(_) => ErrorKind::Config,
            LedgerError::InvalidSeat { .. } => ErrorKind::InvalidSeat,
            LedgerError::SeatUnavailable(_) => ErrorKind::SeatUnavailable,
            LedgerError::UnknownTier(_) => ErrorKind::UnknownTier,
            LedgerError::EventNotFound(_) | LedgerError::BookingNotFound(_) => ErrorKind::NotFound,
            LedgerError::Forbidden(_) => ErrorKind::Forbidden,
            LedgerError::AlreadyCancelled(_) => ErrorKind::AlreadyCancelled,
            LedgerError::PaymentSettled(_) | LedgerError::HasBookings(_) => ErrorKind::WrongState,
            LedgerError::InvariantViolation { .. } => ErrorKind::InvariantViolation,
            LedgerError::Transient(_) => ErrorKind::TransientStorage,
            LedgerError::LimitExceeded(_) => ErrorKind::LimitExceeded,
        }
    }

    /// Only infrastructure hiccups are worth retrying as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Transient(_))
    }

    /// Actionable text for the person at the seat picker.
    pub fn user_message(&self) -> String {
        match self {
            LedgerError::Config(detail) => {
                format!("this event's seating layout is misconfigured ({detail})")
            }
            LedgerError::InvalidSeat { seat, .. } => {
                format!("seat {seat} is not part of the selected tier, please pick seats from the seat map")
            }
            LedgerError::SeatUnavailable(seats) => format!(
                "that seat was just taken, please choose another: {}",
                join_seats(seats)
            ),
            LedgerError::UnknownTier(tier) => {
                format!("ticket tier {tier} is not offered for this event")
            }
            LedgerError::EventNotFound(_) => "this event is no longer available".into(),
            LedgerError::BookingNotFound(_) => "we could not find that booking".into(),
            LedgerError::Forbidden(why) => format!("you are not allowed to do that: {why}"),
            LedgerError::AlreadyCancelled(_) => "this booking has already been cancelled".into(),
            LedgerError::PaymentSettled(_) => {
                "payment for this booking has already gone through; cancel it to get a refund".into()
            }
            LedgerError::HasBookings(_) => {
                "this event still has active bookings; cancel them before withdrawing it".into()
            }
            LedgerError::InvariantViolation { .. } => {
                "something went wrong on our side, your booking was not made".into()
            }
            LedgerError::Transient(_) => "the service is busy, please try again in a moment".into(),
            LedgerError::LimitExceeded(what) => format!("request too large: {what}"),
        }
    }

    /// SQLSTATE reported on the wire.
    pub fn sqlstate(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Config | ErrorKind::InvalidSeat | ErrorKind::UnknownTier => "22023",
            ErrorKind::SeatUnavailable => "23505",
            ErrorKind::NotFound => "P0002",
            ErrorKind::Forbidden => "42501",
            ErrorKind::AlreadyCancelled | ErrorKind::WrongState => "55000",
            ErrorKind::InvariantViolation => "XX000",
            ErrorKind::TransientStorage => "40001",
            ErrorKind::LimitExceeded => "54000",
        }
    }
}

impl From<StoreError> for LedgerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Missing(id) => LedgerError::BookingNotFound(id),
            other => LedgerError::Transient(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn seat_unavailable_names_every_seat() {
        let err = LedgerError::SeatUnavailable(vec![SeatId::new("C", 2), SeatId::new("D", 1)]);
        assert_eq!(err.to_string(), "seats unavailable: C2, D1");
        assert!(err.user_message().contains("C2, D1"));
        assert_eq!(err.kind(), ErrorKind::SeatUnavailable);
        assert_eq!(err.sqlstate(), "23505");
    }

    #[test]
    fn only_transient_is_retryable() {
        assert!(LedgerError::Transient("disk".into()).is_retryable());
        assert!(!LedgerError::SeatUnavailable(vec![]).is_retryable());
        assert!(!LedgerError::Config("x".into()).is_retryable());
    }

    #[test]
    fn store_errors_map_into_taxonomy() {
        let id = Ulid::new();
        let missing: LedgerError = StoreError::Missing(id).into();
        assert!(matches!(missing, LedgerError::BookingNotFound(b) if b == id));
        let conflict: LedgerError = StoreError::Conflict.into();
        assert_eq!(conflict.kind(), ErrorKind::TransientStorage);
    }

    #[test]
    fn not_found_variants_share_a_kind() {
        assert_eq!(LedgerError::EventNotFound("e".into()).kind(), ErrorKind::NotFound);
        assert_eq!(LedgerError::BookingNotFound(Ulid::new()).kind(), ErrorKind::NotFound);
    }
}
