use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::pricing::Money;
use crate::seatmap::SeatId;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

/// Opaque id handed out by the event catalog.
pub type EventId = String;

/// Opaque id handed out by the identity provider.
pub type UserId = String;

pub type BookingId = Ulid;

pub const DEFAULT_SEATS_PER_ROW: u16 = 10;

/// A named pricing category owning a set of row labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketTier {
    pub name: String,
    /// Unit price in minor currency units.
    pub price: Money,
    pub rows: Vec<String>,
}

impl TicketTier {
    pub fn new(name: impl Into<String>, price: Money, rows: &[&str]) -> Self {
        Self {
            name: name.into(),
            price,
            rows: rows.iter().map(|r| r.to_string()).collect(),
        }
    }
}

/// Catalog entry. Read-only input to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub title: String,
    pub tiers: Vec<TicketTier>,
    pub seats_per_row: u16,
}

impl Event {
    pub fn new(id: impl Into<EventId>, title: impl Into<String>, tiers: Vec<TicketTier>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            tiers,
            seats_per_row: DEFAULT_SEATS_PER_ROW,
        }
    }

    pub fn with_seats_per_row(mut self, seats_per_row: u16) -> Self {
        self.seats_per_row = seats_per_row;
        self
    }

    pub fn tier(&self, name: &str) -> Option<&TicketTier> {
        self.tiers.iter().find(|t| t.name == name)
    }

    pub fn total_seats(&self) -> usize {
        self.tiers
            .iter()
            .map(|t| t.rows.len() * self.seats_per_row as usize)
            .sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Confirmed,
    /// Cancelled by the ticket holder; the amount goes back to the payer.
    Refunded,
    /// Released because the payment channel declined the charge.
    Cancelled,
}

impl BookingStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, BookingStatus::Confirmed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::Refunded => "REFUNDED",
            BookingStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub event_id: EventId,
    pub user_id: UserId,
    pub tier_name: String,
    /// Seats in request order. Never contains duplicates.
    pub seats: Vec<SeatId>,
    pub total_amount: Money,
    pub created_at: Ms,
    pub status: BookingStatus,
    /// Opaque confirmation token, also what the ticket QR code encodes.
    pub token: String,
    pub paid_at: Option<Ms>,
    /// When the booking reached a terminal status.
    pub closed_at: Option<Ms>,
}

impl Booking {
    pub fn is_confirmed(&self) -> bool {
        self.status == BookingStatus::Confirmed
    }

    pub fn is_paid(&self) -> bool {
        self.paid_at.is_some()
    }

    /// Comma-joined seat list, e.g. `"C1,C2"`.
    pub fn seat_list(&self) -> String {
        self.seats
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Admin,
}

/// Caller identity as supplied by the identity provider. Never authenticated here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub role: Role,
}

impl Identity {
    pub fn user(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            role: Role::User,
        }
    }

    pub fn admin(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            role: Role::Admin,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Ledger state changes, flat with no nesting. This is the WAL record format and
/// what subscribers of the notify hub receive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Record {
    EventPublished {
        event: Event,
    },
    EventWithdrawn {
        id: EventId,
    },
    BookingReserved {
        booking: Booking,
    },
    BookingStatusChanged {
        id: BookingId,
        event_id: EventId,
        status: BookingStatus,
        at: Ms,
    },
    PaymentRecorded {
        id: BookingId,
        event_id: EventId,
        paid_at: Ms,
    },
}

impl Record {
    pub fn event_id(&self) -> &str {
        match self {
            Record::EventPublished { event } => &event.id,
            Record::EventWithdrawn { id } => id,
            Record::BookingReserved { booking } => &booking.event_id,
            Record::BookingStatusChanged { event_id, .. }
            | Record::PaymentRecorded { event_id, .. } => event_id,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeatStatus {
    Available,
    Taken,
}

impl SeatStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SeatStatus::Available => "AVAILABLE",
            SeatStatus::Taken => "TAKEN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeatView {
    pub seat: SeatId,
    pub tier: String,
    pub status: SeatStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occupancy {
    pub event_id: EventId,
    pub total_seats: usize,
    pub booked_seats: usize,
    pub free_seats: usize,
    pub confirmed_bookings: usize,
    /// Sum of `total_amount` over confirmed bookings.
    pub revenue: Money,
}
