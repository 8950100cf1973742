//! Seat universe of an event, derived on demand from its tier/row layout.
//!
//! Nothing here is stored: a seat is valid iff its row belongs to some tier of the
//! event and its number is within `[1, seats_per_row]`.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::engine::LedgerError;
use crate::limits::*;
use crate::model::{Event, TicketTier};

/// Row label + 1-based seat number. Text form is `"A3"`.
///
/// Ordering is by row label, then numerically by seat, so `A2 < A10`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeatId {
    pub row: String,
    pub number: u16,
}

impl SeatId {
    pub fn new(row: impl Into<String>, number: u16) -> Self {
        Self {
            row: row.into(),
            number,
        }
    }
}

impl fmt::Display for SeatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.row, self.number)
    }
}

impl FromStr for SeatId {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = |reason| LedgerError::InvalidSeat {
            seat: s.to_string(),
            reason,
        };
        let split = s.find(|c: char| c.is_ascii_digit()).unwrap_or(s.len());
        let (row, digits) = s.split_at(split);
        if !is_valid_row_label(row) {
            return Err(invalid("expected row letters followed by a seat number"));
        }
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid("expected row letters followed by a seat number"));
        }
        let number: u16 = digits
            .parse()
            .map_err(|_| invalid("seat number out of range"))?;
        Ok(SeatId::new(row, number))
    }
}

fn is_valid_row_label(label: &str) -> bool {
    !label.is_empty()
        && label.len() <= MAX_ROW_LABEL_LEN
        && label.chars().all(|c| c.is_ascii_alphabetic())
}

/// Seats of one tier, row order preserved: `row1 … row{seats_per_row}` per row.
pub fn seats_for_tier(tier: &TicketTier, seats_per_row: u16) -> Vec<SeatId> {
    let mut seats = Vec::with_capacity(tier.rows.len() * seats_per_row as usize);
    for row in &tier.rows {
        for number in 1..=seats_per_row {
            seats.push(SeatId::new(row.clone(), number));
        }
    }
    seats
}

/// Every seat of the event. A row claimed by two tiers makes ownership ambiguous.
pub fn all_seats(event: &Event) -> Result<BTreeSet<SeatId>, LedgerError> {
    let mut owner: HashMap<&str, &str> = HashMap::new();
    let mut seats = BTreeSet::new();
    for tier in &event.tiers {
        for row in &tier.rows {
            if let Some(other) = owner.insert(row.as_str(), tier.name.as_str())
                && other != tier.name
            {
                return Err(LedgerError::Config(format!(
                    "row {row} is assigned to both {other} and {}",
                    tier.name
                )));
            }
        }
        seats.extend(seats_for_tier(tier, event.seats_per_row));
    }
    Ok(seats)
}

/// Reverse lookup from a seat to the tier that owns its row.
pub fn tier_of<'a>(event: &'a Event, seat: &SeatId) -> Option<&'a TicketTier> {
    if seat.number == 0 || seat.number > event.seats_per_row {
        return None;
    }
    event
        .tiers
        .iter()
        .find(|t| t.rows.iter().any(|r| *r == seat.row))
}

/// Full layout check run before a catalog entry is accepted.
pub fn validate_layout(event: &Event) -> Result<(), LedgerError> {
    if event.id.is_empty() {
        return Err(LedgerError::Config("event id is empty".into()));
    }
    if event.id.len() > MAX_EVENT_ID_LEN {
        return Err(LedgerError::LimitExceeded("event id too long"));
    }
    if event.title.len() > MAX_NAME_LEN {
        return Err(LedgerError::LimitExceeded("event title too long"));
    }
    if event.tiers.is_empty() {
        return Err(LedgerError::Config("event has no tiers".into()));
    }
    if event.tiers.len() > MAX_TIERS_PER_EVENT {
        return Err(LedgerError::LimitExceeded("too many tiers"));
    }
    if event.seats_per_row == 0 {
        return Err(LedgerError::Config("seats per row must be at least 1".into()));
    }
    if event.seats_per_row > MAX_SEATS_PER_ROW {
        return Err(LedgerError::LimitExceeded("too many seats per row"));
    }

    let mut names = HashSet::new();
    let mut row_count = 0usize;
    for tier in &event.tiers {
        if tier.name.is_empty() {
            return Err(LedgerError::Config("tier name is empty".into()));
        }
        if tier.name.len() > MAX_NAME_LEN {
            return Err(LedgerError::LimitExceeded("tier name too long"));
        }
        if !names.insert(tier.name.as_str()) {
            return Err(LedgerError::Config(format!("duplicate tier {}", tier.name)));
        }
        if tier.rows.is_empty() {
            return Err(LedgerError::Config(format!("tier {} has no rows", tier.name)));
        }
        if let Some(bad) = tier.rows.iter().find(|r| !is_valid_row_label(r)) {
            return Err(LedgerError::Config(format!(
                "tier {}: row label {bad:?} must be 1-{MAX_ROW_LABEL_LEN} ASCII letters",
                tier.name
            )));
        }
        row_count += tier.rows.len();
    }
    if row_count > MAX_ROWS_PER_EVENT {
        return Err(LedgerError::LimitExceeded("too many rows"));
    }

    all_seats(event).map(|_| ())
}

/// Parse a comma-separated seat list such as `"C1, C2"`.
pub fn parse_seat_list(text: &str) -> Result<Vec<SeatId>, LedgerError> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(SeatId::from_str)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::Money;

    fn tier(name: &str, rows: &[&str]) -> TicketTier {
        TicketTier::new(name, Money::from_minor(1000), rows)
    }

    fn jazz() -> Event {
        Event::new(
            "jazz",
            "Jazz Fest",
            vec![tier("Gold", &["A"]), tier("Silver", &["C", "D"])],
        )
    }

    #[test]
    fn seat_id_text_form() {
        assert_eq!(SeatId::new("A", 3).to_string(), "A3");
        assert_eq!("C10".parse::<SeatId>().unwrap(), SeatId::new("C", 10));
        assert_eq!(" AA7 ".parse::<SeatId>().unwrap(), SeatId::new("AA", 7));
    }

    #[test]
    fn seat_id_rejects_garbage() {
        for bad in ["", "7", "C", "C1x", "1C", "C-1", "C99999999"] {
            let err = bad.parse::<SeatId>().unwrap_err();
            assert!(matches!(err, LedgerError::InvalidSeat { .. }), "{bad}: {err:?}");
        }
    }

    #[test]
    fn seat_order_is_numeric_within_row() {
        let mut seats = vec![SeatId::new("A", 10), SeatId::new("B", 1), SeatId::new("A", 2)];
        seats.sort();
        assert_eq!(
            seats,
            vec![SeatId::new("A", 2), SeatId::new("A", 10), SeatId::new("B", 1)]
        );
    }

    #[test]
    fn tier_seats_preserve_row_order() {
        let seats = seats_for_tier(&tier("Silver", &["D", "C"]), 3);
        let text: Vec<String> = seats.iter().map(|s| s.to_string()).collect();
        assert_eq!(text, ["D1", "D2", "D3", "C1", "C2", "C3"]);
    }

    #[test]
    fn all_seats_is_union_of_tiers() {
        let seats = all_seats(&jazz()).unwrap();
        assert_eq!(seats.len(), 30);
        assert!(seats.contains(&SeatId::new("A", 1)));
        assert!(seats.contains(&SeatId::new("D", 10)));
        assert!(!seats.contains(&SeatId::new("B", 1)));
    }

    #[test]
    fn shared_row_is_a_config_error() {
        let event = Event::new("x", "x", vec![tier("Gold", &["A"]), tier("Silver", &["A", "B"])]);
        assert!(matches!(all_seats(&event), Err(LedgerError::Config(_))));
        assert!(matches!(validate_layout(&event), Err(LedgerError::Config(_))));
    }

    #[test]
    fn tier_of_checks_row_and_number() {
        let event = jazz();
        assert_eq!(tier_of(&event, &SeatId::new("C", 1)).map(|t| t.name.as_str()), Some("Silver"));
        assert_eq!(tier_of(&event, &SeatId::new("A", 10)).map(|t| t.name.as_str()), Some("Gold"));
        assert!(tier_of(&event, &SeatId::new("A", 11)).is_none());
        assert!(tier_of(&event, &SeatId::new("A", 0)).is_none());
        assert!(tier_of(&event, &SeatId::new("Z", 9)).is_none());
    }

    #[test]
    fn validate_layout_rejects_bad_shapes() {
        let no_tiers = Event::new("x", "x", vec![]);
        assert!(matches!(validate_layout(&no_tiers), Err(LedgerError::Config(_))));

        let empty_rows = Event::new("x", "x", vec![tier("Gold", &[])]);
        assert!(matches!(validate_layout(&empty_rows), Err(LedgerError::Config(_))));

        let numeric_row = Event::new("x", "x", vec![tier("Gold", &["A1"])]);
        assert!(matches!(validate_layout(&numeric_row), Err(LedgerError::Config(_))));

        let dup_tier = Event::new("x", "x", vec![tier("Gold", &["A"]), tier("Gold", &["B"])]);
        assert!(matches!(validate_layout(&dup_tier), Err(LedgerError::Config(_))));

        let zero_width = jazz().with_seats_per_row(0);
        assert!(matches!(validate_layout(&zero_width), Err(LedgerError::Config(_))));

        let too_wide = jazz().with_seats_per_row(MAX_SEATS_PER_ROW + 1);
        assert!(matches!(validate_layout(&too_wide), Err(LedgerError::LimitExceeded(_))));

        assert!(validate_layout(&jazz()).is_ok());
    }

    #[test]
    fn parse_seat_list_skips_blanks() {
        let seats = parse_seat_list("C1, C2,,D10").unwrap();
        assert_eq!(seats, vec![SeatId::new("C", 1), SeatId::new("C", 2), SeatId::new("D", 10)]);
        assert!(parse_seat_list("").unwrap().is_empty());
        assert!(parse_seat_list("C1,??").is_err());
    }
}
