use std::fmt;

use serde::{Deserialize, Serialize};

use crate::engine::LedgerError;
use crate::model::Event;

/// Money in integer minor units (paise, cents). Rendered as major units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_minor(minor: u64) -> Self {
        Money(minor)
    }

    pub fn from_major(major: u64) -> Option<Self> {
        major.checked_mul(100).map(Money)
    }

    pub const fn minor_units(self) -> u64 {
        self.0
    }

    pub fn checked_mul(self, n: u64) -> Option<Money> {
        self.0.checked_mul(n).map(Money)
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

/// Authoritative total for `seat_count` seats of `tier_name`. Booking, display and
/// refund all go through here so they never disagree.
pub fn price_for(event: &Event, tier_name: &str, seat_count: usize) -> Result<Money, LedgerError> {
    let tier = event
        .tier(tier_name)
        .ok_or_else(|| LedgerError::UnknownTier(tier_name.to_string()))?;
    let count = u64::try_from(seat_count).map_err(|_| LedgerError::LimitExceeded("seat count"))?;
    tier.price
        .checked_mul(count)
        .ok_or(LedgerError::LimitExceeded("booking amount overflows"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TicketTier;

    fn summit() -> Event {
        Event::new(
            "summit",
            "Tech Innovation Summit",
            vec![
                TicketTier::new("Gold", Money::from_minor(5000), &["A", "B"]),
                TicketTier::new("Silver", Money::from_minor(3000), &["C", "D"]),
            ],
        )
    }

    #[test]
    fn unit_price_times_count() {
        let total = price_for(&summit(), "Silver", 3).unwrap();
        assert_eq!(total, Money::from_minor(9000));
        assert_eq!(price_for(&summit(), "Gold", 0).unwrap(), Money::ZERO);
    }

    #[test]
    fn unknown_tier_rejected() {
        let err = price_for(&summit(), "Platinum", 1).unwrap_err();
        assert!(matches!(err, LedgerError::UnknownTier(ref t) if t == "Platinum"));
    }

    #[test]
    fn overflow_is_a_limit_not_a_wrap() {
        let event = Event::new(
            "x",
            "x",
            vec![TicketTier::new("Gold", Money::from_minor(u64::MAX / 2), &["A"])],
        );
        assert!(matches!(
            price_for(&event, "Gold", 3),
            Err(LedgerError::LimitExceeded(_))
        ));
    }

    #[test]
    fn renders_major_units() {
        assert_eq!(Money::from_minor(150_005).to_string(), "1500.05");
        assert_eq!(Money::from_minor(7).to_string(), "0.07");
        assert_eq!(Money::from_major(25), Some(Money::from_minor(2500)));
    }
}
