//! Money in whole currency units.

use serde::{Deserialize, Serialize};

/// An amount of money in whole currency units.
///
/// The storefront trades in a single currency without minor units, so a
/// plain `i64` is exact. Percentage discounts round half-up to a whole unit.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Creates an amount.
    pub const fn new(amount: i64) -> Self {
        Self(amount)
    }

    /// Returns zero.
    pub const fn zero() -> Self {
        Self(0)
    }

    /// Returns the raw amount.
    pub fn amount(&self) -> i64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Multiplies by a quantity, or `None` if the product does not fit.
    pub fn checked_times(&self, quantity: u32) -> Option<Money> {
        self.0.checked_mul(i64::from(quantity)).map(Money)
    }

    pub fn checked_add(&self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    pub fn checked_sub(&self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money)
    }

    /// Subtracts `other`, flooring the result at zero.
    pub fn minus_floor_zero(&self, other: Money) -> Money {
        Money(self.0.saturating_sub(other.0).max(0))
    }

    /// Returns `rate` percent of this amount, rounded half-up, or `None` if
    /// the result does not fit.
    pub fn percent_half_up(&self, rate: u32) -> Option<Money> {
        let scaled = i128::from(self.0) * i128::from(rate);
        let rounded = if scaled >= 0 {
            (scaled + 50) / 100
        } else {
            -((-scaled + 50) / 100)
        };
        i64::try_from(rounded).ok().map(Money)
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Money {
    fn from(amount: i64) -> Self {
        Self(amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_times_and_add() {
        let total = Money::new(1000)
            .checked_times(2)
            .and_then(|a| a.checked_add(Money::new(250).checked_times(3)?));
        assert_eq!(total, Some(Money::new(2750)));
    }

    #[test]
    fn test_overflow_is_reported_not_wrapped() {
        let huge = Money::new(5_000_000_000_000_000_000);
        assert_eq!(huge.checked_times(2), None);
        assert_eq!(huge.checked_add(huge), None);
        assert_eq!(Money::new(i64::MIN).checked_sub(Money::new(1)), None);
        assert_eq!(huge.checked_times(1), Some(huge));
    }

    #[test]
    fn test_minus_floor_zero() {
        assert_eq!(Money::new(1000).minus_floor_zero(Money::new(100)), Money::new(900));
        assert_eq!(Money::new(100).minus_floor_zero(Money::new(1000)), Money::zero());
        assert_eq!(
            Money::new(i64::MAX).minus_floor_zero(Money::new(-1)),
            Money::new(i64::MAX)
        );
    }

    #[test]
    fn test_percent_rounds_half_up() {
        // 10% of 1005 = 100.5 -> 101
        assert_eq!(Money::new(1005).percent_half_up(10), Some(Money::new(101)));
        // 10% of 1004 = 100.4 -> 100
        assert_eq!(Money::new(1004).percent_half_up(10), Some(Money::new(100)));
        assert_eq!(Money::new(999).percent_half_up(100), Some(Money::new(999)));
        assert_eq!(Money::new(1).percent_half_up(50), Some(Money::new(1)));
    }

    #[test]
    fn test_percent_of_large_amounts_does_not_overflow() {
        let max = Money::new(i64::MAX);
        assert_eq!(max.percent_half_up(100), Some(max));
        assert_eq!(max.percent_half_up(200), None);
    }

    #[test]
    fn test_predicates() {
        assert!(Money::zero().is_zero());
        assert!(Money::new(1).is_positive());
        assert!(Money::new(-1).is_negative());
    }
}
