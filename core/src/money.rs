//! Money amounts in minor units.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Money amount in pence (avoids floating point issues)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(u64);

impl Money {
    /// Zero pence
    pub const ZERO: Self = Self(0);

    /// Creates a new `Money` amount from pence
    #[must_use]
    pub const fn from_pence(pence: u64) -> Self {
        Self(pence)
    }

    /// Creates a `Money` amount from whole pounds
    #[must_use]
    pub const fn from_pounds(pounds: u64) -> Self {
        Self(pounds * 100)
    }

    /// Returns the amount in pence
    #[must_use]
    pub const fn pence(&self) -> u64 {
        self.0
    }

    /// Checks if this amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Adds two amounts, `None` on overflow
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(sum) => Some(Self(sum)),
            None => None,
        }
    }

    /// Subtracts `other`, `None` if the result would be negative
    #[must_use]
    pub const fn checked_sub(self, other: Self) -> Option<Self> {
        match self.0.checked_sub(other.0) {
            Some(diff) => Some(Self(diff)),
            None => None,
        }
    }

    /// Subtracts `other`, clamping at zero
    #[must_use]
    pub const fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    /// Multiplies by a ticket quantity, `None` on overflow
    #[must_use]
    pub const fn checked_mul(self, quantity: u32) -> Option<Self> {
        match self.0.checked_mul(quantity as u64) {
            Some(product) => Some(Self(product)),
            None => None,
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "£{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, |acc, m| Self(acc.0.saturating_add(m.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn money_display() {
        assert_eq!(Money::from_pence(100).to_string(), "£1.00");
        assert_eq!(Money::from_pence(1050).to_string(), "£10.50");
        assert_eq!(Money::from_pounds(2).to_string(), "£2.00");
    }

    #[test]
    fn checked_arithmetic() {
        let five = Money::from_pounds(5);
        let two = Money::from_pounds(2);
        assert_eq!(five.checked_sub(two), Some(Money::from_pounds(3)));
        assert_eq!(two.checked_sub(five), None);
        assert_eq!(two.saturating_sub(five), Money::ZERO);
        assert_eq!(two.checked_mul(3), Some(Money::from_pounds(6)));
        assert_eq!(Money::from_pence(u64::MAX).checked_mul(2), None);
    }

    #[test]
    fn sums_amounts() {
        let total: Money = [Money::from_pence(150), Money::from_pence(250)].into_iter().sum();
        assert_eq!(total, Money::from_pounds(4));
    }

    proptest::proptest! {
        #[test]
        fn sub_then_add_restores(a in 0u64..1_000_000_000, b in 0u64..1_000_000_000) {
            let (a, b) = (Money::from_pence(a), Money::from_pence(b));
            match a.checked_sub(b) {
                Some(diff) => proptest::prop_assert_eq!(diff.checked_add(b), Some(a)),
                None => proptest::prop_assert!(a < b),
            }
        }
    }
}
