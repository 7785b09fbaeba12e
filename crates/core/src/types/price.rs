//! Type-safe price representation using decimal arithmetic.
//!
//! Prices never go through floating point: line totals and cart totals are
//! exact `Decimal` products and sums, so a cart total always equals the sum
//! of its lines. Arithmetic is checked; a price that cannot be represented
//! is `None`, never a panic.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A unit or aggregate price in the store's currency.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Price(Decimal);

impl Price {
    /// A zero price.
    pub const ZERO: Self = Self(Decimal::ZERO);

    /// Create a new price.
    #[must_use]
    pub const fn new(amount: Decimal) -> Self {
        Self(amount)
    }

    /// Create a price from an integer number of cents.
    #[must_use]
    pub fn from_cents(cents: i64) -> Self {
        Self(Decimal::new(cents, 2))
    }

    /// Get the underlying decimal amount.
    #[must_use]
    pub const fn amount(&self) -> Decimal {
        self.0
    }

    /// Price of `quantity` units at this unit price, or `None` on overflow.
    #[must_use]
    pub fn checked_times(self, quantity: u32) -> Option<Self> {
        self.0.checked_mul(Decimal::from(quantity)).map(Self)
    }

    /// Sum of two prices, or `None` on overflow.
    #[must_use]
    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    /// Sum of all prices, or `None` if any partial sum overflows.
    #[must_use]
    pub fn checked_sum(prices: impl IntoIterator<Item = Self>) -> Option<Self> {
        prices
            .into_iter()
            .try_fold(Self::ZERO, |acc, price| acc.checked_add(price))
    }
}

impl From<Decimal> for Price {
    fn from(amount: Decimal) -> Self {
        Self(amount)
    }
}

impl std::fmt::Display for Price {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "${:.2}", self.0)
    }
}
