//! The cart aggregate: line items plus derived totals.
//!
//! `total_items` and `total_price` are never set independently; every
//! mutation ends in [`CartAggregate::commit`]. Deserialization goes
//! through [`CartAggregate::try_from_items`] so a snapshot with stale totals,
//! duplicate keys or zero quantities is normalized on the way in.
//!
//! The total price must stay representable. An edit that would overflow it
//! is refused and leaves the cart as it was.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use d4k_cart_core::{LineKey, Price, clamp};

use super::item::{CatalogItem, LineItem};

/// The cart's total price cannot be represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cart total price overflows")]
pub struct TotalOverflow;

/// Line items and their derived totals.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "AggregateRepr")]
pub struct CartAggregate {
    items: Vec<LineItem>,
    total_items: u64,
    total_price: Price,
}

/// Wire shape of a snapshot. Stored totals are ignored and recomputed.
#[derive(Deserialize)]
struct AggregateRepr {
    #[serde(default)]
    items: Vec<LineItem>,
}

impl TryFrom<AggregateRepr> for CartAggregate {
    type Error = TotalOverflow;

    fn try_from(repr: AggregateRepr) -> Result<Self, TotalOverflow> {
        Self::try_from_items(repr.items)
    }
}

impl CartAggregate {
    /// Create an empty cart.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an aggregate from arbitrary lines, restoring every invariant.
    ///
    /// Lines sharing an identity key are folded into the first occurrence,
    /// quantities are clamped to the stock ceiling and lines left at zero are
    /// dropped.
    ///
    /// # Errors
    ///
    /// Returns `TotalOverflow` if the lines' total price cannot be represented.
    pub fn try_from_items(
        lines: impl IntoIterator<Item = LineItem>,
    ) -> Result<Self, TotalOverflow> {
        let mut items: Vec<LineItem> = Vec::new();

        for line in lines {
            let key = line.key();
            if let Some(existing) = items.iter_mut().find(|i| i.key() == key) {
                warn!(key = %key, "Folding duplicate cart line");
                existing.quantity = existing.quantity.saturating_add(line.quantity);
                if line.stock_ceiling.is_some() {
                    existing.stock_ceiling = line.stock_ceiling;
                }
            } else {
                items.push(line);
            }
        }

        for item in &mut items {
            item.quantity = clamp(item.quantity, item.stock_ceiling);
        }
        items.retain(|item| {
            if item.quantity == 0 {
                warn!(key = %item.key(), "Dropping cart line with no available quantity");
            }
            item.quantity > 0
        });

        let (total_items, total_price) = totals(&items)?;
        Ok(Self {
            items,
            total_items,
            total_price,
        })
    }

    /// Line items in insertion order.
    #[must_use]
    pub fn items(&self) -> &[LineItem] {
        &self.items
    }

    /// Sum of all line quantities.
    #[must_use]
    pub const fn total_items(&self) -> u64 {
        self.total_items
    }

    /// Sum of all line totals.
    #[must_use]
    pub const fn total_price(&self) -> Price {
        self.total_price
    }

    /// Number of distinct lines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the cart has no lines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Look up a line by identity key.
    #[must_use]
    pub fn get(&self, key: &LineKey) -> Option<&LineItem> {
        self.items.iter().find(|item| item.key() == *key)
    }

    /// Quantity of the line with this key, or 0 if absent.
    #[must_use]
    pub fn quantity_of(&self, key: &LineKey) -> u32 {
        self.get(key).map_or(0, |item| item.quantity)
    }

    /// Whether the derived totals and line invariants all hold.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let quantities_valid = self.items.iter().all(|item| {
            item.quantity >= 1 && clamp(item.quantity, item.stock_ceiling) == item.quantity
        });
        let keys_unique = self.items.iter().enumerate().all(|(i, item)| {
            let key = item.key();
            self.items.iter().skip(i + 1).all(|other| other.key() != key)
        });

        quantities_valid
            && keys_unique
            && totals(&self.items) == Ok((self.total_items, self.total_price))
    }

    // =========================================================================
    // Mutations (crate-private, driven by CartState)
    // =========================================================================

    /// Add `quantity` units of `item`. Returns whether anything changed.
    pub(crate) fn add(&mut self, item: CatalogItem, quantity: u32) -> bool {
        if quantity == 0 {
            return false;
        }

        let previous = self.items.clone();
        let key = item.key();
        let changed = match self.position(&key) {
            Some(idx) => {
                let Some(existing) = self.items.get_mut(idx) else {
                    return false;
                };
                let ceiling = item.stock_ceiling.or(existing.stock_ceiling);
                let target = clamp(existing.quantity.saturating_add(quantity), ceiling);

                if target == existing.quantity {
                    false
                } else if target == 0 {
                    self.items.remove(idx);
                    true
                } else {
                    existing.quantity = target;
                    existing.stock_ceiling = ceiling;
                    true
                }
            }
            None => {
                let target = clamp(quantity, item.stock_ceiling);
                if target == 0 {
                    false
                } else {
                    self.items.push(LineItem::from_catalog(item, target));
                    true
                }
            }
        };

        changed && self.commit(previous)
    }

    /// Remove the line with this key. Returns whether it existed.
    pub(crate) fn remove(&mut self, key: &LineKey) -> bool {
        let previous = self.items.clone();
        self.items.retain(|item| item.key() != *key);
        self.items.len() != previous.len() && self.commit(previous)
    }

    /// Set the quantity of a line. Zero or less removes it.
    pub(crate) fn set_quantity(&mut self, key: &LineKey, quantity: i64) -> bool {
        let Some(idx) = self.position(key) else {
            return false;
        };
        if quantity <= 0 {
            return self.remove(key);
        }

        let Some(item) = self.items.get_mut(idx) else {
            return false;
        };
        let requested = u32::try_from(quantity).unwrap_or(u32::MAX);
        let target = clamp(requested, item.stock_ceiling);

        if target == 0 {
            // Out of stock: a line cannot sit at quantity 0.
            return self.remove(key);
        }
        if target == item.quantity {
            return false;
        }
        let previous_quantity = item.quantity;
        item.quantity = target;
        if self.refresh_totals().is_ok() {
            return true;
        }
        if let Some(item) = self.items.get_mut(idx) {
            item.quantity = previous_quantity;
        }
        false
    }

    /// Remove every line. Returns whether the cart was non-empty.
    pub(crate) fn clear(&mut self) -> bool {
        let changed = !self.items.is_empty();
        self.items.clear();
        self.total_items = 0;
        self.total_price = Price::ZERO;
        changed
    }

    fn position(&self, key: &LineKey) -> Option<usize> {
        self.items.iter().position(|item| item.key() == *key)
    }

    /// Recompute the totals, restoring `previous` lines if they overflow.
    fn commit(&mut self, previous: Vec<LineItem>) -> bool {
        if self.refresh_totals().is_ok() {
            return true;
        }
        self.items = previous;
        false
    }

    fn refresh_totals(&mut self) -> Result<(), TotalOverflow> {
        match totals(&self.items) {
            Ok((total_items, total_price)) => {
                self.total_items = total_items;
                self.total_price = total_price;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Refusing cart edit");
                Err(e)
            }
        }
    }
}

fn totals(items: &[LineItem]) -> Result<(u64, Price), TotalOverflow> {
    let total_items: u64 = items.iter().map(|i| u64::from(i.quantity)).sum();
    let total_price = items.iter().try_fold(Price::ZERO, |acc, item| {
        item.line_total().and_then(|line| acc.checked_add(line))
    });
    total_price.map(|price| (total_items, price)).ok_or(TotalOverflow)
}
