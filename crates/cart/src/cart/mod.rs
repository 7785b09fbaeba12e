//! Local cart model.
//!
//! - [`LineItem`] / [`CatalogItem`] - a purchasable line and its catalog source
//! - [`CartAggregate`] - lines plus derived totals, invariant-preserving
//! - [`CartState`] - the aggregate bound to a snapshot slot, with a
//!   confirmed remote view alongside the optimistic local one

mod aggregate;
mod item;
mod state;

pub use aggregate::{CartAggregate, TotalOverflow};
pub use item::{CatalogItem, LineItem};
pub use state::{CartState, Divergence};
