//! Local cart state with explicit persistence and a two-phase view.
//!
//! `CartState` holds two aggregates:
//!
//! - `current`: what the shopper sees, including optimistic local edits.
//! - `confirmed`: the last cart the remote gateway handed back, if any.
//!
//! `pending` is set by every effective local edit and cleared when a remote
//! pull replaces `current`. [`CartState::divergence`] lists the lines where
//! the two views disagree, which is what a conflict prompt would show.
//!
//! Every operation writes a snapshot before returning. Persistence failures
//! are logged and never surface to callers: local mutations cannot fail.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, warn};

use d4k_cart_core::LineKey;

use crate::persistence::{SnapshotStore, snapshot};

use super::aggregate::CartAggregate;
use super::item::CatalogItem;

/// A line where the local cart disagrees with the last confirmed remote cart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Divergence {
    /// Line identity.
    pub key: LineKey,
    /// Local quantity (0 if the line only exists remotely).
    pub local: u32,
    /// Confirmed remote quantity (0 if the line only exists locally).
    pub confirmed: u32,
}

/// In-memory cart bound to a snapshot slot.
pub struct CartState {
    current: CartAggregate,
    confirmed: Option<CartAggregate>,
    pending: bool,
    store: Arc<dyn SnapshotStore>,
    slot: String,
}

impl std::fmt::Debug for CartState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CartState")
            .field("current", &self.current)
            .field("confirmed", &self.confirmed)
            .field("pending", &self.pending)
            .field("slot", &self.slot)
            .finish_non_exhaustive()
    }
}

impl CartState {
    /// Create an empty cart bound to `slot` without reading the store.
    #[must_use]
    pub fn new(store: Arc<dyn SnapshotStore>, slot: impl Into<String>) -> Self {
        Self {
            current: CartAggregate::new(),
            confirmed: None,
            pending: false,
            store,
            slot: slot.into(),
        }
    }

    /// Rehydrate from the snapshot in `slot`, or start empty.
    ///
    /// An unreadable or undecodable snapshot is discarded with a warning.
    #[must_use]
    pub fn load(store: Arc<dyn SnapshotStore>, slot: impl Into<String>) -> Self {
        let mut state = Self::new(store, slot);
        match snapshot::load(state.store.as_ref(), &state.slot) {
            Ok(Some(aggregate)) => {
                debug!(
                    slot = %state.slot,
                    lines = aggregate.len(),
                    total_items = aggregate.total_items(),
                    "Cart rehydrated from snapshot"
                );
                state.pending = !aggregate.is_empty();
                state.current = aggregate;
            }
            Ok(None) => debug!(slot = %state.slot, "No cart snapshot, starting empty"),
            Err(e) => warn!(slot = %state.slot, error = %e, "Discarding unreadable cart snapshot"),
        }
        state
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// The current (optimistic) aggregate.
    #[must_use]
    pub const fn aggregate(&self) -> &CartAggregate {
        &self.current
    }

    /// A value copy of the current aggregate.
    #[must_use]
    pub fn snapshot(&self) -> CartAggregate {
        self.current.clone()
    }

    /// The last aggregate confirmed by the remote gateway.
    #[must_use]
    pub const fn confirmed(&self) -> Option<&CartAggregate> {
        self.confirmed.as_ref()
    }

    /// Whether local edits were made since the last confirmed pull.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.pending
    }

    /// Quantity of the line with this key, or 0 if absent.
    #[must_use]
    pub fn item_quantity(&self, key: &LineKey) -> u32 {
        self.current.quantity_of(key)
    }

    /// Lines whose local quantity differs from the confirmed remote quantity.
    ///
    /// Empty when nothing has been confirmed yet: a guest cart has nothing to
    /// diverge from.
    #[must_use]
    pub fn divergence(&self) -> Vec<Divergence> {
        let Some(confirmed) = &self.confirmed else {
            return Vec::new();
        };

        let keys: BTreeSet<LineKey> = self
            .current
            .items()
            .iter()
            .chain(confirmed.items())
            .map(super::LineItem::key)
            .collect();

        keys.into_iter()
            .filter_map(|key| {
                let local = self.current.quantity_of(&key);
                let remote = confirmed.quantity_of(&key);
                (local != remote).then_some(Divergence {
                    key,
                    local,
                    confirmed: remote,
                })
            })
            .collect()
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Add `quantity` units of `item`, merging with an existing line of the
    /// same identity key and clamping to known stock.
    ///
    /// Returns whether the cart changed.
    pub fn add_item(&mut self, item: CatalogItem, quantity: u32) -> bool {
        let key = item.key();
        let changed = self.current.add(item, quantity);
        debug!(key = %key, quantity, changed, "add_item");
        self.finish(changed)
    }

    /// Remove the line with this key. Absent keys are a no-op.
    pub fn remove_item(&mut self, key: &LineKey) -> bool {
        let changed = self.current.remove(key);
        debug!(key = %key, changed, "remove_item");
        self.finish(changed)
    }

    /// Set a line's quantity, clamped to `[1, stock]`. Zero or less removes it.
    pub fn update_quantity(&mut self, key: &LineKey, quantity: i64) -> bool {
        let changed = self.current.set_quantity(key, quantity);
        debug!(key = %key, quantity, changed, "update_quantity");
        self.finish(changed)
    }

    /// Empty the cart.
    pub fn clear(&mut self) -> bool {
        let changed = self.current.clear();
        debug!(changed, "clear");
        self.finish(changed)
    }

    /// Forget the cart after a completed checkout and delete its snapshot.
    ///
    /// The order consumed the remote cart, so there is nothing to confirm
    /// against until the next pull.
    pub fn complete_checkout(&mut self) {
        self.current = CartAggregate::new();
        self.confirmed = None;
        self.pending = false;
        if let Err(e) = self.store.remove(&self.slot) {
            warn!(slot = %self.slot, error = %e, "Failed to delete cart snapshot");
        }
        debug!(slot = %self.slot, "Cart discarded after checkout");
    }

    /// Adopt a remote cart wholesale. Local edits not reflected in it are lost.
    pub(crate) fn replace_with_remote(&mut self, aggregate: CartAggregate) {
        self.current = aggregate.clone();
        self.confirmed = Some(aggregate);
        self.pending = false;
        self.persist();
    }

    fn finish(&mut self, changed: bool) -> bool {
        if changed {
            self.pending = true;
        }
        self.persist();
        changed
    }

    fn persist(&self) {
        if let Err(e) = snapshot::save(self.store.as_ref(), &self.slot, &self.current) {
            warn!(slot = %self.slot, error = %e, "Failed to persist cart snapshot");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use d4k_cart_core::{Price, ProductId};

    use super::*;
    use crate::persistence::{MemorySnapshotStore, PersistenceError};

    const SLOT: &str = "cart";

    fn tee(size: &str) -> CatalogItem {
        CatalogItem::new(ProductId::new(1), "Tee", Price::from_cents(1000)).with_size(size)
    }

    fn key(size: &str) -> LineKey {
        LineKey::new(ProductId::new(1), Some(size))
    }

    #[test]
    fn test_every_mutation_persists() {
        let store = Arc::new(MemorySnapshotStore::new());
        let mut state = CartState::new(store.clone(), SLOT);

        state.add_item(tee("M"), 2);
        let saved = snapshot::decode(&store.contents(SLOT).unwrap()).unwrap();
        assert_eq!(saved, *state.aggregate());

        state.update_quantity(&key("M"), 5);
        let saved = snapshot::decode(&store.contents(SLOT).unwrap()).unwrap();
        assert_eq!(saved.total_items(), 5);

        state.clear();
        let saved = snapshot::decode(&store.contents(SLOT).unwrap()).unwrap();
        assert!(saved.is_empty());
    }

    #[test]
    fn test_load_rehydrates() {
        let store = Arc::new(MemorySnapshotStore::new());
        {
            let mut state = CartState::new(store.clone(), SLOT);
            state.add_item(tee("M"), 2);
            state.add_item(tee("L"), 1);
        }
        let state = CartState::load(store, SLOT);
        assert_eq!(state.aggregate().len(), 2);
        assert_eq!(state.item_quantity(&key("M")), 2);
        assert!(state.is_pending());
    }

    #[test]
    fn test_load_discards_corrupt_snapshot() {
        let store = Arc::new(MemorySnapshotStore::with_snapshot(SLOT, "{not json"));
        let state = CartState::load(store, SLOT);
        assert!(state.aggregate().is_empty());
        assert!(!state.is_pending());
    }

    #[test]
    fn test_mutations_survive_store_failure() {
        struct BrokenStore;
        impl SnapshotStore for BrokenStore {
            fn load(&self, _: &str) -> Result<Option<String>, PersistenceError> {
                Err(std::io::Error::other("disk gone").into())
            }
            fn save(&self, _: &str, _: &str) -> Result<(), PersistenceError> {
                Err(std::io::Error::other("disk gone").into())
            }
            fn remove(&self, _: &str) -> Result<(), PersistenceError> {
                Ok(())
            }
        }

        let mut state = CartState::load(Arc::new(BrokenStore), SLOT);
        assert!(state.add_item(tee("M"), 3));
        assert_eq!(state.item_quantity(&key("M")), 3);
    }

    #[test]
    fn test_replace_with_remote_confirms() {
        let store = Arc::new(MemorySnapshotStore::new());
        let mut state = CartState::new(store.clone(), SLOT);
        state.add_item(tee("M"), 2);
        assert!(state.is_pending());

        let mut remote = CartAggregate::new();
        remote.add(tee("M"), 4);
        state.replace_with_remote(remote.clone());

        assert!(!state.is_pending());
        assert_eq!(state.confirmed(), Some(&remote));
        assert_eq!(*state.aggregate(), remote);
        assert_eq!(snapshot::decode(&store.contents(SLOT).unwrap()).unwrap(), remote);
    }

    #[test]
    fn test_divergence_lists_local_edits() {
        let mut state = CartState::new(Arc::new(MemorySnapshotStore::new()), SLOT);
        assert!(state.divergence().is_empty());

        let mut remote = CartAggregate::new();
        remote.add(tee("M"), 2);
        remote.add(tee("L"), 1);
        state.replace_with_remote(remote);
        assert!(state.divergence().is_empty());

        state.update_quantity(&key("M"), 4);
        state.remove_item(&key("L"));
        state.add_item(tee("S"), 1);

        let divergence = state.divergence();
        assert_eq!(divergence.len(), 3);
        assert!(divergence.contains(&Divergence {
            key: key("M"),
            local: 4,
            confirmed: 2
        }));
        assert!(divergence.contains(&Divergence {
            key: key("L"),
            local: 0,
            confirmed: 1
        }));
        assert!(divergence.contains(&Divergence {
            key: key("S"),
            local: 1,
            confirmed: 0
        }));
    }

    #[test]
    fn test_complete_checkout_deletes_snapshot() {
        let store = Arc::new(MemorySnapshotStore::new());
        let mut state = CartState::new(store.clone(), SLOT);
        state.add_item(tee("M"), 2);
        assert!(store.contents(SLOT).is_some());

        state.complete_checkout();
        assert!(state.aggregate().is_empty());
        assert!(!state.is_pending());
        assert!(state.confirmed().is_none());
        assert!(store.contents(SLOT).is_none());
    }

    #[test]
    fn test_noop_does_not_mark_pending() {
        let mut state = CartState::new(Arc::new(MemorySnapshotStore::new()), SLOT);
        assert!(!state.remove_item(&key("M")));
        assert!(!state.is_pending());
    }
}
