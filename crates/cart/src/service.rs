//! Cart service handle.
//!
//! One `CartService` per shopper session. It owns the local cart state and
//! the sync engine; callers hold cheap clones of the handle instead of a
//! global store.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tracing::instrument;

use d4k_cart_core::LineKey;

use crate::cart::{CartAggregate, CartState, CatalogItem, Divergence};
use crate::config::CartConfig;
use crate::gateway::{GatewayError, HttpCartGateway, RemoteCartGateway};
use crate::persistence::{FileSnapshotStore, SnapshotStore};
use crate::sync::{LocalChange, SyncEngine, SyncError, SyncOutcome, SyncStatus};

/// Errors that can occur when building a service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),
}

/// Result of a local mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct CartUpdate {
    /// Whether the local cart changed.
    pub changed: bool,
    /// Remote propagation attempt; `None` when nothing changed locally.
    pub sync: Option<SyncOutcome>,
    /// The cart after the mutation (and after propagation, if it ran).
    pub cart: CartAggregate,
}

/// Shopper-facing cart: optimistic local edits, mirrored remotely when the
/// session is authenticated.
///
/// Cheaply cloneable via `Arc`.
#[derive(Clone)]
pub struct CartService {
    inner: Arc<CartServiceInner>,
}

struct CartServiceInner {
    cart: Arc<Mutex<CartState>>,
    engine: SyncEngine,
}

impl std::fmt::Debug for CartService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CartService")
            .field("cart", &*self.lock_cart())
            .field("engine", &self.inner.engine)
            .finish()
    }
}

impl CartService {
    /// Create a service around an existing cart state and gateway.
    #[must_use]
    pub fn new(
        state: CartState,
        gateway: Arc<dyn RemoteCartGateway>,
        sync_deadline: Duration,
    ) -> Self {
        let cart = Arc::new(Mutex::new(state));
        let engine = SyncEngine::new(cart.clone(), gateway, sync_deadline);
        Self {
            inner: Arc::new(CartServiceInner { cart, engine }),
        }
    }

    /// Build a service from configuration: the file snapshot store and the
    /// HTTP gateway. The cart is rehydrated from its snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP gateway cannot be built.
    pub fn from_config(config: &CartConfig) -> Result<Self, ServiceError> {
        let store: Arc<dyn SnapshotStore> = Arc::new(FileSnapshotStore::new(&config.snapshot_dir));
        let state = CartState::load(store, config.snapshot_slot.clone());
        let gateway = HttpCartGateway::new(&config.remote)?;
        Ok(Self::new(state, Arc::new(gateway), config.sync_timeout))
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// A value copy of the current cart.
    #[must_use]
    pub fn snapshot(&self) -> CartAggregate {
        self.lock_cart().snapshot()
    }

    /// Quantity of the line with this key, or 0 if absent.
    #[must_use]
    pub fn item_quantity(&self, key: &LineKey) -> u32 {
        self.lock_cart().item_quantity(key)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock_cart().aggregate().is_empty()
    }

    /// Number of distinct lines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_cart().aggregate().len()
    }

    /// Whether local edits are not yet confirmed by the remote.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.lock_cart().is_pending()
    }

    /// Lines where the local cart and the last confirmed remote cart differ.
    #[must_use]
    pub fn divergence(&self) -> Vec<Divergence> {
        self.lock_cart().divergence()
    }

    #[must_use]
    pub fn sync_status(&self) -> SyncStatus {
        self.inner.engine.status()
    }

    /// The sync-error marker, if the last attempt failed.
    #[must_use]
    pub fn last_sync_error(&self) -> Option<SyncError> {
        self.inner.engine.last_error()
    }

    /// Acknowledge the sync-error marker.
    pub fn clear_sync_error(&self) {
        self.inner.engine.clear_error();
    }

    #[must_use]
    pub fn engine(&self) -> &SyncEngine {
        &self.inner.engine
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Add `quantity` units of `item`.
    #[instrument(skip(self, item), fields(key = %item.key()))]
    pub async fn add_item(&self, item: CatalogItem, quantity: u32) -> CartUpdate {
        let key = item.key();
        let changed = self.lock_cart().add_item(item, quantity);
        self.settle(changed, LocalChange::Line(key)).await
    }

    /// Remove the line with this key.
    #[instrument(skip(self))]
    pub async fn remove_item(&self, key: &LineKey) -> CartUpdate {
        let changed = self.lock_cart().remove_item(key);
        self.settle(changed, LocalChange::Line(key.clone())).await
    }

    /// Set a line's quantity. Zero or less removes the line.
    #[instrument(skip(self))]
    pub async fn update_quantity(&self, key: &LineKey, quantity: i64) -> CartUpdate {
        let changed = self.lock_cart().update_quantity(key, quantity);
        self.settle(changed, LocalChange::Line(key.clone())).await
    }

    /// Empty the cart.
    #[instrument(skip(self))]
    pub async fn clear(&self) -> CartUpdate {
        let changed = self.lock_cart().clear();
        self.settle(changed, LocalChange::Clear).await
    }

    /// Forget the cart after a completed checkout. Nothing is sent remotely.
    pub fn complete_checkout(&self) {
        self.lock_cart().complete_checkout();
    }

    /// Reconcile with the remote cart (e.g. right after login).
    pub async fn sync_cart(&self) -> SyncOutcome {
        self.inner.engine.sync_cart().await
    }

    async fn settle(&self, changed: bool, change: LocalChange) -> CartUpdate {
        let sync = if changed {
            Some(self.inner.engine.propagate(change).await)
        } else {
            None
        };
        CartUpdate {
            changed,
            sync,
            cart: self.snapshot(),
        }
    }

    fn lock_cart(&self) -> MutexGuard<'_, CartState> {
        self.inner.cart.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
