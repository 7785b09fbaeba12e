//! Reconciliation between the local cart and the remote cart.
//!
//! # Algorithm
//!
//! [`SyncEngine::sync_cart`]:
//!
//! 1. No credentials: skip (expected for guests, not an error).
//! 2. Another reconciliation in flight: skip. Callers retry on the next
//!    natural trigger rather than queueing.
//! 3. Fetch the remote cart.
//! 4. Push every local line whose key is absent remotely. Lines present on
//!    both sides are not pushed: the remote quantity wins, so re-syncing a
//!    settled cart never double-counts. A line the remote refuses (for
//!    example insufficient stock) is reported and the remaining lines are
//!    still pushed. If the push acknowledgment declares less stock than was
//!    pushed, the remote line is trimmed to it.
//! 5. Fetch again and translate the result.
//! 6. Replace the local cart with it wholesale and clear the error marker.
//!
//! Any other failure leaves the local cart exactly as it was and raises the
//! error marker. The whole attempt runs under a deadline; a stalled gateway
//! ends in [`SyncError::Timeout`] rather than an indefinite `Syncing`.
//!
//! Local edits made while authenticated go through
//! [`SyncEngine::propagate`], which makes the remote line match the local
//! one and then reconciles as above. Both paths share the in-flight guard.

mod error;
mod status;

pub use error::{SyncError, SyncStep};
pub use status::{
    ClampedPush, Overwrite, RejectedPush, SkipReason, SyncOutcome, SyncReport, SyncStatus,
};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{Span, debug, info, instrument, warn};
use uuid::Uuid;

use d4k_cart_core::{LineKey, clamp};

use crate::cart::{CartAggregate, CartState};
use crate::gateway::{
    AddLineRequest, GatewayError, RemoteCart, RemoteCartGateway, UpdateLineRequest,
    aggregate_from_remote,
};

/// A local edit to mirror on the remote cart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalChange {
    /// The line with this key was added, re-quantified or removed.
    Line(LineKey),
    /// The whole cart was emptied.
    Clear,
}

/// Holds the in-flight flag for the lifetime of one attempt.
///
/// Released on drop, so a cancelled or timed-out attempt frees the engine.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Orchestrates reconciliation for one cart.
pub struct SyncEngine {
    cart: Arc<Mutex<CartState>>,
    gateway: Arc<dyn RemoteCartGateway>,
    deadline: Duration,
    in_flight: AtomicBool,
    last_error: Mutex<Option<SyncError>>,
    last_synced_at: Mutex<Option<DateTime<Utc>>>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("deadline", &self.deadline)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    /// Create an engine reconciling `cart` against `gateway`.
    ///
    /// `deadline` bounds each whole attempt, not individual requests.
    #[must_use]
    pub fn new(
        cart: Arc<Mutex<CartState>>,
        gateway: Arc<dyn RemoteCartGateway>,
        deadline: Duration,
    ) -> Self {
        Self {
            cart,
            gateway,
            deadline,
            in_flight: AtomicBool::new(false),
            last_error: Mutex::new(None),
            last_synced_at: Mutex::new(None),
        }
    }

    /// Current engine status.
    #[must_use]
    pub fn status(&self) -> SyncStatus {
        if self.in_flight.load(Ordering::Acquire) {
            return SyncStatus::Syncing;
        }
        self.last_error()
            .map_or(SyncStatus::Idle, SyncStatus::IdleWithError)
    }

    /// The error raised by the last failed attempt, until a later attempt
    /// succeeds or it is cleared.
    #[must_use]
    pub fn last_error(&self) -> Option<SyncError> {
        lock(&self.last_error).clone()
    }

    /// Acknowledge the error marker.
    pub fn clear_error(&self) {
        *lock(&self.last_error) = None;
    }

    /// When the last attempt completed successfully.
    #[must_use]
    pub fn last_synced_at(&self) -> Option<DateTime<Utc>> {
        *lock(&self.last_synced_at)
    }

    /// Reconcile the local cart with the remote cart.
    #[instrument(skip(self), fields(attempt_id = tracing::field::Empty))]
    pub async fn sync_cart(&self) -> SyncOutcome {
        self.run(|attempt_id| self.reconcile(attempt_id)).await
    }

    /// Mirror a local edit on the remote cart, then reconcile.
    ///
    /// Skipped without credentials or while another attempt is in flight;
    /// the edit stays local and the next reconciliation decides its fate.
    #[instrument(skip(self), fields(attempt_id = tracing::field::Empty))]
    pub async fn propagate(&self, change: LocalChange) -> SyncOutcome {
        self.run(|attempt_id| async move {
            let refused = self.apply_change(&change).await?;
            let mut report = self.reconcile(attempt_id).await?;
            report.rejected.extend(refused);
            Ok(report)
        })
        .await
    }

    async fn run<F, Fut>(&self, attempt: F) -> SyncOutcome
    where
        F: FnOnce(Uuid) -> Fut,
        Fut: Future<Output = Result<SyncReport, SyncError>>,
    {
        if !self.gateway.is_authenticated().await {
            debug!("Not authenticated, skipping remote cart sync");
            return SyncOutcome::Skipped(SkipReason::NotAuthenticated);
        }
        let Some(_guard) = InFlight::acquire(&self.in_flight) else {
            debug!("Sync already in flight, skipping");
            return SyncOutcome::Skipped(SkipReason::AlreadyRunning);
        };

        let attempt_id = Uuid::new_v4();
        Span::current().record("attempt_id", tracing::field::display(attempt_id));

        let result = tokio::time::timeout(self.deadline, attempt(attempt_id))
            .await
            .unwrap_or(Err(SyncError::Timeout(self.deadline)));

        match result {
            Ok(report) => {
                *lock(&self.last_error) = None;
                *lock(&self.last_synced_at) = Some(report.completed_at);
                info!(
                    pushed = report.pushed.len(),
                    clamped = report.clamped.len(),
                    overwritten = report.overwritten.len(),
                    dropped = report.dropped.len(),
                    "Cart synced with remote"
                );
                SyncOutcome::Completed(report)
            }
            Err(e) => {
                warn!(error = %e, "Cart sync failed, keeping local cart");
                *lock(&self.last_error) = Some(e.clone());
                SyncOutcome::Failed(e)
            }
        }
    }

    /// Make the remote line touched by `change` match the local cart.
    ///
    /// An edit the remote refuses is returned instead of failing the attempt;
    /// the reconciliation that follows settles the local line.
    async fn apply_change(
        &self,
        change: &LocalChange,
    ) -> Result<Option<RejectedPush>, SyncError> {
        let step = SyncStep::Propagate;
        let key = match change {
            LocalChange::Clear => {
                self.gateway.clear().await.map_err(|e| fail(step, &e))?;
                return Ok(None);
            }
            LocalChange::Line(key) => key,
        };

        let remote = self.fetch(step).await?;
        let local = self.lock_cart().aggregate().get(key).cloned();

        let applied = match (&local, remote.find(key)) {
            (Some(item), Some(line)) if i64::from(item.quantity) != i64::from(line.quantity) => {
                debug!(
                    key = %key,
                    local = item.quantity,
                    remote = line.quantity,
                    "Updating remote line"
                );
                let request = UpdateLineRequest {
                    quantity: item.quantity,
                };
                match self.gateway.update_item(line.id, request).await {
                    // Removed since the fetch; the reconciliation pushes it.
                    Err(GatewayError::NotFound(message)) => {
                        debug!(key = %key, message = %message, "Remote line vanished");
                        Ok(())
                    }
                    other => other.map(|_| ()),
                }
            }
            (None, Some(line)) => {
                debug!(key = %key, "Removing remote line");
                self.gateway.remove_item(line.id).await
            }
            // Local-only lines are pushed by the reconciliation.
            (Some(_), _) | (None, None) => Ok(()),
        };

        match (applied, local) {
            (Err(e), Some(item)) if e.is_rejection() => {
                warn!(key = %key, error = %e, "Remote refused local edit");
                Ok(Some(RejectedPush {
                    key: key.clone(),
                    requested: item.quantity,
                    reason: e.to_string(),
                }))
            }
            (applied, _) => applied.map(|()| None).map_err(|e| fail(step, &e)),
        }
    }

    /// Steps 3 to 6: fetch, push local-only lines, re-fetch, replace.
    async fn reconcile(&self, attempt_id: Uuid) -> Result<SyncReport, SyncError> {
        let remote = self.fetch(SyncStep::FetchRemote).await?;

        // Read after the fetch so edits made while it was in flight are pushed.
        let local = self.lock_cart().snapshot();

        let mut pushed = Vec::new();
        let mut clamped = Vec::new();
        let mut rejected = Vec::new();
        for item in local.items() {
            let key = item.key();
            if remote.find(&key).is_some() {
                continue;
            }

            debug!(key = %key, quantity = item.quantity, "Pushing local-only line");
            let ack = match self.gateway.add_item(AddLineRequest::from(item)).await {
                Ok(ack) => ack,
                Err(e) if e.is_rejection() => {
                    warn!(key = %key, error = %e, "Remote refused local-only line");
                    rejected.push(RejectedPush {
                        key,
                        requested: item.quantity,
                        reason: e.to_string(),
                    });
                    continue;
                }
                Err(e) => return Err(fail(SyncStep::PushLocal, &e)),
            };
            pushed.push(key.clone());

            let acked = u32::try_from(ack.quantity).map_err(|_| SyncError::Malformed {
                step: SyncStep::PushLocal,
                message: format!(
                    "line {} acknowledged with quantity {}",
                    ack.id, ack.quantity
                ),
            })?;
            let accepted = clamp(acked, ack.stock);
            if accepted == acked {
                continue;
            }

            info!(
                key = %key,
                requested = item.quantity,
                accepted,
                "Remote stock is lower than pushed quantity"
            );
            let trimmed = if accepted == 0 {
                self.gateway.remove_item(ack.id).await
            } else {
                self.gateway
                    .update_item(ack.id, UpdateLineRequest { quantity: accepted })
                    .await
                    .map(|_| ())
            };
            trimmed.map_err(|e| fail(SyncStep::ClampPush, &e))?;

            clamped.push(ClampedPush {
                key,
                requested: item.quantity,
                accepted,
            });
        }

        let refreshed = self.fetch(SyncStep::Refetch).await?;
        let aggregate =
            aggregate_from_remote(refreshed).map_err(|e| fail(SyncStep::Refetch, &e))?;

        let mut cart = self.lock_cart();
        let (overwritten, dropped) = losses(cart.aggregate(), &aggregate);
        for loss in &overwritten {
            info!(
                key = %loss.key,
                local = loss.local,
                remote = loss.remote,
                "Remote quantity replaces local edit"
            );
        }
        for key in &dropped {
            info!(key = %key, "Line absent remotely, dropped from local cart");
        }
        cart.replace_with_remote(aggregate);
        drop(cart);

        Ok(SyncReport {
            attempt_id,
            pushed,
            clamped,
            rejected,
            overwritten,
            dropped,
            completed_at: Utc::now(),
        })
    }

    async fn fetch(&self, step: SyncStep) -> Result<RemoteCart, SyncError> {
        self.gateway.fetch_cart().await.map_err(|e| fail(step, &e))
    }

    fn lock_cart(&self) -> MutexGuard<'_, CartState> {
        lock(&self.cart)
    }
}

/// Local lines that adopting `remote` would change or remove.
fn losses(local: &CartAggregate, remote: &CartAggregate) -> (Vec<Overwrite>, Vec<LineKey>) {
    let mut overwritten = Vec::new();
    let mut dropped = Vec::new();
    for item in local.items() {
        let key = item.key();
        match remote.get(&key) {
            Some(line) if line.quantity != item.quantity => overwritten.push(Overwrite {
                key,
                local: item.quantity,
                remote: line.quantity,
            }),
            Some(_) => {}
            None => dropped.push(key),
        }
    }
    (overwritten, dropped)
}

fn fail(step: SyncStep, error: &GatewayError) -> SyncError {
    SyncError::from_gateway(step, error)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use d4k_cart_core::{LineId, Price, ProductId};
    use rust_decimal::Decimal;

    use super::*;
    use crate::cart::CatalogItem;
    use crate::gateway::RemoteLine;
    use crate::gateway::InMemoryCartGateway;
    use crate::persistence::MemorySnapshotStore;

    const DEADLINE: Duration = Duration::from_secs(5);

    fn tee(size: &str) -> CatalogItem {
        CatalogItem::new(ProductId::new(1), "Tee", Price::from_cents(1000)).with_size(size)
    }

    fn key(size: &str) -> LineKey {
        LineKey::new(ProductId::new(1), Some(size))
    }

    fn remote() -> InMemoryCartGateway {
        InMemoryCartGateway::new().with_product(
            ProductId::new(1),
            "Tee",
            Price::from_cents(1000),
        )
    }

    fn setup(
        gateway: InMemoryCartGateway,
        deadline: Duration,
    ) -> (Arc<SyncEngine>, Arc<Mutex<CartState>>, Arc<InMemoryCartGateway>) {
        let cart = Arc::new(Mutex::new(CartState::new(
            Arc::new(MemorySnapshotStore::new()),
            "cart",
        )));
        let gateway = Arc::new(gateway);
        let engine = Arc::new(SyncEngine::new(cart.clone(), gateway.clone(), deadline));
        (engine, cart, gateway)
    }

    fn snapshot(cart: &Arc<Mutex<CartState>>) -> CartAggregate {
        cart.lock().unwrap().snapshot()
    }

    #[tokio::test]
    async fn test_pushes_only_local_only_lines() {
        let (engine, cart, gateway) = setup(remote().with_line(key("M"), 1), DEADLINE);
        {
            let mut cart = cart.lock().unwrap();
            cart.add_item(tee("M"), 3);
            cart.add_item(tee("L"), 2);
        }

        let outcome = engine.sync_cart().await;
        let report = outcome.report().unwrap();
        assert_eq!(report.pushed, vec![key("L")]);
        assert_eq!(
            report.overwritten,
            vec![Overwrite {
                key: key("M"),
                local: 3,
                remote: 1
            }]
        );

        let pushes = gateway.pushes();
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].key(), key("L"));

        // Remote wins for lines it already had.
        let after = snapshot(&cart);
        assert_eq!(after.quantity_of(&key("M")), 1);
        assert_eq!(after.quantity_of(&key("L")), 2);
        assert!(!cart.lock().unwrap().is_pending());
        assert_eq!(engine.status(), SyncStatus::Idle);
        assert!(engine.last_synced_at().is_some());
    }

    #[tokio::test]
    async fn test_sync_is_idempotent_on_settled_cart() {
        let (engine, cart, gateway) = setup(remote().with_line(key("M"), 1), DEADLINE);
        cart.lock().unwrap().add_item(tee("L"), 2);

        assert!(engine.sync_cart().await.is_completed());
        let settled = snapshot(&cart);

        let outcome = engine.sync_cart().await;
        let report = outcome.report().unwrap();
        assert!(report.pushed.is_empty());
        assert!(report.is_lossless());
        assert_eq!(gateway.pushes().len(), 1);
        assert_eq!(snapshot(&cart), settled);
    }

    #[tokio::test]
    async fn test_failed_fetch_preserves_local_cart() {
        let (engine, cart, gateway) = setup(remote().with_line(key("M"), 4), DEADLINE);
        cart.lock().unwrap().add_item(tee("L"), 2);
        let before = snapshot(&cart);
        gateway.fail_fetch_call(1);

        let outcome = engine.sync_cart().await;
        assert!(matches!(
            outcome,
            SyncOutcome::Failed(SyncError::Gateway {
                step: SyncStep::FetchRemote,
                ..
            })
        ));
        assert_eq!(snapshot(&cart), before);
        assert!(gateway.pushes().is_empty());
        assert!(matches!(engine.status(), SyncStatus::IdleWithError(_)));

        // Full retry from the start; success clears the marker.
        assert!(engine.sync_cart().await.is_completed());
        assert_eq!(engine.status(), SyncStatus::Idle);
        assert_eq!(snapshot(&cart).quantity_of(&key("M")), 4);
    }

    #[tokio::test]
    async fn test_failed_refetch_preserves_local_cart() {
        let (engine, cart, gateway) = setup(remote(), DEADLINE);
        cart.lock().unwrap().add_item(tee("M"), 2);
        let before = snapshot(&cart);
        gateway.fail_fetch_call(2);

        let outcome = engine.sync_cart().await;
        assert!(matches!(
            outcome,
            SyncOutcome::Failed(SyncError::Gateway {
                step: SyncStep::Refetch,
                ..
            })
        ));
        assert_eq!(snapshot(&cart), before);
        assert!(cart.lock().unwrap().is_pending());
        assert_eq!(
            engine.last_error().and_then(|e| e.step()),
            Some(SyncStep::Refetch)
        );
    }

    #[tokio::test]
    async fn test_failed_push_preserves_local_cart() {
        let (engine, cart, gateway) = setup(remote(), DEADLINE);
        cart.lock().unwrap().add_item(tee("M"), 2);
        let before = snapshot(&cart);
        gateway.fail_adds(true);

        assert!(matches!(
            engine.sync_cart().await,
            SyncOutcome::Failed(SyncError::Gateway {
                step: SyncStep::PushLocal,
                ..
            })
        ));
        assert_eq!(snapshot(&cart), before);
    }

    #[tokio::test]
    async fn test_not_authenticated_is_a_noop() {
        let (engine, cart, gateway) = setup(remote(), DEADLINE);
        gateway.set_authenticated(false);
        cart.lock().unwrap().add_item(tee("M"), 2);

        assert_eq!(
            engine.sync_cart().await,
            SyncOutcome::Skipped(SkipReason::NotAuthenticated)
        );
        assert_eq!(gateway.fetch_count(), 0);
        assert_eq!(engine.status(), SyncStatus::Idle);
        assert_eq!(snapshot(&cart).quantity_of(&key("M")), 2);
    }

    #[tokio::test]
    async fn test_concurrent_sync_is_skipped() {
        let (engine, cart, gateway) = setup(remote(), DEADLINE);
        cart.lock().unwrap().add_item(tee("M"), 2);
        gateway.hold_fetches();

        let first = tokio::spawn({
            let engine = engine.clone();
            async move { engine.sync_cart().await }
        });
        gateway.wait_for_held_fetch().await;

        assert!(engine.status().is_syncing());
        assert_eq!(
            engine.sync_cart().await,
            SyncOutcome::Skipped(SkipReason::AlreadyRunning)
        );

        gateway.release_fetches();
        assert!(first.await.unwrap().is_completed());
        assert_eq!(gateway.pushes().len(), 1);
        assert_eq!(engine.status(), SyncStatus::Idle);
    }

    #[tokio::test]
    async fn test_stalled_gateway_times_out() {
        let (engine, cart, gateway) = setup(remote(), Duration::from_millis(50));
        cart.lock().unwrap().add_item(tee("M"), 2);
        let before = snapshot(&cart);
        gateway.hold_fetches();

        assert_eq!(
            engine.sync_cart().await,
            SyncOutcome::Failed(SyncError::Timeout(Duration::from_millis(50)))
        );
        assert!(!engine.status().is_syncing());
        assert_eq!(snapshot(&cart), before);

        // The guard was released: the next attempt runs.
        gateway.release_fetches();
        assert!(engine.sync_cart().await.is_completed());
    }

    #[tokio::test]
    async fn test_refused_push_does_not_block_other_lines() {
        let (engine, cart, gateway) = setup(remote().with_stock(key("M"), 2), DEADLINE);
        {
            let mut cart = cart.lock().unwrap();
            cart.add_item(tee("M"), 5);
            cart.add_item(tee("L"), 1);
        }

        let outcome = engine.sync_cart().await;
        let report = outcome.report().unwrap();
        assert_eq!(report.pushed, vec![key("L")]);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].key, key("M"));
        assert_eq!(report.rejected[0].requested, 5);
        assert!(report.rejected[0].reason.contains("Insufficient stock"));
        assert_eq!(report.dropped, vec![key("M")]);
        assert!(!report.is_lossless());

        assert_eq!(gateway.remote_cart().find(&key("L")).unwrap().quantity, 1);
        assert_eq!(snapshot(&cart).quantity_of(&key("L")), 1);
        assert_eq!(engine.status(), SyncStatus::Idle);

        // Settled: the next attempt has nothing left to push.
        let again = engine.sync_cart().await;
        assert!(again.report().unwrap().is_lossless());
    }

    #[tokio::test]
    async fn test_unknown_product_push_does_not_block_other_lines() {
        let (engine, cart, _gateway) = setup(remote(), DEADLINE);
        {
            let mut cart = cart.lock().unwrap();
            cart.add_item(
                CatalogItem::new(ProductId::new(404), "Retired", Price::from_cents(500)),
                1,
            );
            cart.add_item(tee("L"), 1);
        }

        let outcome = engine.sync_cart().await;
        let report = outcome.report().unwrap();
        assert_eq!(report.pushed, vec![key("L")]);
        assert_eq!(
            report.rejected[0].key,
            LineKey::without_size(ProductId::new(404))
        );
    }

    #[tokio::test]
    async fn test_push_ack_above_stock_is_trimmed() {
        let gateway = remote()
            .with_stock(key("M"), 2)
            .with_stock(key("L"), 0)
            .with_lenient_stock();
        let (engine, cart, gateway) = setup(gateway, DEADLINE);
        {
            let mut cart = cart.lock().unwrap();
            cart.add_item(tee("M"), 5);
            cart.add_item(tee("L"), 1);
        }

        let outcome = engine.sync_cart().await;
        let report = outcome.report().unwrap();
        assert_eq!(report.pushed, vec![key("M"), key("L")]);
        assert_eq!(
            report.clamped,
            vec![
                ClampedPush {
                    key: key("M"),
                    requested: 5,
                    accepted: 2
                },
                ClampedPush {
                    key: key("L"),
                    requested: 1,
                    accepted: 0
                },
            ]
        );
        assert_eq!(gateway.update_count(), 1);
        assert_eq!(gateway.remove_count(), 1);

        let after = snapshot(&cart);
        assert_eq!(after.quantity_of(&key("M")), 2);
        assert_eq!(after.quantity_of(&key("L")), 0);
        assert_eq!(after.get(&key("M")).unwrap().stock_ceiling, Some(2));
    }

    #[tokio::test]
    async fn test_propagate_makes_remote_match_local() {
        let (engine, cart, gateway) = setup(remote().with_line(key("M"), 1), DEADLINE);
        assert!(engine.sync_cart().await.is_completed());

        cart.lock().unwrap().update_quantity(&key("M"), 4);
        let outcome = engine.propagate(LocalChange::Line(key("M"))).await;
        assert!(outcome.report().unwrap().is_lossless());
        assert_eq!(gateway.update_count(), 1);
        assert_eq!(gateway.remote_cart().find(&key("M")).unwrap().quantity, 4);

        cart.lock().unwrap().add_item(tee("L"), 2);
        assert!(engine.propagate(LocalChange::Line(key("L"))).await.is_completed());
        assert_eq!(gateway.remote_cart().find(&key("L")).unwrap().quantity, 2);

        cart.lock().unwrap().remove_item(&key("M"));
        assert!(engine.propagate(LocalChange::Line(key("M"))).await.is_completed());
        assert!(gateway.remote_cart().find(&key("M")).is_none());

        cart.lock().unwrap().clear();
        assert!(engine.propagate(LocalChange::Clear).await.is_completed());
        assert_eq!(gateway.clear_count(), 1);
        assert!(snapshot(&cart).is_empty());
    }

    #[tokio::test]
    async fn test_propagate_refused_update_settles_to_remote() {
        let (engine, cart, gateway) = setup(remote().with_line(key("M"), 1), DEADLINE);
        assert!(engine.sync_cart().await.is_completed());

        gateway.set_stock(key("M"), 2);
        cart.lock().unwrap().update_quantity(&key("M"), 4);
        let outcome = engine.propagate(LocalChange::Line(key("M"))).await;

        let report = outcome.report().unwrap();
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].requested, 4);
        assert_eq!(
            report.overwritten,
            vec![Overwrite {
                key: key("M"),
                local: 4,
                remote: 1
            }]
        );
        let after = snapshot(&cart);
        assert_eq!(after.quantity_of(&key("M")), 1);
        assert_eq!(after.get(&key("M")).unwrap().stock_ceiling, Some(2));
        assert_eq!(engine.status(), SyncStatus::Idle);
    }

    /// Deletes the targeted line itself before forwarding the removal, as if
    /// another device removed it between the fetch and the request.
    struct VanishingLines(InMemoryCartGateway);

    #[async_trait::async_trait]
    impl RemoteCartGateway for VanishingLines {
        async fn is_authenticated(&self) -> bool {
            self.0.is_authenticated().await
        }

        async fn fetch_cart(&self) -> Result<RemoteCart, GatewayError> {
            self.0.fetch_cart().await
        }

        async fn add_item(&self, request: AddLineRequest) -> Result<RemoteLine, GatewayError> {
            self.0.add_item(request).await
        }

        async fn update_item(
            &self,
            line_id: LineId,
            request: UpdateLineRequest,
        ) -> Result<RemoteLine, GatewayError> {
            self.0.remove_item(line_id).await?;
            self.0.update_item(line_id, request).await
        }

        async fn remove_item(&self, line_id: LineId) -> Result<(), GatewayError> {
            self.0.remove_item(line_id).await?;
            self.0.remove_item(line_id).await
        }

        async fn clear(&self) -> Result<(), GatewayError> {
            self.0.clear().await
        }
    }

    #[tokio::test]
    async fn test_propagate_tolerates_line_removed_elsewhere() {
        let gateway = Arc::new(VanishingLines(
            remote().with_line(key("M"), 2).with_line(key("L"), 1),
        ));
        let cart = Arc::new(Mutex::new(CartState::new(
            Arc::new(MemorySnapshotStore::new()),
            "cart",
        )));
        let engine = SyncEngine::new(cart.clone(), gateway.clone(), DEADLINE);
        assert!(engine.sync_cart().await.is_completed());

        cart.lock().unwrap().remove_item(&key("M"));
        let outcome = engine.propagate(LocalChange::Line(key("M"))).await;
        assert!(outcome.report().unwrap().is_lossless());
        assert!(gateway.0.remote_cart().find(&key("M")).is_none());

        // An update racing a removal: the reconciliation pushes the line back.
        cart.lock().unwrap().update_quantity(&key("L"), 3);
        let outcome = engine.propagate(LocalChange::Line(key("L"))).await;
        let report = outcome.report().unwrap();
        assert_eq!(report.pushed, vec![key("L")]);
        assert_eq!(gateway.0.remote_cart().find(&key("L")).unwrap().quantity, 3);
        assert!(engine.last_error().is_none());
    }

    #[tokio::test]
    async fn test_overflowing_remote_price_is_malformed() {
        let gateway = InMemoryCartGateway::new()
            .with_product(ProductId::new(1), "Tee", Price::new(Decimal::MAX))
            .with_line(key("M"), 2);
        let (engine, cart, _gateway) = setup(gateway, DEADLINE);
        cart.lock().unwrap().add_item(tee("L"), 1);
        let before = snapshot(&cart);

        assert!(matches!(
            engine.sync_cart().await,
            SyncOutcome::Failed(SyncError::Malformed {
                step: SyncStep::Refetch,
                ..
            })
        ));
        assert_eq!(snapshot(&cart), before);
        assert!(matches!(engine.status(), SyncStatus::IdleWithError(_)));
    }

    #[tokio::test]
    async fn test_malformed_remote_is_a_failure() {
        let (engine, cart, _gateway) = setup(remote().with_line(key("M"), 0), DEADLINE);
        cart.lock().unwrap().add_item(tee("L"), 1);
        let before = snapshot(&cart);

        // The malformed line shares no key with the local line, so the push
        // goes through and the refetch fails to translate.
        assert!(matches!(
            engine.sync_cart().await,
            SyncOutcome::Failed(SyncError::Malformed {
                step: SyncStep::Refetch,
                ..
            })
        ));
        assert_eq!(snapshot(&cart), before);
    }

    #[test]
    fn test_losses() {
        let mut local = CartAggregate::new();
        local.add(tee("M"), 3);
        local.add(tee("L"), 1);
        local.add(tee("S"), 2);
        let mut remote = CartAggregate::new();
        remote.add(tee("M"), 1);
        remote.add(tee("S"), 2);

        let (overwritten, dropped) = losses(&local, &remote);
        assert_eq!(
            overwritten,
            vec![Overwrite {
                key: key("M"),
                local: 3,
                remote: 1
            }]
        );
        assert_eq!(dropped, vec![key("L")]);
    }

    #[test]
    fn test_in_flight_guard_releases_on_drop() {
        let flag = AtomicBool::new(false);
        let guard = InFlight::acquire(&flag).unwrap();
        assert!(InFlight::acquire(&flag).is_none());
        drop(guard);
        assert!(InFlight::acquire(&flag).is_some());
    }
}
