//! In-memory remote cart for tests and offline demos.
//!
//! Behaves like the storefront API: adding a product/size that already has
//! a line adds to it, unknown products are not found and a quantity above
//! the declared stock is refused. On top of that it counts calls, can fail
//! chosen requests and can hold fetches open so a test can observe an
//! in-flight sync.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::{Notify, Semaphore};

use d4k_cart_core::{LineId, LineKey, Price, ProductId};

use super::types::{AddLineRequest, RemoteCart, RemoteLine, UpdateLineRequest};
use super::{GatewayError, RemoteCartGateway};

#[derive(Debug, Clone)]
struct Product {
    name: String,
    price: Price,
}

#[derive(Debug, Default)]
struct MemoryCart {
    lines: Vec<RemoteLine>,
    next_id: i64,
    products: HashMap<ProductId, Product>,
    stock: HashMap<LineKey, i32>,
    lenient_stock: bool,
}

impl MemoryCart {
    fn check_stock(&self, key: &LineKey, quantity: i32) -> Result<Option<i32>, GatewayError> {
        let stock = self.stock.get(key).copied();
        match stock {
            Some(available) if quantity > available && !self.lenient_stock => Err(
                GatewayError::Rejected(format!(
                    "Insufficient stock. Only {available} items available"
                )),
            ),
            _ => Ok(stock),
        }
    }
}

/// Scriptable in-memory [`RemoteCartGateway`].
#[derive(Debug)]
pub struct InMemoryCartGateway {
    cart: Mutex<MemoryCart>,
    authenticated: AtomicBool,
    fetches: AtomicUsize,
    pushes: Mutex<Vec<AddLineRequest>>,
    updates: AtomicUsize,
    removals: AtomicUsize,
    clears: AtomicUsize,
    fail_all_fetches: AtomicBool,
    failing_fetch_calls: Mutex<HashSet<usize>>,
    fail_adds: AtomicBool,
    fetch_gate: Mutex<Option<Arc<Semaphore>>>,
    fetch_entered: Notify,
}

impl Default for InMemoryCartGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCartGateway {
    /// Create an empty, authenticated remote cart.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cart: Mutex::new(MemoryCart {
                next_id: 1,
                ..MemoryCart::default()
            }),
            authenticated: AtomicBool::new(true),
            fetches: AtomicUsize::new(0),
            pushes: Mutex::new(Vec::new()),
            updates: AtomicUsize::new(0),
            removals: AtomicUsize::new(0),
            clears: AtomicUsize::new(0),
            fail_all_fetches: AtomicBool::new(false),
            failing_fetch_calls: Mutex::new(HashSet::new()),
            fail_adds: AtomicBool::new(false),
            fetch_gate: Mutex::new(None),
            fetch_entered: Notify::new(),
        }
    }

    /// Register a product the remote can add lines for.
    #[must_use]
    pub fn with_product(self, product_id: ProductId, name: &str, price: Price) -> Self {
        self.lock_cart().products.insert(
            product_id,
            Product {
                name: name.to_string(),
                price,
            },
        );
        self
    }

    /// Declare remote stock for a product/size.
    #[must_use]
    pub fn with_stock(self, key: LineKey, stock: i32) -> Self {
        self.set_stock(key, stock);
        self
    }

    /// Change the declared stock, e.g. after other shoppers bought some.
    ///
    /// Fetched lines always report the current stock.
    pub fn set_stock(&self, key: LineKey, stock: i32) {
        self.lock_cart().stock.insert(key, stock);
    }

    /// Accept quantities above the declared stock and only report the stock
    /// in the acknowledgment, as a backend without stock checks would.
    #[must_use]
    pub fn with_lenient_stock(self) -> Self {
        self.lock_cart().lenient_stock = true;
        self
    }

    /// Seed an existing remote line without counting it as a push.
    ///
    /// Products not registered with [`Self::with_product`] get a placeholder
    /// name and a zero price.
    #[must_use]
    pub fn with_line(self, key: LineKey, quantity: i32) -> Self {
        {
            let mut cart = self.lock_cart();
            let product = cart.products.get(&key.product_id).cloned().unwrap_or(Product {
                name: format!("Product {}", key.product_id),
                price: Price::ZERO,
            });
            let stock = cart.stock.get(&key).copied();
            let id = LineId::new(cart.next_id);
            cart.next_id += 1;
            cart.lines.push(RemoteLine {
                id,
                product_id: key.product_id,
                product_name: product.name,
                product_price: product.price,
                product_image_url: None,
                quantity,
                size: key.size,
                color: None,
                stock,
            });
        }
        self
    }

    /// Toggle whether the session is authenticated.
    pub fn set_authenticated(&self, authenticated: bool) {
        self.authenticated.store(authenticated, Ordering::SeqCst);
    }

    /// Make every fetch fail until turned off.
    pub fn fail_fetches(&self, fail: bool) {
        self.fail_all_fetches.store(fail, Ordering::SeqCst);
    }

    /// Make the `n`-th fetch (1-based, counted from creation) fail.
    pub fn fail_fetch_call(&self, n: usize) {
        self.failing_fetch_calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(n);
    }

    /// Make every add fail until turned off.
    pub fn fail_adds(&self, fail: bool) {
        self.fail_adds.store(fail, Ordering::SeqCst);
    }

    /// Block fetches until [`Self::release_fetches`] is called.
    pub fn hold_fetches(&self) {
        *self
            .fetch_gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(Semaphore::new(0)));
    }

    /// Wait until a fetch is blocked by [`Self::hold_fetches`].
    pub async fn wait_for_held_fetch(&self) {
        self.fetch_entered.notified().await;
    }

    /// Unblock held fetches and stop holding new ones.
    pub fn release_fetches(&self) {
        if let Some(gate) = self
            .fetch_gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    /// Number of fetches served (including failed ones).
    #[must_use]
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Every add request received, in order.
    #[must_use]
    pub fn pushes(&self) -> Vec<AddLineRequest> {
        self.pushes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of update requests received.
    #[must_use]
    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    /// Number of remove requests received.
    #[must_use]
    pub fn remove_count(&self) -> usize {
        self.removals.load(Ordering::SeqCst)
    }

    /// Number of clear requests received.
    #[must_use]
    pub fn clear_count(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }

    /// Current remote cart.
    #[must_use]
    pub fn remote_cart(&self) -> RemoteCart {
        let cart = self.lock_cart();
        let items = cart
            .lines
            .iter()
            .map(|line| RemoteLine {
                stock: cart.stock.get(&line.key()).copied(),
                ..line.clone()
            })
            .collect();
        RemoteCart { items }
    }

    fn lock_cart(&self) -> MutexGuard<'_, MemoryCart> {
        self.cart.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RemoteCartGateway for InMemoryCartGateway {
    async fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    async fn fetch_cart(&self) -> Result<RemoteCart, GatewayError> {
        let call = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;

        let gate = self
            .fetch_gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(gate) = gate {
            self.fetch_entered.notify_one();
            let _permit = gate.acquire().await;
        }

        let scheduled_failure = self
            .failing_fetch_calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&call);
        if scheduled_failure || self.fail_all_fetches.load(Ordering::SeqCst) {
            return Err(GatewayError::Status {
                status: 503,
                body: format!("fetch #{call} unavailable"),
            });
        }

        Ok(self.remote_cart())
    }

    async fn add_item(&self, request: AddLineRequest) -> Result<RemoteLine, GatewayError> {
        self.pushes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        if self.fail_adds.load(Ordering::SeqCst) {
            return Err(GatewayError::Status {
                status: 503,
                body: "add unavailable".to_string(),
            });
        }

        let quantity = i32::try_from(request.quantity)
            .map_err(|_| GatewayError::Rejected("quantity out of range".to_string()))?;
        let key = request.key();

        let mut cart = self.lock_cart();
        let product = cart
            .products
            .get(&request.product_id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound("Product not found".to_string()))?;
        let existing = cart
            .lines
            .iter()
            .find(|l| l.key() == key)
            .map_or(0, |l| l.quantity);
        let stock = cart.check_stock(&key, existing.saturating_add(quantity))?;

        if let Some(line) = cart.lines.iter_mut().find(|l| l.key() == key) {
            line.quantity = line.quantity.saturating_add(quantity);
            line.stock = stock;
            return Ok(line.clone());
        }

        let id = LineId::new(cart.next_id);
        cart.next_id += 1;
        let line = RemoteLine {
            id,
            product_id: request.product_id,
            product_name: product.name,
            product_price: product.price,
            product_image_url: None,
            quantity,
            size: request.size,
            color: request.color,
            stock,
        };
        cart.lines.push(line.clone());
        Ok(line)
    }

    async fn update_item(
        &self,
        line_id: LineId,
        request: UpdateLineRequest,
    ) -> Result<RemoteLine, GatewayError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        let quantity = i32::try_from(request.quantity)
            .map_err(|_| GatewayError::Rejected("quantity out of range".to_string()))?;

        let mut cart = self.lock_cart();
        let key = cart
            .lines
            .iter()
            .find(|l| l.id == line_id)
            .map(RemoteLine::key)
            .ok_or_else(|| GatewayError::NotFound(format!("Cart item {line_id} not found")))?;
        let stock = cart.check_stock(&key, quantity)?;
        let line = cart
            .lines
            .iter_mut()
            .find(|l| l.id == line_id)
            .ok_or_else(|| GatewayError::NotFound(format!("Cart item {line_id} not found")))?;
        line.quantity = quantity;
        line.stock = stock;
        Ok(line.clone())
    }

    async fn remove_item(&self, line_id: LineId) -> Result<(), GatewayError> {
        self.removals.fetch_add(1, Ordering::SeqCst);
        self.lock_cart().lines.retain(|l| l.id != line_id);
        Ok(())
    }

    async fn clear(&self) -> Result<(), GatewayError> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        self.lock_cart().lines.clear();
        Ok(())
    }
}
