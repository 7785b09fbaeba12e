//! Integration tests for the d4k cart engine.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p d4k-cart-integration-tests
//! ```
//!
//! No external services are needed: [`MockRemote`] serves the remote cart
//! API from an in-process `axum` server on an ephemeral port, with the same
//! envelope, bearer auth, add-sums-quantities and stock checks as the
//! storefront backend.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use secrecy::SecretString;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use url::Url;

use d4k_cart::RemoteCartConfig;
use d4k_cart::gateway::{AddLineRequest, RemoteCart, RemoteLine, UpdateLineRequest};
use d4k_cart_core::{LineId, LineKey, Price, ProductId};

#[derive(Debug, Clone)]
struct Product {
    name: String,
    price: Price,
}

#[derive(Debug, Default)]
struct MockState {
    token: String,
    lines: Vec<RemoteLine>,
    next_id: i64,
    products: HashMap<ProductId, Product>,
    stock: HashMap<LineKey, i32>,
    add_count: usize,
    request_ids: Vec<String>,
    fail_fetches: bool,
    omit_data: bool,
}

type Shared = Arc<Mutex<MockState>>;

/// In-process mock of the remote cart API.
///
/// The server task is aborted when the mock is dropped.
pub struct MockRemote {
    addr: SocketAddr,
    state: Shared,
    task: JoinHandle<()>,
}

impl Drop for MockRemote {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl MockRemote {
    /// Start a mock accepting `token` as its only valid bearer token.
    ///
    /// # Panics
    ///
    /// Panics if no local port can be bound.
    pub async fn start(token: &str) -> Self {
        let state: Shared = Arc::new(Mutex::new(MockState {
            token: token.to_string(),
            next_id: 1,
            ..MockState::default()
        }));

        let app = Router::new()
            .route("/api/v1/cart", get(get_cart))
            .route("/api/v1/cart/add", post(add_to_cart))
            .route("/api/v1/cart/update/{id}", put(update_item))
            .route("/api/v1/cart/remove/{id}", delete(remove_item))
            .route("/api/v1/cart/clear", delete(clear_cart))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock remote");
        let addr = listener.local_addr().expect("Mock remote has no address");
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { addr, state, task }
    }

    /// Base URL of the mock API (`http://127.0.0.1:<port>/api/v1`).
    ///
    /// # Panics
    ///
    /// Never in practice: the address always forms a valid URL.
    #[must_use]
    pub fn base_url(&self) -> Url {
        Url::parse(&format!("http://{}/api/v1", self.addr)).expect("valid mock URL")
    }

    /// Gateway configuration pointing at this mock.
    #[must_use]
    pub fn config(&self, token: Option<&str>) -> RemoteCartConfig {
        RemoteCartConfig {
            base_url: self.base_url(),
            token: token.map(|t| SecretString::from(t.to_string())),
            request_timeout: Duration::from_secs(5),
        }
    }

    /// Register a product the API can add lines for.
    pub fn add_product(&self, product_id: ProductId, name: &str, price: Price) {
        self.lock().products.insert(
            product_id,
            Product {
                name: name.to_string(),
                price,
            },
        );
    }

    /// Declare stock for a product/size. Reported on every line with that key;
    /// adds and updates above it are refused.
    pub fn set_stock(&self, key: LineKey, stock: i32) {
        self.lock().stock.insert(key, stock);
    }

    /// Seed an existing remote line for a registered product.
    pub fn seed_line(&self, key: LineKey, quantity: i32) {
        let mut state = self.lock();
        insert_line(&mut state, key, quantity, None);
    }

    /// Make `GET /cart` answer 503.
    pub fn fail_fetches(&self, fail: bool) {
        self.lock().fail_fetches = fail;
    }

    /// Answer successful requests with an envelope that has no `data`.
    pub fn omit_data(&self, omit: bool) {
        self.lock().omit_data = omit;
    }

    /// Number of add requests served.
    #[must_use]
    pub fn add_count(&self) -> usize {
        self.lock().add_count
    }

    /// `x-request-id` header of every authorized request, in order.
    #[must_use]
    pub fn request_ids(&self) -> Vec<String> {
        self.lock().request_ids.clone()
    }

    /// Current remote lines.
    #[must_use]
    pub fn cart(&self) -> RemoteCart {
        RemoteCart {
            items: self.lock().lines.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        lock(&self.state)
    }
}

fn lock(state: &Shared) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn insert_line(
    state: &mut MockState,
    key: LineKey,
    quantity: i32,
    color: Option<String>,
) -> RemoteLine {
    let product = state.products.get(&key.product_id).cloned().unwrap_or(Product {
        name: format!("Product {}", key.product_id),
        price: Price::ZERO,
    });
    let line = RemoteLine {
        id: LineId::new(state.next_id),
        product_id: key.product_id,
        product_name: product.name,
        product_price: product.price,
        product_image_url: None,
        quantity,
        stock: state.stock.get(&key).copied(),
        size: key.size,
        color,
    };
    state.next_id += 1;
    state.lines.push(line.clone());
    line
}

// =============================================================================
// Handlers
// =============================================================================

fn envelope<T: Serialize>(status: StatusCode, message: &str, data: Option<T>) -> Response {
    (
        status,
        Json(json!({ "success": status.is_success(), "message": message, "data": data })),
    )
        .into_response()
}

/// Refuse a line quantity above the declared stock, as the backend does.
fn check_stock(state: &MockState, key: &LineKey, quantity: i32) -> Result<(), Response> {
    match state.stock.get(key) {
        Some(&available) if quantity > available => Err(envelope::<Value>(
            StatusCode::BAD_REQUEST,
            &format!("Insufficient stock. Only {available} items available"),
            None,
        )),
        _ => Ok(()),
    }
}

fn cart_response(state: &MockState, status: StatusCode, message: &str) -> Response {
    let items: Vec<RemoteLine> = state
        .lines
        .iter()
        .map(|line| RemoteLine {
            stock: state.stock.get(&line.key()).copied(),
            ..line.clone()
        })
        .collect();
    let total_items: i64 = items.iter().map(|l| i64::from(l.quantity)).sum();
    let total_amount = items
        .iter()
        .map(|l| l.product_price.checked_times(l.quantity.unsigned_abs()))
        .collect::<Option<Vec<Price>>>()
        .and_then(Price::checked_sum);
    let data = (!state.omit_data).then(|| {
        json!({
            "id": 1,
            "userId": 1,
            "items": items,
            "totalItems": total_items,
            "totalAmount": total_amount,
        })
    });
    envelope(status, message, data)
}

/// Check the bearer token and record the request ID.
fn authorize(state: &mut MockState, headers: &HeaderMap) -> Result<(), Response> {
    let expected = format!("Bearer {}", state.token);
    let authorized = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == expected);
    if !authorized {
        return Err(envelope::<Value>(StatusCode::UNAUTHORIZED, "Unauthorized", None));
    }
    if let Some(id) = headers.get("x-request-id").and_then(|v| v.to_str().ok()) {
        state.request_ids.push(id.to_string());
    }
    Ok(())
}

async fn get_cart(State(state): State<Shared>, headers: HeaderMap) -> Response {
    let mut state = lock(&state);
    if let Err(response) = authorize(&mut state, &headers) {
        return response;
    }
    if state.fail_fetches {
        return (StatusCode::SERVICE_UNAVAILABLE, "cart service down").into_response();
    }
    cart_response(&state, StatusCode::OK, "Cart retrieved successfully")
}

async fn add_to_cart(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(request): Json<AddLineRequest>,
) -> Response {
    let mut state = lock(&state);
    if let Err(response) = authorize(&mut state, &headers) {
        return response;
    }
    state.add_count += 1;

    if !state.products.contains_key(&request.product_id) {
        return envelope::<Value>(StatusCode::NOT_FOUND, "Product not found", None);
    }
    let Ok(quantity) = i32::try_from(request.quantity) else {
        return envelope::<Value>(StatusCode::BAD_REQUEST, "Invalid quantity", None);
    };

    let key = request.key();
    let existing = state
        .lines
        .iter()
        .find(|l| l.key() == key)
        .map_or(0, |l| l.quantity);
    if let Err(response) = check_stock(&state, &key, existing.saturating_add(quantity)) {
        return response;
    }
    if let Some(line) = state.lines.iter_mut().find(|l| l.key() == key) {
        line.quantity = line.quantity.saturating_add(quantity);
    } else {
        insert_line(&mut state, key, quantity, request.color);
    }
    cart_response(&state, StatusCode::CREATED, "Product added to cart successfully")
}

async fn update_item(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(request): Json<UpdateLineRequest>,
) -> Response {
    let mut state = lock(&state);
    if let Err(response) = authorize(&mut state, &headers) {
        return response;
    }
    let Ok(quantity) = i32::try_from(request.quantity) else {
        return envelope::<Value>(StatusCode::BAD_REQUEST, "Invalid quantity", None);
    };
    let Some(key) = state
        .lines
        .iter()
        .find(|l| l.id == LineId::new(id))
        .map(RemoteLine::key)
    else {
        return envelope::<Value>(StatusCode::NOT_FOUND, "Cart item not found", None);
    };
    if let Err(response) = check_stock(&state, &key, quantity) {
        return response;
    }
    if let Some(line) = state.lines.iter_mut().find(|l| l.id == LineId::new(id)) {
        line.quantity = quantity;
    }
    cart_response(&state, StatusCode::OK, "Cart item updated successfully")
}

async fn remove_item(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Response {
    let mut state = lock(&state);
    if let Err(response) = authorize(&mut state, &headers) {
        return response;
    }
    let before = state.lines.len();
    state.lines.retain(|l| l.id != LineId::new(id));
    if state.lines.len() == before {
        return envelope::<Value>(StatusCode::NOT_FOUND, "Cart item not found", None);
    }
    cart_response(&state, StatusCode::OK, "Cart item removed successfully")
}

async fn clear_cart(State(state): State<Shared>, headers: HeaderMap) -> Response {
    let mut state = lock(&state);
    if let Err(response) = authorize(&mut state, &headers) {
        return response;
    }
    state.lines.clear();
    envelope::<Value>(StatusCode::OK, "Cart cleared successfully", None)
}
