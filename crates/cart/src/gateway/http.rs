//! HTTP implementation of the remote cart gateway.
//!
//! Endpoints (relative to the configured base URL):
//!
//! | Operation | Method | Path |
//! |---|---|---|
//! | Fetch cart | `GET` | `cart` |
//! | Add item | `POST` | `cart/add` |
//! | Update quantity | `PUT` | `cart/update/{id}` |
//! | Remove item | `DELETE` | `cart/remove/{id}` |
//! | Clear cart | `DELETE` | `cart/clear` |
//!
//! Every response is wrapped in `{ success, message, data }`. Mutating
//! endpoints answer with the whole cart; the gateway picks out the line the
//! request touched.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tracing::{debug, error, instrument};
use url::Url;
use uuid::Uuid;

use d4k_cart_core::LineId;

use super::types::{AddLineRequest, ApiEnvelope, RemoteCart, RemoteLine, UpdateLineRequest};
use super::{GatewayError, RemoteCartGateway};
use crate::config::RemoteCartConfig;

/// Header carrying a per-request correlation ID.
const REQUEST_ID_HEADER: &str = "x-request-id";

/// Maximum number of response body characters kept in errors and logs.
const BODY_PREVIEW_CHARS: usize = 500;

/// Client for the remote cart REST API.
///
/// Cheaply cloneable. The bearer token can be swapped at runtime as the
/// session logs in and out; without a token the gateway reports itself as
/// unauthenticated and refuses to send requests.
#[derive(Clone)]
pub struct HttpCartGateway {
    inner: Arc<HttpCartGatewayInner>,
}

struct HttpCartGatewayInner {
    client: reqwest::Client,
    base_url: Url,
    token: RwLock<Option<SecretString>>,
}

impl std::fmt::Debug for HttpCartGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCartGateway")
            .field("base_url", &self.inner.base_url.as_str())
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl HttpCartGateway {
    /// Create a gateway from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL cannot be a base or the HTTP client
    /// cannot be built.
    pub fn new(config: &RemoteCartConfig) -> Result<Self, GatewayError> {
        let mut base_url = config.base_url.clone();
        if base_url.cannot_be_a_base() {
            return Err(GatewayError::Config(format!(
                "base URL cannot be a base: {base_url}"
            )));
        }
        // Url::join replaces the last segment unless the path ends in '/'.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            inner: Arc::new(HttpCartGatewayInner {
                client,
                base_url,
                token: RwLock::new(config.token.clone()),
            }),
        })
    }

    /// Base URL all endpoints are resolved against.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    /// Install a bearer token (the session has logged in).
    pub async fn set_token(&self, token: SecretString) {
        *self.inner.token.write().await = Some(token);
    }

    /// Drop the bearer token (the session has logged out).
    pub async fn clear_token(&self) {
        *self.inner.token.write().await = None;
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, GatewayError> {
        let url = self
            .inner
            .base_url
            .join(path)
            .map_err(|e| GatewayError::Config(format!("invalid endpoint {path}: {e}")))?;
        Ok(self.inner.client.request(method, url))
    }

    /// Send a request and unwrap the response envelope.
    async fn execute<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
    ) -> Result<Option<T>, GatewayError> {
        let token = self
            .inner
            .token
            .read()
            .await
            .as_ref()
            .map(|t| t.expose_secret().to_string())
            .ok_or(GatewayError::Unauthorized)?;

        let request_id = Uuid::new_v4().to_string();
        debug!(request_id = %request_id, "Sending remote cart request");

        let response = builder
            .bearer_auth(token)
            .header(REQUEST_ID_HEADER, &request_id)
            .send()
            .await?;

        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(1);
            return Err(GatewayError::RateLimited(retry_after));
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(GatewayError::Unauthorized);
        }

        // Read the body as text first for better error diagnostics
        let response_text = response.text().await?;
        let preview: String = response_text.chars().take(BODY_PREVIEW_CHARS).collect();

        if !status.is_success() {
            // Business errors (e.g. insufficient stock) come back as 4xx with
            // an envelope message.
            if status.is_client_error()
                && let Ok(envelope) =
                    serde_json::from_str::<ApiEnvelope<serde_json::Value>>(&response_text)
                && let Some(message) = envelope.message
            {
                if status == StatusCode::NOT_FOUND {
                    return Err(GatewayError::NotFound(message));
                }
                return Err(GatewayError::Rejected(message));
            }
            error!(
                request_id = %request_id,
                status = %status,
                body = %preview,
                "Remote cart API returned non-success status"
            );
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body: preview,
            });
        }

        let envelope: ApiEnvelope<T> = match serde_json::from_str(&response_text) {
            Ok(e) => e,
            Err(e) => {
                error!(
                    request_id = %request_id,
                    error = %e,
                    body = %preview,
                    "Failed to parse remote cart response"
                );
                return Err(GatewayError::Parse(e));
            }
        };

        if !envelope.success {
            return Err(GatewayError::Rejected(
                envelope
                    .message
                    .unwrap_or_else(|| "request rejected without message".to_string()),
            ));
        }

        Ok(envelope.data)
    }

    async fn execute_cart(&self, builder: RequestBuilder) -> Result<RemoteCart, GatewayError> {
        self.execute::<RemoteCart>(builder)
            .await?
            .ok_or_else(|| GatewayError::Malformed("response has no cart data".to_string()))
    }
}

#[async_trait]
impl RemoteCartGateway for HttpCartGateway {
    async fn is_authenticated(&self) -> bool {
        self.inner.token.read().await.is_some()
    }

    #[instrument(skip(self))]
    async fn fetch_cart(&self) -> Result<RemoteCart, GatewayError> {
        let cart = self.execute_cart(self.request(Method::GET, "cart")?).await?;
        debug!(lines = cart.items.len(), "Fetched remote cart");
        Ok(cart)
    }

    #[instrument(
        skip(self, request),
        fields(product_id = %request.product_id, quantity = request.quantity)
    )]
    async fn add_item(&self, request: AddLineRequest) -> Result<RemoteLine, GatewayError> {
        let key = request.key();
        let builder = self.request(Method::POST, "cart/add")?.json(&request);
        let cart = self.execute_cart(builder).await?;

        cart.find(&key).cloned().ok_or_else(|| {
            GatewayError::Malformed(format!("added line {key} missing from response"))
        })
    }

    #[instrument(skip(self, request), fields(line_id = %line_id, quantity = request.quantity))]
    async fn update_item(
        &self,
        line_id: LineId,
        request: UpdateLineRequest,
    ) -> Result<RemoteLine, GatewayError> {
        let builder = self
            .request(Method::PUT, &format!("cart/update/{line_id}"))?
            .json(&request);
        let cart = self.execute_cart(builder).await?;

        cart.find_by_id(line_id).cloned().ok_or_else(|| {
            GatewayError::Malformed(format!("updated line {line_id} missing from response"))
        })
    }

    #[instrument(skip(self), fields(line_id = %line_id))]
    async fn remove_item(&self, line_id: LineId) -> Result<(), GatewayError> {
        let builder = self.request(Method::DELETE, &format!("cart/remove/{line_id}"))?;
        match self.execute::<serde_json::Value>(builder).await {
            Ok(_) => Ok(()),
            Err(GatewayError::NotFound(message)) => {
                debug!(message = %message, "Remote line already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self))]
    async fn clear(&self) -> Result<(), GatewayError> {
        let builder = self.request(Method::DELETE, "cart/clear")?;
        self.execute::<serde_json::Value>(builder).await?;
        Ok(())
    }
}
