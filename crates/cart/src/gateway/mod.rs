//! Remote cart API gateway.
//!
//! # Architecture
//!
//! - [`RemoteCartGateway`] is the seam between the engine and the
//!   authoritative server-side cart. The engine only ever talks to the trait.
//! - [`HttpCartGateway`] implements it over the storefront REST API using
//!   `reqwest`, unwrapping the `{ success, message, data }` envelope.
//! - `InMemoryCartGateway` (feature `testing`) is a scriptable fake used by
//!   the engine's own tests and by downstream integration tests.
//!
//! The remote cart is only reachable for an authenticated session; callers
//! check [`RemoteCartGateway::is_authenticated`] before reconciling.

mod conversions;
mod http;
#[cfg(any(test, feature = "testing"))]
mod memory;
pub mod types;

pub use conversions::{aggregate_from_remote, line_item_from_remote};
pub use http::HttpCartGateway;
#[cfg(any(test, feature = "testing"))]
pub use memory::InMemoryCartGateway;
pub use types::{AddLineRequest, RemoteCart, RemoteLine, UpdateLineRequest};

use async_trait::async_trait;
use thiserror::Error;

use d4k_cart_core::LineId;

/// Errors that can occur when talking to the remote cart API.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// HTTP request failed (connection, TLS, timeout).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Remote returned a non-success status code.
    #[error("HTTP {status}: {body}")]
    Status {
        /// Status code.
        status: u16,
        /// Truncated response body.
        body: String,
    },

    /// Session is not authenticated (no token, or the remote returned 401).
    #[error("Not authenticated")]
    Unauthorized,

    /// Rate limited by the remote.
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Remote processed the request and refused it (`success: false`).
    #[error("Rejected by remote: {0}")]
    Rejected(String),

    /// The product or line the request names does not exist remotely.
    #[error("Not found by remote: {0}")]
    NotFound(String),

    /// Response is missing expected fields or contradicts the request.
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// Gateway configuration is unusable.
    #[error("Invalid gateway configuration: {0}")]
    Config(String),
}

impl GatewayError {
    /// Whether the error means the response could not be understood, as
    /// opposed to the remote being unreachable or refusing the request.
    #[must_use]
    pub const fn is_malformed(&self) -> bool {
        matches!(self, Self::Parse(_) | Self::Malformed(_))
    }

    /// Whether the remote understood the request and refused this one item.
    ///
    /// Other requests in the same reconciliation can still succeed.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected(_) | Self::NotFound(_))
    }
}

/// The authoritative server-side cart.
///
/// Every request is discrete: its result is applied in full or not at all.
#[async_trait]
pub trait RemoteCartGateway: Send + Sync {
    /// Whether the session currently has credentials for the remote cart.
    async fn is_authenticated(&self) -> bool;

    /// Fetch the remote cart's current lines.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response is malformed.
    async fn fetch_cart(&self) -> Result<RemoteCart, GatewayError>;

    /// Add a line (or add to the matching remote line).
    ///
    /// Returns the new or updated remote line, including the remote's
    /// declared stock when it knows it.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or is rejected.
    async fn add_item(&self, request: AddLineRequest) -> Result<RemoteLine, GatewayError>;

    /// Set the quantity of a remote line.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or is rejected.
    async fn update_item(
        &self,
        line_id: LineId,
        request: UpdateLineRequest,
    ) -> Result<RemoteLine, GatewayError>;

    /// Delete a remote line. A line that is already gone is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or is rejected.
    async fn remove_item(&self, line_id: LineId) -> Result<(), GatewayError>;

    /// Delete every remote line.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or is rejected.
    async fn clear(&self) -> Result<(), GatewayError>;
}
