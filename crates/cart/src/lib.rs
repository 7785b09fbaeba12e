//! d4k Cart engine library.
//!
//! Client-side shopping cart that works for guests and reconciles with the
//! authoritative server-side cart once the shopper is authenticated.
//!
//! # Modules
//!
//! - [`cart`] - Cart aggregate, line items and the persisted local state
//! - [`persistence`] - Snapshot stores and serialization
//! - [`gateway`] - Remote cart API client
//! - [`sync`] - Reconciliation engine
//! - [`service`] - Session-level handle tying the above together
//! - [`config`] - Environment configuration

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod cart;
pub mod config;
pub mod gateway;
pub mod persistence;
pub mod service;
pub mod sync;

pub use cart::{CartAggregate, CartState, CatalogItem, Divergence, LineItem, TotalOverflow};
pub use config::{CartConfig, ConfigError, RemoteCartConfig};
pub use gateway::{GatewayError, HttpCartGateway, RemoteCartGateway};
pub use service::{CartService, CartUpdate, ServiceError};
pub use sync::{SyncEngine, SyncError, SyncOutcome, SyncReport, SyncStatus};
