//! d4k Cart Core - Shared types library.
//!
//! This crate provides the value types used across the cart workspace:
//! - `cart` - Cart state, snapshot persistence, remote gateway and sync engine
//! - `cli` - Command-line driver for a local cart
//! - `integration-tests` - End-to-end tests against a mock remote cart API
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no HTTP
//! clients, no async runtime. This keeps it lightweight and lets the stock
//! rule be tested in total isolation.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for IDs, prices and line identity keys
//! - [`stock`] - Quantity clamping against a known stock ceiling

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod stock;
pub mod types;

pub use stock::clamp;
pub use types::*;
