//! Command implementations.

pub mod cart;
pub mod sync;

use thiserror::Error;

use d4k_cart::{ConfigError, ServiceError};

/// Errors that can occur while running a command.
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Cart service could not be built.
    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    /// Price argument is not a decimal amount.
    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    /// Output could not be rendered as JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
