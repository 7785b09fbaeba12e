//! Durable snapshot storage for the local cart.
//!
//! # Architecture
//!
//! - [`SnapshotStore`] is a plain key/value boundary: one named slot holds
//!   one serialized cart. The state module calls `save`/`load` explicitly.
//! - [`snapshot`] owns the serialization glue (JSON via `serde_json`).
//! - Stores are swappable: [`FileSnapshotStore`] for a directory on disk,
//!   [`MemorySnapshotStore`] for ephemeral sessions and tests.
//!
//! There is no schema versioning. A snapshot that no longer decodes is
//! discarded with a warning and the cart starts empty.

mod file;
mod memory;
pub mod snapshot;

pub use file::FileSnapshotStore;
pub use memory::MemorySnapshotStore;

use thiserror::Error;

/// Slot name used when none is configured.
pub const DEFAULT_SLOT: &str = "d4k-cart-storage";

/// Errors that can occur when reading or writing a snapshot.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Filesystem operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot could not be encoded or decoded.
    #[error("Snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Slot name cannot be used as a storage key.
    #[error("Invalid snapshot slot: {0}")]
    InvalidSlot(String),
}

/// Key/value store holding serialized cart snapshots.
///
/// Implementations must make `save` all-or-nothing: a reader never observes
/// a half-written snapshot.
pub trait SnapshotStore: Send + Sync {
    /// Read the raw snapshot stored in `slot`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage cannot be read.
    fn load(&self, slot: &str) -> Result<Option<String>, PersistenceError>;

    /// Replace the snapshot stored in `slot`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage cannot be written.
    fn save(&self, slot: &str, contents: &str) -> Result<(), PersistenceError>;

    /// Delete the snapshot stored in `slot`. Missing slots are not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage cannot be written.
    fn remove(&self, slot: &str) -> Result<(), PersistenceError>;
}

/// Reject slot names that could escape a storage namespace.
pub(crate) fn validate_slot(slot: &str) -> Result<(), PersistenceError> {
    let valid = !slot.is_empty()
        && slot
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !slot.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(PersistenceError::InvalidSlot(slot.to_string()))
    }
}
