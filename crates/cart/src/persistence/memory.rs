//! In-memory snapshot store.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use super::{PersistenceError, SnapshotStore, validate_slot};

/// Snapshot store backed by a process-local map.
///
/// Survives cart re-creation within a process but not a restart.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    slots: Mutex<HashMap<String, String>>,
}

impl MemorySnapshotStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with `contents` already written to `slot`.
    #[must_use]
    pub fn with_snapshot(slot: &str, contents: &str) -> Self {
        let store = Self::new();
        store
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(slot.to_string(), contents.to_string());
        store
    }

    /// Raw contents of a slot, for inspection.
    #[must_use]
    pub fn contents(&self, slot: &str) -> Option<String> {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(slot)
            .cloned()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load(&self, slot: &str) -> Result<Option<String>, PersistenceError> {
        validate_slot(slot)?;
        Ok(self.contents(slot))
    }

    fn save(&self, slot: &str, contents: &str) -> Result<(), PersistenceError> {
        validate_slot(slot)?;
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(slot.to_string(), contents.to_string());
        Ok(())
    }

    fn remove(&self, slot: &str) -> Result<(), PersistenceError> {
        validate_slot(slot)?;
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(slot);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_save_load_remove() {
        let store = MemorySnapshotStore::new();
        assert_eq!(store.load("cart").unwrap(), None);
        store.save("cart", "{}").unwrap();
        assert_eq!(store.load("cart").unwrap().as_deref(), Some("{}"));
        store.remove("cart").unwrap();
        assert_eq!(store.load("cart").unwrap(), None);
    }

    #[test]
    fn test_rejects_invalid_slot() {
        let store = MemorySnapshotStore::new();
        assert!(matches!(
            store.save("../x", "{}"),
            Err(PersistenceError::InvalidSlot(_))
        ));
    }
}
