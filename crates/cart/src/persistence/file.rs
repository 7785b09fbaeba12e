//! Directory-backed snapshot store.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use tracing::debug;
use uuid::Uuid;

use super::{PersistenceError, SnapshotStore, validate_slot};

/// Snapshot store writing one `<slot>.json` file per slot.
///
/// Writes go to a uniquely named temporary file in the same directory and
/// are renamed into place, so a crash mid-write leaves the previous snapshot
/// intact.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    /// Create a store rooted at `dir`. The directory is created on first save.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the file backing `slot`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSlot` if the slot name is not a safe file stem.
    pub fn path_for(&self, slot: &str) -> Result<PathBuf, PersistenceError> {
        validate_slot(slot)?;
        Ok(self.dir.join(format!("{slot}.json")))
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn load(&self, slot: &str) -> Result<Option<String>, PersistenceError> {
        let path = self.path_for(slot)?;
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, slot: &str, contents: &str) -> Result<(), PersistenceError> {
        let path = self.path_for(slot)?;
        fs::create_dir_all(&self.dir)?;

        let tmp = self.dir.join(format!(".{slot}.{}.tmp", Uuid::new_v4()));
        fs::write(&tmp, contents)?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        debug!(path = %path.display(), bytes = contents.len(), "Snapshot written");
        Ok(())
    }

    fn remove(&self, slot: &str) -> Result<(), PersistenceError> {
        let path = self.path_for(slot)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("d4k-cart-test-{}", Uuid::new_v4()))
    }

    #[test]
    fn test_missing_slot_loads_none() {
        let store = FileSnapshotStore::new(scratch_dir());
        assert_eq!(store.load("cart").unwrap(), None);
    }

    #[test]
    fn test_save_then_load() {
        let dir = scratch_dir();
        let store = FileSnapshotStore::new(&dir);
        store.save("cart", r#"{"items":[]}"#).unwrap();
        store.save("cart", r#"{"items":[1]}"#).unwrap();
        assert_eq!(store.load("cart").unwrap().as_deref(), Some(r#"{"items":[1]}"#));

        // No temporary files are left behind.
        let leftovers = fs::read_dir(&dir)
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_remove_missing_is_ok() {
        let store = FileSnapshotStore::new(scratch_dir());
        assert!(store.remove("cart").is_ok());
    }

    #[test]
    fn test_path_for_rejects_traversal() {
        let store = FileSnapshotStore::new(scratch_dir());
        assert!(store.path_for("../../etc/passwd").is_err());
        assert!(store.path_for("cart").unwrap().ends_with("cart.json"));
    }
}
