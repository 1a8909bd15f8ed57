//! Local key/value storage.
//!
//! Two small persisted values live here: the device id and the serialized
//! notification preferences. Both are best-effort: a missing key means "not
//! initialized yet", and callers degrade instead of failing when the store
//! itself is unavailable.
//!
//! - [`FileStore`] keeps one file per key under the config directory.
//! - [`MemoryStore`] keeps values in memory; used by tests, embedders, and
//!   anywhere persistence across runs is not wanted.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::error::StorageError;

/// Shared handle to a store, used by both the identity and preference stores.
pub type SharedStore = Rc<dyn KeyValueStore>;

/// Minimal persistent key/value interface.
pub trait KeyValueStore: std::fmt::Debug {
    /// Read a value. `Ok(None)` when the key was never written.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write a value, replacing any previous one.
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove a value. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// File-backed store: `<dir>/<key>` per entry, owner read/write only.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Create a store rooted at `dir`. The directory is created lazily on
    /// first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the entries.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
            return Err(StorageError::Unavailable(format!("invalid storage key {key:?}")));
        }
        Ok(self.dir.join(key))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        fs::create_dir_all(&self.dir)?;
        fs::write(&path, value)?;

        #[cfg(unix)]
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory store.
///
/// Counts writes per key and can be switched to "unavailable" to mimic a
/// privacy mode where every access fails.
#[derive(Debug)]
pub struct MemoryStore {
    values: RefCell<HashMap<String, String>>,
    writes: RefCell<HashMap<String, usize>>,
    available: Cell<bool>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Empty, available store.
    pub fn new() -> Self {
        Self {
            values: RefCell::new(HashMap::new()),
            writes: RefCell::new(HashMap::new()),
            available: Cell::new(true),
        }
    }

    /// Store on which every operation fails.
    pub fn unavailable() -> Self {
        let store = Self::new();
        store.available.set(false);
        store
    }

    /// Toggle availability.
    pub fn set_available(&self, available: bool) {
        self.available.set(available);
    }

    /// Number of successful writes to `key` so far.
    pub fn write_count(&self, key: &str) -> usize {
        self.writes.borrow().get(key).copied().unwrap_or(0)
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.available.get() {
            Ok(())
        } else {
            Err(StorageError::Unavailable("storage is disabled".to_string()))
        }
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.check()?;
        Ok(self.values.borrow().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.check()?;
        self.values
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        *self.writes.borrow_mut().entry(key.to_string()).or_insert(0) += 1;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.check()?;
        self.values.borrow_mut().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("state"));

        assert_eq!(store.get("device_id").unwrap(), None);
        store.set("device_id", "device_abc_123").unwrap();
        assert_eq!(
            store.get("device_id").unwrap().as_deref(),
            Some("device_abc_123")
        );

        store.remove("device_id").unwrap();
        assert_eq!(store.get("device_id").unwrap(), None);
        // Removing twice is fine
        store.remove("device_id").unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_file_store_owner_only_permissions() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.set("device_id", "x").unwrap();

        let mode = fs::metadata(dir.path().join("device_id"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_file_store_rejects_path_like_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        assert!(store.set("../escape", "x").is_err());
        assert!(store.get("").is_err());
    }

    #[test]
    fn test_memory_store_counts_writes() {
        let store = MemoryStore::new();
        store.set("k", "a").unwrap();
        store.set("k", "b").unwrap();
        assert_eq!(store.write_count("k"), 2);
        assert_eq!(store.write_count("other"), 0);
        assert_eq!(store.get("k").unwrap().as_deref(), Some("b"));
    }

    #[test]
    fn test_memory_store_unavailable() {
        let store = MemoryStore::unavailable();
        assert!(matches!(
            store.get("k"),
            Err(StorageError::Unavailable(_))
        ));
        assert!(store.set("k", "v").is_err());

        store.set_available(true);
        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
    }
}
