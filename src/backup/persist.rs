//! Key-value persistence for the backup store
//!
//! Records are strings keyed by name, e.g. `backup_data_<user>` for the
//! collections and `backup_<id>` for blobs.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::PathBuf;

use tracing::{debug, info};

use super::errors::PersistError;

/// Local key-value persistence
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, PersistError>;

    fn set(&self, key: &str, value: &str) -> Result<(), PersistError>;

    /// Remove a record; returns whether it existed
    fn remove(&self, key: &str) -> Result<bool, PersistError>;
}

/// One file per key in a directory, replaced atomically on write
pub struct FileKeyValueStore {
    dir: PathBuf,
}

impl FileKeyValueStore {
    pub fn new(dir: PathBuf) -> Result<Self, PersistError> {
        fs::create_dir_all(&dir)?;
        info!(dir = %dir.display(), "Key-value store initialized");
        Ok(Self { dir })
    }

    /// File for `key`; bytes outside `[A-Za-z0-9_-]` are percent-encoded so
    /// distinct keys never share a file
    fn path_for(&self, key: &str) -> PathBuf {
        let mut safe = String::with_capacity(key.len());
        for byte in key.bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
                safe.push(char::from(byte));
            } else {
                safe.push_str(&format!("%{:02X}", byte));
            }
        }
        self.dir.join(format!("{}.json", safe))
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, PersistError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PersistError> {
        let path = self.path_for(key);
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(value.as_bytes())?;
        tmp.persist(&path).map_err(|e| e.error)?;

        debug!(key = key, size = value.len(), "Persisted record");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool, PersistError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory store with an optional byte capacity
#[cfg(test)]
#[derive(Default)]
pub struct MemoryKeyValueStore {
    records: std::sync::Mutex<std::collections::HashMap<String, String>>,
    capacity: Option<usize>,
}

#[cfg(test)]
impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse writes once the stored values would exceed `capacity` bytes
    pub fn with_capacity_limit(capacity: usize) -> Self {
        Self {
            records: Default::default(),
            capacity: Some(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(key)
    }
}

#[cfg(test)]
impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, PersistError> {
        Ok(self
            .records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PersistError> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(capacity) = self.capacity {
            let others: usize = records
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(_, v)| v.len())
                .sum();
            let needed = others + value.len();
            if needed > capacity {
                return Err(PersistError::QuotaExceeded { needed, capacity });
            }
        }

        records.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool, PersistError> {
        Ok(self
            .records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key)
            .is_some())
    }
}
