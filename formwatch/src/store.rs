//! Durable key-value storage.
//!
//! Holds the few pieces of state that must survive restarts: the selected
//! slot, the custom alarm sound reference, and acknowledgment flags.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::StorageError;
use crate::tracing::prelude::*;

/// Key of the slot monitored by the last run.
pub const SELECTED_SLOT_KEY: &str = "selected_slot";

/// Key of the serialized custom alarm sound reference.
pub const CUSTOM_SOUND_KEY: &str = "custom_alarm_source";

/// Key of the acknowledgment for a slot's current episode. The value is
/// the acknowledgment time in unix seconds.
pub fn ack_key(slot_id: &str) -> String {
    format!("ack.{slot_id}")
}

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// In-memory store. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// Store backed by a single JSON object on disk.
///
/// Every mutation rewrites the file through a temporary file in the same
/// directory followed by a rename, so readers never observe a partial
/// write. The in-memory copy only changes after the write succeeds.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStore {
    /// Open the store at `path`, creating parent directories as needed.
    ///
    /// A missing file is an empty store. A corrupt file is logged and
    /// treated as empty; it is replaced on the next write.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| {
                StorageError::io(format!("creating state directory {}", dir.display()), e)
            })?;
        }

        let entries = match std::fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => BTreeMap::new(),
            Ok(content) => match serde_json::from_str(&content) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Ignoring corrupt state file");
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(StorageError::io(
                    format!("reading state file {}", path.display()),
                    e,
                ));
            }
        };

        debug!(path = %path.display(), keys = entries.len(), "State store opened");

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn update(
        &self,
        mutate: impl FnOnce(&mut BTreeMap<String, String>),
    ) -> Result<(), StorageError> {
        let mut entries = self.entries.lock();
        let mut next = entries.clone();
        mutate(&mut next);
        if next == *entries {
            return Ok(());
        }

        write_atomic(&self.path, &next)?;
        *entries = next;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.update(|entries| {
            entries.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.update(|entries| {
            entries.remove(key);
        })
    }
}

fn write_atomic(path: &Path, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
    let content = serde_json::to_string_pretty(entries)
        .map_err(|e| StorageError::json("serializing state", e))?;

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| StorageError::io("creating temp state file", e))?;
    tmp.write_all(content.as_bytes())
        .map_err(|e| StorageError::io("writing temp state file", e))?;
    tmp.flush()
        .map_err(|e| StorageError::io("flushing temp state file", e))?;
    tmp.persist(path).map_err(|e| {
        StorageError::io(format!("replacing state file {}", path.display()), e.error)
    })?;

    Ok(())
}
