//! Namespaced key-value persistence.
//!
//! Values are JSON documents. The file-backed store keeps one `<key>.json`
//! file per key under the state directory:
//!
//! ```text
//! ~/.latentspace/state/
//!   history.json       # {records, cursor}
//!   last_journey.json  # {records, captured_at}
//!   api_key.json
//!   model.json
//!   style.json
//!   dark_mode.json
//! ```

use crate::error::PersistenceError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::PathBuf;

pub const HISTORY_KEY: &str = "history";
pub const LAST_JOURNEY_KEY: &str = "last_journey";
pub const API_KEY_KEY: &str = "api_key";
pub const MODEL_KEY: &str = "model";
pub const STYLE_KEY: &str = "style";
pub const DARK_MODE_KEY: &str = "dark_mode";

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError>;
    fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError>;
    fn remove(&self, key: &str) -> Result<(), PersistenceError>;
}

/// Read and decode a JSON value. `Ok(None)` when the key was never written.
pub fn load_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, PersistenceError> {
    let Some(raw) = store.get(key)? else {
        return Ok(None);
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|source| PersistenceError::Corrupt {
            key: key.to_string(),
            source,
        })
}

pub fn save_json<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), PersistenceError> {
    let encoded = serde_json::to_string(value)?;
    store.set(key, &encoded)
}

/// Like [`load_json`], but absent or unreadable values collapse to `None`
/// with a warning.
pub fn load_json_or_warn<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Option<T> {
    match load_json(store, key) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("Ignoring persisted '{}': {}", key, e);
            None
        }
    }
}

fn validate_key(key: &str) -> Result<(), PersistenceError> {
    let ok = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(PersistenceError::InvalidKey(key.to_string()))
    }
}

pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, PersistenceError> {
        validate_key(key)?;
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        let path = self.path_for(key)?;
        fs::create_dir_all(&self.dir)?;
        fs::write(path, value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PersistenceError> {
        let path = self.path_for(key)?;
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Process-local store; nothing survives a restart.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryStore {
    entries: std::sync::Mutex<std::collections::HashMap<String, String>>,
}

#[cfg(test)]
impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        validate_key(key)?;
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        validate_key(key)?;
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PersistenceError> {
        validate_key(key)?;
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
        Ok(())
    }
}
