//! Local Persistence
//!
//! Synchronous string key/value storage. [`FileStore`] keeps one JSON object
//! per file and re-reads it on every access, so a value written by one
//! process is visible to the next one (the redirect return may arrive in a
//! fresh process).

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::{FlowError, FlowResult};

pub trait KeyValueStore {
    fn get(&self, key: &str) -> FlowResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> FlowResult<()>;
    fn remove(&self, key: &str) -> FlowResult<()>;
    fn keys(&self) -> FlowResult<Vec<String>>;
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for Box<S> {
    fn get(&self, key: &str) -> FlowResult<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> FlowResult<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> FlowResult<()> {
        (**self).remove(key)
    }

    fn keys(&self) -> FlowResult<Vec<String>> {
        (**self).keys()
    }
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for Arc<S> {
    fn get(&self, key: &str) -> FlowResult<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> FlowResult<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> FlowResult<()> {
        (**self).remove(key)
    }

    fn keys(&self) -> FlowResult<Vec<String>> {
        (**self).keys()
    }
}

// ── FileStore ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// The file is created lazily on the first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> FlowResult<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let data = fs::read_to_string(&self.path)
            .map_err(|e| FlowError::storage(&format!("Failed to read {:?}", self.path), e))?;
        if data.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&data)
            .map_err(|e| FlowError::storage(&format!("Failed to parse {:?}", self.path), e))
    }

    fn write_all(&self, entries: &BTreeMap<String, String>) -> FlowResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| FlowError::storage(&format!("Failed to create {:?}", parent), e))?;
        }
        let json = serde_json::to_string_pretty(entries)
            .map_err(|e| FlowError::storage("Failed to serialize store", e))?;
        fs::write(&self.path, json)
            .map_err(|e| FlowError::storage(&format!("Failed to write {:?}", self.path), e))?;
        debug!("Wrote {} entries to {:?}", entries.len(), self.path);
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> FlowResult<Option<String>> {
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> FlowResult<()> {
        let mut entries = self.read_all()?;
        entries.insert(key.to_string(), value.to_string());
        self.write_all(&entries)
    }

    fn remove(&self, key: &str) -> FlowResult<()> {
        let mut entries = self.read_all()?;
        if entries.remove(key).is_some() {
            self.write_all(&entries)?;
        }
        Ok(())
    }

    fn keys(&self) -> FlowResult<Vec<String>> {
        Ok(self.read_all()?.into_keys().collect())
    }
}

// ── MemoryStore ─────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> FlowResult<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| FlowError::Storage("memory store lock poisoned".into()))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> FlowResult<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> FlowResult<()> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> FlowResult<()> {
        self.lock()?.remove(key);
        Ok(())
    }

    fn keys(&self) -> FlowResult<Vec<String>> {
        let mut keys: Vec<String> = self.lock()?.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}
