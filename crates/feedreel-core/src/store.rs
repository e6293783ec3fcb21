//! Persistent key/value storage
//!
//! The controller treats its in-memory catalog, resume position, watch
//! history and mute preference as a cache of this store and writes through
//! on every change. Writes are synchronous and idempotent.

use crate::{error::StoreError, types::*};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Store keys
pub mod keys {
    pub const CATALOG: &str = "catalog";
    pub const CATALOG_UPDATED_AT: &str = "catalog.updatedAt";
    pub const LAST_INDEX: &str = "session.lastIndex";
    pub const LAST_TIME_SECONDS: &str = "session.lastTimeSeconds";
    pub const WATCH_HISTORY: &str = "watchHistory";
    pub const USER_MUTED: &str = "userMuted";
}

/// Catalog id -> last watched timestamp
pub type WatchHistory = BTreeMap<String, String>;

/// Abstract key/value store
pub trait PersistentStore: Send + Sync {
    fn read(&self, key: &str) -> Option<String>;
    fn write(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
    fn clear(&self) -> Result<(), StoreError>;
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PersistentStore for MemoryStore {
    fn read(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.values.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.values.write().remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.values.write().clear();
        Ok(())
    }
}

/// Store persisted as a single JSON object file, rewritten on each write
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    values: RwLock<BTreeMap<String, String>>,
}

impl JsonFileStore {
    /// Open the store at `path`, starting empty if the file does not exist
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let values = match std::fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => BTreeMap::new(),
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), keys = values.len(), "Opened state file");
        Ok(Self {
            path,
            values: RwLock::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, values: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(values)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl PersistentStore for JsonFileStore {
    fn read(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut values = self.values.write();
        if values.get(key).map(String::as_str) == Some(value) {
            return Ok(());
        }
        values.insert(key.to_string(), value.to_string());
        self.flush(&values)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut values = self.values.write();
        if values.remove(key).is_some() {
            self.flush(&values)?;
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        let mut values = self.values.write();
        values.clear();
        self.flush(&values)
    }
}

/// Typed view over a [`PersistentStore`]
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<dyn PersistentStore>,
}

impl SessionStore {
    pub fn new(inner: Arc<dyn PersistentStore>) -> Self {
        Self { inner }
    }

    /// Cached catalog. A corrupt or empty value counts as no cache.
    pub fn catalog(&self) -> Option<Catalog> {
        let raw = self.inner.read(keys::CATALOG)?;
        match serde_json::from_str::<Catalog>(&raw) {
            Ok(catalog) if !catalog.is_empty() => Some(catalog),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "Ignoring corrupt cached catalog");
                None
            }
        }
    }

    /// Overwrite the cached catalog and stamp its update time
    pub fn save_catalog(&self, catalog: &Catalog) -> Result<(), StoreError> {
        let json = serde_json::to_string(catalog)?;
        self.inner.write(keys::CATALOG, &json)?;
        self.inner
            .write(keys::CATALOG_UPDATED_AT, &Utc::now().to_rfc3339())
    }

    pub fn catalog_updated_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.inner.read(keys::CATALOG_UPDATED_AT)?;
        DateTime::parse_from_rfc3339(&raw)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }

    pub fn last_index(&self) -> Option<usize> {
        self.inner.read(keys::LAST_INDEX)?.trim().parse().ok()
    }

    pub fn save_last_index(&self, index: usize) -> Result<(), StoreError> {
        self.inner.write(keys::LAST_INDEX, &index.to_string())
    }

    /// Saved resume position, 0 when missing or unparsable
    pub fn last_time_seconds(&self) -> f64 {
        self.inner
            .read(keys::LAST_TIME_SECONDS)
            .and_then(|raw| raw.trim().parse::<f64>().ok())
            .filter(|t| t.is_finite() && *t > 0.0)
            .unwrap_or(0.0)
    }

    pub fn save_last_time_seconds(&self, seconds: f64) -> Result<(), StoreError> {
        self.inner
            .write(keys::LAST_TIME_SECONDS, &seconds.to_string())
    }

    pub fn watch_history(&self) -> WatchHistory {
        self.inner
            .read(keys::WATCH_HISTORY)
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }

    pub fn save_watch_history(&self, history: &WatchHistory) -> Result<(), StoreError> {
        let json = serde_json::to_string(history)?;
        self.inner.write(keys::WATCH_HISTORY, &json)
    }

    pub fn muted(&self, default: bool) -> bool {
        self.inner
            .read(keys::USER_MUTED)
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or(default)
    }

    pub fn save_muted(&self, muted: bool) -> Result<(), StoreError> {
        self.inner.write(keys::USER_MUTED, &muted.to_string())
    }
}
