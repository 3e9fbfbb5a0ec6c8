//! Host-side seams: session key/value storage and the render surface the
//! results are drawn into. In-memory implementations back the CLI and tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

/// Anchors the results view cannot render without.
pub const REQUIRED_ANCHORS: [&str; 3] = ["tools-grid", "tool-search", "category-filter"];

/// Storage key probed by health checks.
pub const PROBE_KEY: &str = "toolctx-probe";

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("storage unavailable")]
    Unavailable,
    #[error("stored value for '{0}' is unreadable")]
    Corrupt(String),
}

/// Per-session string store.
pub trait SessionStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str);
    fn keys(&self) -> Vec<String>;

    /// Write, read back and delete a probe value.
    fn probe(&self) -> bool {
        if self.set(PROBE_KEY, "1").is_err() {
            return false;
        }
        let ok = matches!(self.get(PROBE_KEY), Ok(Some(v)) if v == "1");
        self.remove(PROBE_KEY);
        ok
    }
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: Mutex<BTreeMap<String, String>>,
    broken: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self { Self::default() }

    fn items(&self) -> MutexGuard<'_, BTreeMap<String, String>> { self.items.lock().unwrap_or_else(PoisonError::into_inner) }

    /// While broken every read and write fails, as a full or disabled store would.
    pub fn set_broken(&self, broken: bool) { self.broken.store(broken, Ordering::SeqCst) }

    fn check(&self) -> Result<(), StorageError> {
        if self.broken.load(Ordering::SeqCst) { Err(StorageError::Unavailable) } else { Ok(()) }
    }
}

impl SessionStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.check()?;
        Ok(self.items().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.check()?;
        self.items().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) {
        if self.items().remove(key).is_some() {
            debug!(key, "storage key removed");
        }
    }

    fn keys(&self) -> Vec<String> { self.items().keys().cloned().collect() }
}

/// Where results are rendered; only anchor presence matters here.
pub trait RenderSurface: Send + Sync {
    fn has_anchor(&self, id: &str) -> bool;
    fn create_anchor(&self, id: &str) -> bool;
    fn remove_anchor(&self, id: &str);

    fn missing_anchors(&self) -> Vec<String> { REQUIRED_ANCHORS.iter().filter(|id| !self.has_anchor(id)).map(|id| id.to_string()).collect() }
}

#[derive(Debug)]
pub struct MemorySurface {
    anchors: Mutex<Vec<String>>,
}

impl Default for MemorySurface {
    fn default() -> Self { Self { anchors: Mutex::new(REQUIRED_ANCHORS.iter().map(|s| s.to_string()).collect()) } }
}

impl MemorySurface {
    /// Surface with every required anchor present.
    pub fn new() -> Self { Self::default() }

    pub fn empty() -> Self { Self { anchors: Mutex::new(Vec::new()) } }

    fn anchors(&self) -> MutexGuard<'_, Vec<String>> { self.anchors.lock().unwrap_or_else(PoisonError::into_inner) }
}

impl RenderSurface for MemorySurface {
    fn has_anchor(&self, id: &str) -> bool { self.anchors().iter().any(|a| a == id) }

    fn create_anchor(&self, id: &str) -> bool {
        let mut a = self.anchors();
        if !a.iter().any(|x| x == id) {
            a.push(id.to_string());
            debug!(anchor = id, "anchor created");
        }
        true
    }

    fn remove_anchor(&self, id: &str) { self.anchors().retain(|a| a != id) }
}
