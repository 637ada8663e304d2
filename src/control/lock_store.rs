//! Lock-store capability, backend registry, and the process-wide lazy handle.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::control::memcached::{MemcachedConfig, MemcachedLockStore};
use crate::core::config::{LockStoreBackend, LockStoreConfig};
use crate::core::errors::Result;

/// The single key the protected service watches for read/delete-only mode.
pub const LOCK_KEY: &str = "PcsReadDeleteMode";

/// Minimal set/clear key-value capability used by the mode controller.
///
/// Clearing a key that is already absent succeeds.
pub trait LockStore: Send + Sync {
    fn set(&self, key: &str, payload: &str) -> Result<()>;
    fn clear(&self, key: &str) -> Result<()>;
    fn name(&self) -> &'static str;
    /// Release connections and background workers. Later calls fail.
    fn shutdown(&self) {}
}

/// In-process store for single-host dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryLockStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryLockStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    #[must_use]
    pub fn is_set(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }
}

impl LockStore for MemoryLockStore {
    fn set(&self, key: &str, payload: &str) -> Result<()> {
        self.entries
            .lock()
            .insert(key.to_string(), payload.to_string());
        Ok(())
    }

    fn clear(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Build the backend selected by configuration.
pub fn open_lock_store(config: &LockStoreConfig) -> Result<Arc<dyn LockStore>> {
    match config.backend {
        LockStoreBackend::Memcached => Ok(Arc::new(MemcachedLockStore::connect(
            MemcachedConfig::from(config),
        )?)),
        LockStoreBackend::Memory => Ok(Arc::new(MemoryLockStore::new())),
    }
}

type Factory = Box<dyn Fn() -> Result<Arc<dyn LockStore>> + Send + Sync>;

/// Constructs the configured store on first use and keeps it for the life of
/// the process. A failed construction is retried on the next call.
pub struct LazyLockStore {
    factory: Factory,
    slot: Mutex<Option<Arc<dyn LockStore>>>,
}

impl std::fmt::Debug for LazyLockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyLockStore")
            .field("initialized", &self.slot.lock().is_some())
            .finish_non_exhaustive()
    }
}

impl LazyLockStore {
    #[must_use]
    pub fn from_config(config: LockStoreConfig) -> Self {
        Self::with_factory(move || open_lock_store(&config))
    }

    pub fn with_factory<F>(factory: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn LockStore>> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            slot: Mutex::new(None),
        }
    }

    /// Wrap an already-built store.
    #[must_use]
    pub fn ready(store: Arc<dyn LockStore>) -> Self {
        let handle = Arc::clone(&store);
        Self {
            factory: Box::new(move || Ok(Arc::clone(&handle))),
            slot: Mutex::new(Some(store)),
        }
    }

    pub fn get(&self) -> Result<Arc<dyn LockStore>> {
        let mut slot = self.slot.lock();
        if let Some(store) = slot.as_ref() {
            return Ok(Arc::clone(store));
        }
        let store = (self.factory)()?;
        *slot = Some(Arc::clone(&store));
        Ok(store)
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Tear down the store if it was ever built.
    pub fn shutdown(&self) {
        if let Some(store) = self.slot.lock().take() {
            store.shutdown();
        }
    }
}
