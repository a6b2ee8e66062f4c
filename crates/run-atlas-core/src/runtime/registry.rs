// crates/run-atlas-core/src/runtime/registry.rs
// ============================================================================
// Module: Store Registry
// Description: Named store instances constructed once per connection string.
// Purpose: Replace hidden process-global singletons with an injected registry.
// Dependencies: crate::runtime::cache
// ============================================================================

//! ## Overview
//! A [`StoreRegistry`] is built once at process start and passed to whatever
//! serves requests. Each connection string maps to one shared store. Tests
//! call [`StoreRegistry::reset`] to start from a clean slate.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use crate::runtime::cache::LockPoisoned;

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Registry of shared store instances keyed by connection string.
#[derive(Debug)]
pub struct StoreRegistry<S> {
    /// Stores keyed by connection string.
    stores: Mutex<BTreeMap<String, Arc<S>>>,
}

impl<S> Default for StoreRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> StoreRegistry<S> {
    /// Creates an empty registry.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            stores: Mutex::new(BTreeMap::new()),
        }
    }

    /// Returns the store registered under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`LockPoisoned`] when the registry mutex is poisoned.
    pub fn get(&self, key: &str) -> Result<Option<Arc<S>>, LockPoisoned> {
        let guard = self.stores.lock().map_err(|_| LockPoisoned("store registry"))?;
        Ok(guard.get(key).cloned())
    }

    /// Returns the store for `key`, constructing it on first use.
    ///
    /// Construction runs under the registry lock so each key is built once.
    ///
    /// # Errors
    ///
    /// Returns the constructor's error, or a lock error converted into `E`.
    pub fn get_or_try_insert_with<E, F>(&self, key: &str, build: F) -> Result<Arc<S>, E>
    where
        E: From<LockPoisoned>,
        F: FnOnce() -> Result<S, E>,
    {
        let mut guard = self.stores.lock().map_err(|_| LockPoisoned("store registry"))?;
        if let Some(store) = guard.get(key) {
            return Ok(Arc::clone(store));
        }
        let store = Arc::new(build()?);
        guard.insert(key.to_string(), Arc::clone(&store));
        drop(guard);
        Ok(store)
    }

    /// Number of registered stores.
    ///
    /// # Errors
    ///
    /// Returns [`LockPoisoned`] when the registry mutex is poisoned.
    pub fn count(&self) -> Result<usize, LockPoisoned> {
        Ok(self.stores.lock().map_err(|_| LockPoisoned("store registry"))?.len())
    }

    /// Drops every registered store.
    ///
    /// Stores still referenced elsewhere stay alive until those references drop.
    ///
    /// # Errors
    ///
    /// Returns [`LockPoisoned`] when the registry mutex is poisoned.
    pub fn reset(&self) -> Result<(), LockPoisoned> {
        self.stores.lock().map_err(|_| LockPoisoned("store registry"))?.clear();
        Ok(())
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
