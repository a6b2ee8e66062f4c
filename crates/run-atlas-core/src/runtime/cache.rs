// crates/run-atlas-core/src/runtime/cache.rs
// ============================================================================
// Module: TTL Cache
// Description: Small keyed cache with per-read time-to-live checks.
// Purpose: Absorb repeated polling for namespace maps and field indexes.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! Entries are stamped when stored and checked for staleness lazily on read.
//! There is no background eviction; every insert prunes entries older than
//! the inserting caller's TTL, so unused keys do not accumulate. The lock is never held while a value is
//! computed, so concurrent rebuilds of the same key race and the last writer
//! wins.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// A cache or registry mutex was poisoned by a panicking holder.
#[derive(Debug, Error)]
#[error("{0} mutex poisoned")]
pub struct LockPoisoned(pub &'static str);

// ============================================================================
// SECTION: Cache
// ============================================================================

/// Keyed cache whose entries expire after a caller-supplied TTL.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    /// Cache label used in lock errors.
    label: &'static str,
    /// Entries with their insertion instant.
    entries: Mutex<HashMap<K, (Instant, V)>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    /// Creates an empty cache.
    #[must_use]
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns a fresh cached value, if any.
    ///
    /// # Errors
    ///
    /// Returns [`LockPoisoned`] when the cache mutex is poisoned.
    pub fn get(&self, key: &K, ttl: Duration) -> Result<Option<V>, LockPoisoned> {
        let guard = self.entries.lock().map_err(|_| LockPoisoned(self.label))?;
        Ok(guard
            .get(key)
            .filter(|(stored_at, _)| stored_at.elapsed() < ttl)
            .map(|(_, value)| value.clone()))
    }

    /// Stores a value, replacing any previous entry and dropping entries
    /// older than `ttl`.
    ///
    /// # Errors
    ///
    /// Returns [`LockPoisoned`] when the cache mutex is poisoned.
    pub fn insert(&self, key: K, value: V, ttl: Duration) -> Result<(), LockPoisoned> {
        let mut guard = self.entries.lock().map_err(|_| LockPoisoned(self.label))?;
        guard.retain(|_, (stored_at, _)| stored_at.elapsed() < ttl);
        guard.insert(key, (Instant::now(), value));
        drop(guard);
        Ok(())
    }

    /// Number of stored entries, stale ones included.
    ///
    /// # Errors
    ///
    /// Returns [`LockPoisoned`] when the cache mutex is poisoned.
    pub fn entry_count(&self) -> Result<usize, LockPoisoned> {
        Ok(self.entries.lock().map_err(|_| LockPoisoned(self.label))?.len())
    }

    /// Returns the cached value or computes, stores, and returns a new one.
    ///
    /// A failed computation stores nothing.
    ///
    /// # Errors
    ///
    /// Returns the computation's error, or a lock error converted into `E`.
    pub fn get_or_compute<E, F>(&self, key: K, ttl: Duration, compute: F) -> Result<V, E>
    where
        E: From<LockPoisoned>,
        F: FnOnce() -> Result<V, E>,
    {
        if let Some(value) = self.get(&key, ttl)? {
            return Ok(value);
        }
        let value = compute()?;
        self.insert(key, value.clone(), ttl)?;
        Ok(value)
    }

    /// Drops one entry, or every entry when `key` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`LockPoisoned`] when the cache mutex is poisoned.
    pub fn invalidate(&self, key: Option<&K>) -> Result<(), LockPoisoned> {
        let mut guard = self.entries.lock().map_err(|_| LockPoisoned(self.label))?;
        match key {
            Some(key) => {
                guard.remove(key);
            }
            None => guard.clear(),
        }
        drop(guard);
        Ok(())
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]

    use std::cell::Cell;
    use std::time::Duration;

    use super::LockPoisoned;
    use super::TtlCache;

    const LONG: Duration = Duration::from_secs(60);

    #[test]
    fn fresh_entry_is_not_recomputed() {
        let cache: TtlCache<&str, u32> = TtlCache::new("test");
        let calls = Cell::new(0);
        let compute = || {
            calls.set(calls.get() + 1);
            Ok::<_, LockPoisoned>(7)
        };
        assert_eq!(cache.get_or_compute("all", LONG, compute).unwrap(), 7);
        assert_eq!(cache.get_or_compute("all", LONG, compute).unwrap(), 7);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn zero_ttl_always_recomputes() {
        let cache: TtlCache<&str, u32> = TtlCache::new("test");
        let calls = Cell::new(0);
        let compute = || {
            calls.set(calls.get() + 1);
            Ok::<_, LockPoisoned>(calls.get())
        };
        assert_eq!(cache.get_or_compute("k", Duration::ZERO, compute).unwrap(), 1);
        assert_eq!(cache.get_or_compute("k", Duration::ZERO, compute).unwrap(), 2);
    }

    #[test]
    fn invalidate_one_key_keeps_others() {
        let cache: TtlCache<&str, u32> = TtlCache::new("test");
        cache.insert("a", 1, LONG).unwrap();
        cache.insert("b", 2, LONG).unwrap();
        cache.invalidate(Some(&"a")).unwrap();
        assert_eq!(cache.get(&"a", LONG).unwrap(), None);
        assert_eq!(cache.get(&"b", LONG).unwrap(), Some(2));
        cache.invalidate(None).unwrap();
        assert_eq!(cache.get(&"b", LONG).unwrap(), None);
    }

    #[test]
    fn failed_compute_stores_nothing() {
        let cache: TtlCache<&str, u32> = TtlCache::new("test");
        let result = cache.get_or_compute("k", LONG, || Err(LockPoisoned("boom")));
        assert!(result.is_err());
        assert_eq!(cache.get(&"k", LONG).unwrap(), None);
    }

    #[test]
    fn insert_prunes_expired_entries() {
        let cache: TtlCache<String, u32> = TtlCache::new("test");
        for id in 0..50 {
            cache.insert(format!("unknown-{id}"), id, LONG).unwrap();
        }
        assert_eq!(cache.entry_count().unwrap(), 50);
        cache.insert("fresh".to_string(), 1, Duration::ZERO).unwrap();
        assert_eq!(cache.entry_count().unwrap(), 1);
        assert_eq!(cache.get(&"fresh".to_string(), LONG).unwrap(), Some(1));
    }

    #[test]
    fn none_key_is_distinct_from_any_named_key() {
        let cache: TtlCache<Option<String>, u32> = TtlCache::new("test");
        cache.insert(None, 1, LONG).unwrap();
        cache.insert(Some("all".to_string()), 2, LONG).unwrap();
        assert_eq!(cache.get(&None, LONG).unwrap(), Some(1));
        assert_eq!(cache.get(&Some("all".to_string()), LONG).unwrap(), Some(2));
    }
}
