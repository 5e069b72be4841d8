//! In-process memory store.
//!
//! ## Key Components
//! - `MemoryStore`: thread-safe map-backed store with an advisory lock
//!   table and hit/miss counters behind atomics.
//! - `MemoryStoreBuilder`: configures the capability set, so one backend
//!   can stand in for stores with native TTL, multi-identifier keys, or
//!   dereferencing behaviour.
//!
//! ## Native TTL
//! When built with `native_ttl`, the store stamps every entry with an
//! absolute expiry and treats expired entries as absent, removing them on
//! contact. Loaders then skip TTL envelopes entirely for this store.
//!
//! ## Thread Safety
//! The store is process-wide and `Send + Sync`: a global `RwLock` guards
//! the map, a `Mutex` guards the lock table, and counters are atomics.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::clock::CacheClock;
use crate::envelope::StoredValue;
use crate::error::StoreResult;
use crate::key::ParsedKey;
use crate::store::traits::{Capabilities, LockState, Store, StoreLock, StoreMetrics};

#[derive(Debug, Default)]
struct StoreCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
}

impl StoreCounters {
    fn snapshot(&self) -> StoreMetrics {
        StoreMetrics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug)]
struct Entry {
    value: StoredValue,
    expires_at: Option<u64>,
}

/// Thread-safe in-process store with configurable capabilities.
///
/// # Example
///
/// ```
/// use cachefront::store::memory::MemoryStore;
/// use cachefront::store::traits::Store;
/// use cachefront::envelope::StoredValue;
/// use cachefront::key::ParsedKey;
/// use serde_json::json;
///
/// let store = MemoryStore::new();
/// let key = ParsedKey::Hash("abc123".to_string());
/// store.set(&key, StoredValue::Data(json!(1))).unwrap();
/// assert_eq!(store.get(&key).unwrap(), Some(StoredValue::Data(json!(1))));
/// ```
pub struct MemoryStore {
    inner: RwLock<FxHashMap<ParsedKey, Entry>>,
    locks: Mutex<FxHashMap<ParsedKey, String>>,
    caps: Capabilities,
    native_ttl_secs: Option<u64>,
    clock: Arc<CacheClock>,
    counters: StoreCounters,
}

impl MemoryStore {
    /// Plain store: key-aware and lockable, nothing else.
    pub fn new() -> Self {
        MemoryStoreBuilder::default().build()
    }

    pub fn builder() -> MemoryStoreBuilder {
        MemoryStoreBuilder::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    fn expired(&self, entry: &Entry) -> bool {
        match entry.expires_at {
            Some(expiry) => self.clock.now_secs() >= expiry,
            None => false,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder configuring a [`MemoryStore`]'s capability set.
pub struct MemoryStoreBuilder {
    caps: Capabilities,
    native_ttl_secs: Option<u64>,
    clock: Option<Arc<CacheClock>>,
}

impl Default for MemoryStoreBuilder {
    fn default() -> Self {
        Self {
            caps: Capabilities {
                native_ttl: false,
                multiple_identifiers: false,
                dereferences_objects: false,
                key_aware: true,
                lockable: true,
            },
            native_ttl_secs: None,
            clock: None,
        }
    }
}

impl MemoryStoreBuilder {
    /// Expire entries natively after `secs` seconds.
    pub fn native_ttl(mut self, secs: u64) -> Self {
        self.caps.native_ttl = true;
        self.native_ttl_secs = Some(secs);
        self
    }

    pub fn multiple_identifiers(mut self, yes: bool) -> Self {
        self.caps.multiple_identifiers = yes;
        self
    }

    pub fn dereferences_objects(mut self, yes: bool) -> Self {
        self.caps.dereferences_objects = yes;
        self
    }

    pub fn lockable(mut self, yes: bool) -> Self {
        self.caps.lockable = yes;
        self
    }

    /// Clock used for native TTL decisions; defaults to the global clock.
    pub fn clock(mut self, clock: Arc<CacheClock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> MemoryStore {
        MemoryStore {
            inner: RwLock::new(FxHashMap::default()),
            locks: Mutex::new(FxHashMap::default()),
            caps: self.caps,
            native_ttl_secs: self.native_ttl_secs,
            clock: self
                .clock
                .unwrap_or_else(|| Arc::new(CacheClock::system())),
            counters: StoreCounters::default(),
        }
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &ParsedKey) -> StoreResult<Option<StoredValue>> {
        let hit = {
            let map = self.inner.read();
            match map.get(key) {
                Some(entry) if !self.expired(entry) => Some(entry.value.clone()),
                Some(_) => None,
                None => {
                    self.counters.misses.fetch_add(1, Ordering::Relaxed);
                    return Ok(None);
                },
            }
        };
        match hit {
            Some(value) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(value))
            },
            None => {
                // Expired under native TTL: reclaim on contact.
                self.inner.write().remove(key);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            },
        }
    }

    fn get_many(&self, keys: &[ParsedKey]) -> StoreResult<Vec<Option<StoredValue>>> {
        keys.iter().map(|key| self.get(key)).collect()
    }

    fn set(&self, key: &ParsedKey, value: StoredValue) -> StoreResult<bool> {
        let expires_at = self.native_ttl_secs.map(|ttl| self.clock.now_secs() + ttl);
        self.inner
            .write()
            .insert(key.clone(), Entry { value, expires_at });
        self.counters.sets.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    fn set_many(&self, entries: Vec<(ParsedKey, StoredValue)>) -> StoreResult<usize> {
        let expires_at = self.native_ttl_secs.map(|ttl| self.clock.now_secs() + ttl);
        let count = entries.len();
        let mut map = self.inner.write();
        for (key, value) in entries {
            map.insert(key, Entry { value, expires_at });
        }
        self.counters.sets.fetch_add(count as u64, Ordering::Relaxed);
        Ok(count)
    }

    fn delete(&self, key: &ParsedKey) -> StoreResult<bool> {
        let removed = self.inner.write().remove(key).is_some();
        if removed {
            self.counters.deletes.fetch_add(1, Ordering::Relaxed);
        }
        Ok(removed)
    }

    fn delete_many(&self, keys: &[ParsedKey]) -> StoreResult<usize> {
        let mut map = self.inner.write();
        let mut removed = 0;
        for key in keys {
            if map.remove(key).is_some() {
                removed += 1;
            }
        }
        drop(map);
        self.counters
            .deletes
            .fetch_add(removed as u64, Ordering::Relaxed);
        Ok(removed)
    }

    fn has(&self, key: &ParsedKey) -> StoreResult<bool> {
        let map = self.inner.read();
        Ok(match map.get(key) {
            Some(entry) => !self.expired(entry),
            None => false,
        })
    }

    fn purge(&self) -> StoreResult<()> {
        self.inner.write().clear();
        Ok(())
    }

    fn capabilities(&self) -> Capabilities {
        self.caps
    }

    fn lock(&self) -> Option<&dyn StoreLock> {
        if self.caps.lockable { Some(self) } else { None }
    }

    fn metrics(&self) -> StoreMetrics {
        self.counters.snapshot()
    }
}

impl StoreLock for MemoryStore {
    fn acquire_lock(&self, key: &ParsedKey, owner: &str) -> StoreResult<bool> {
        let mut locks = self.locks.lock();
        match locks.get(key) {
            Some(holder) => Ok(holder == owner),
            None => {
                locks.insert(key.clone(), owner.to_string());
                Ok(true)
            },
        }
    }

    fn release_lock(&self, key: &ParsedKey, owner: &str) -> StoreResult<bool> {
        let mut locks = self.locks.lock();
        match locks.get(key) {
            Some(holder) if holder == owner => {
                locks.remove(key);
                Ok(true)
            },
            _ => Ok(false),
        }
    }

    fn check_lock_state(&self, key: &ParsedKey, owner: &str) -> StoreResult<LockState> {
        let locks = self.locks.lock();
        Ok(match locks.get(key) {
            Some(holder) if holder == owner => LockState::Held,
            Some(_) => LockState::HeldByOther,
            None => LockState::NotHeld,
        })
    }
}
