//! The store contract consumed by loaders.
//!
//! Stores are the pluggable persistence layer behind a loader. The loader
//! never introspects a store beyond this contract: raw get/set/delete in
//! parsed-key space, batched variants, and a static capability set probed
//! once at construction.
//!
//! ## Architecture
//!
//! ```text
//!     ┌──────────────┐   parsed keys    ┌──────────────────┐
//!     │  CacheLoader │ ───────────────► │   dyn Store      │
//!     │ (chain link) │ ◄─────────────── │  (memory, …)     │
//!     └──────────────┘   StoredValue    └────────┬─────────┘
//!                                                │ optional
//!                                                ▼
//!                                       ┌──────────────────┐
//!                                       │  dyn StoreLock   │
//!                                       │ (advisory locks) │
//!                                       └──────────────────┘
//! ```
//!
//! ## Capability Flags
//!
//! | Flag | Meaning for the loader |
//! |------|------------------------|
//! | `native_ttl` | store expires entries itself; no TTL envelope |
//! | `multiple_identifiers` | keys stay structured instead of hashed |
//! | `dereferences_objects` | returned values are already unshared |
//! | `key_aware` | membership probes are cheap and trustworthy |
//! | `lockable` | `lock()` returns the native lock interface |

use crate::envelope::StoredValue;
use crate::error::StoreResult;
use crate::key::ParsedKey;

/// Static capability set of a store, probed once and cached as flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// The store applies TTL itself; the loader skips TTL envelopes.
    pub native_ttl: bool,
    /// The store addresses entries by `{component, area, identifiers…, key}`.
    pub multiple_identifiers: bool,
    /// Values returned by the store share no state with stored values.
    pub dereferences_objects: bool,
    /// The store can answer `has` without fetching the value.
    pub key_aware: bool,
    /// The store exposes a native advisory lock.
    pub lockable: bool,
}

/// Outcome of a lock-state probe for a `(key, owner)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// The probing owner holds the lock.
    Held,
    /// A different owner holds the lock.
    HeldByOther,
    /// Nobody holds the lock.
    NotHeld,
}

/// Advisory per-key locking, native or via a secondary lock store.
pub trait StoreLock: Send + Sync {
    fn acquire_lock(&self, key: &ParsedKey, owner: &str) -> StoreResult<bool>;

    fn release_lock(&self, key: &ParsedKey, owner: &str) -> StoreResult<bool>;

    fn check_lock_state(&self, key: &ParsedKey, owner: &str) -> StoreResult<LockState>;
}

/// Snapshot of store activity counters, cumulative since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreMetrics {
    /// Successful lookups.
    pub hits: u64,
    /// Failed lookups.
    pub misses: u64,
    /// Entries written.
    pub sets: u64,
    /// Entries removed via delete.
    pub deletes: u64,
}

/// A backing key-value engine.
///
/// Object-safe so loaders can hold heterogeneous stores behind
/// `Arc<dyn Store>`. All methods take parsed keys; the loader owns key
/// parsing and envelope composition.
pub trait Store: Send + Sync {
    /// Fetches a value, or `None` on a miss.
    fn get(&self, key: &ParsedKey) -> StoreResult<Option<StoredValue>>;

    /// Batched fetch; the result aligns with `keys`.
    fn get_many(&self, keys: &[ParsedKey]) -> StoreResult<Vec<Option<StoredValue>>> {
        keys.iter().map(|key| self.get(key)).collect()
    }

    /// Writes a value. Returns whether the write was applied.
    fn set(&self, key: &ParsedKey, value: StoredValue) -> StoreResult<bool>;

    /// Batched write; returns the number of entries written.
    fn set_many(&self, entries: Vec<(ParsedKey, StoredValue)>) -> StoreResult<usize> {
        let mut written = 0;
        for (key, value) in entries {
            if self.set(&key, value)? {
                written += 1;
            }
        }
        Ok(written)
    }

    /// Removes an entry. Returns whether one existed.
    fn delete(&self, key: &ParsedKey) -> StoreResult<bool>;

    /// Batched removal; returns the number of entries removed.
    fn delete_many(&self, keys: &[ParsedKey]) -> StoreResult<usize> {
        let mut removed = 0;
        for key in keys {
            if self.delete(key)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Membership probe.
    fn has(&self, key: &ParsedKey) -> StoreResult<bool>;

    /// Whether every key is present.
    fn has_all(&self, keys: &[ParsedKey]) -> StoreResult<bool> {
        for key in keys {
            if !self.has(key)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Whether any key is present.
    fn has_any(&self, keys: &[ParsedKey]) -> StoreResult<bool> {
        for key in keys {
            if self.has(key)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Drops every entry.
    fn purge(&self) -> StoreResult<()>;

    /// The store's static capability set.
    fn capabilities(&self) -> Capabilities;

    /// Native lock interface, present iff `capabilities().lockable`.
    fn lock(&self) -> Option<&dyn StoreLock> {
        None
    }

    /// Bytes moved by the most recent operation, where the backend tracks
    /// I/O. In-process stores return `None`.
    fn last_io_bytes(&self) -> Option<u64> {
        None
    }

    /// Activity counters. Default implementation returns zeroed metrics;
    /// override to provide actual tracking.
    fn metrics(&self) -> StoreMetrics {
        StoreMetrics::default()
    }
}
