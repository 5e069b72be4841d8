//! Static acceleration: the request-scoped bounded LRU tier.
//!
//! Each top-of-chain loader may keep a small per-request tier in front of
//! its store, keyed by the caller's unparsed key. Two parallel views back
//! it: `entries` maps keys to payloads, `order` tracks recency with the
//! most recently used key at the back. On overflow the key at the front is
//! evicted.
//!
//! Entries are stored as-is when that is safe (scalars, simple-data
//! definitions, and immutable object markers) and as serialized bytes
//! otherwise, so a caller can never mutate tier state through a returned
//! value. TTL wrappers never enter the tier (TTL is about persistence,
//! not request-scope caching); version wrappers do, and callers re-check
//! them after every read.

use std::collections::VecDeque;

use rustc_hash::FxHashMap;

use crate::envelope::StoredValue;
use crate::key::CacheKey;

#[derive(Debug, Clone)]
enum AccelEntry {
    /// Payload held directly.
    Direct(StoredValue),
    /// Deep-serialized payload; deserialized on every read.
    Serialized(Vec<u8>),
}

/// Bounded LRU tier owned by a single loader.
#[derive(Debug)]
pub struct StaticAccel {
    entries: FxHashMap<CacheKey, AccelEntry>,
    order: VecDeque<CacheKey>,
    bound: Option<usize>,
    simple_data: bool,
}

impl StaticAccel {
    /// Creates a tier with the given entry bound (`None` = unbounded).
    pub fn new(bound: Option<usize>, simple_data: bool) -> Self {
        Self {
            entries: FxHashMap::default(),
            order: VecDeque::new(),
            bound,
            simple_data,
        }
    }

    /// Membership probe only: no version or TTL evaluation happens here.
    pub fn has(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fetches a payload, refreshing its recency.
    pub fn get(&mut self, key: &CacheKey) -> Option<StoredValue> {
        let value = match self.entries.get(key)? {
            AccelEntry::Direct(value) => value.clone(),
            AccelEntry::Serialized(bytes) => match serde_json::from_slice(bytes) {
                Ok(value) => value,
                Err(_) => {
                    self.delete(key);
                    return None;
                },
            },
        };
        if self.bound.is_some() && self.entries.len() > 1 {
            self.order.retain(|k| k != key);
            self.order.push_back(key.clone());
        }
        Some(value)
    }

    /// Inserts a payload, choosing the storage form and evicting the least
    /// recently used key on overflow.
    pub fn set(&mut self, key: CacheKey, value: StoredValue) {
        let entry = if self.store_directly(&value) {
            AccelEntry::Direct(value)
        } else {
            match serde_json::to_vec(&value) {
                Ok(bytes) => AccelEntry::Serialized(bytes),
                Err(_) => AccelEntry::Direct(value),
            }
        };

        if self.entries.insert(key.clone(), entry).is_some() {
            self.order.retain(|k| k != &key);
        }
        self.order.push_back(key);

        if let Some(bound) = self.bound {
            while self.entries.len() > bound {
                match self.order.pop_front() {
                    Some(evicted) => {
                        self.entries.remove(&evicted);
                    },
                    None => break,
                }
            }
        }
    }

    pub fn delete(&mut self, key: &CacheKey) -> bool {
        if self.entries.remove(key).is_some() {
            self.order.retain(|k| k != key);
            true
        } else {
            false
        }
    }

    pub fn purge(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    fn store_directly(&self, value: &StoredValue) -> bool {
        if self.simple_data {
            return true;
        }
        let inner = match value {
            StoredValue::Versioned { data, .. } => data.as_ref(),
            other => other,
        };
        match inner {
            StoredValue::Data(data) => crate::reference::is_scalar(data),
            StoredValue::Object(_) => true,
            _ => false,
        }
    }
}
