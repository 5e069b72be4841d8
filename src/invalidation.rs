//! Event-driven invalidation.
//!
//! A well-known cache (`core/eventinvalidation`) stores one record per
//! event name: a mapping of caller keys to purge tokens, with the
//! distinguished key `"purged"` meaning the whole cache was purged at
//! that token. Each subscribed loader keeps its own `lastinvalidation`
//! token inside its own store and, on initialisation or on demand,
//! deletes every key whose recorded token is strictly newer.
//!
//! Tokens with an equal microsecond prefix but a different suffix are
//! concurrent: they are not strictly newer, and nothing is invalidated
//! for them. That tolerates the race where another process cleared the
//! cache during this request.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::clock::CacheClock;
use crate::definition::Definition;
use crate::envelope::StoredValue;
use crate::error::CacheResult;
use crate::key::{CacheKey, ParsedKey, parse_key};
use crate::loader::CacheLoader;
use crate::store::traits::Store;

/// Component of the well-known event cache.
pub const EVENT_COMPONENT: &str = "core";
/// Area of the well-known event cache.
pub const EVENT_AREA: &str = "eventinvalidation";
/// Record key meaning "the whole cache was purged at this token".
pub const PURGED_KEY: &str = "purged";

/// Reserved key under which a loader keeps its own last-seen token.
const LAST_INVALIDATION_KEY: &str = "lastinvalidation";

/// The well-known cache holding invalidation records.
///
/// Addressed directly over the store contract: records are plain JSON
/// maps, one per event name, written by [`invalidate_by_event`] and
/// [`purge_by_event`] and read by the engine.
///
/// [`invalidate_by_event`]: EventInvalidationCache::invalidate_by_event
/// [`purge_by_event`]: EventInvalidationCache::purge_by_event
pub struct EventInvalidationCache {
    definition: Definition,
    store: Arc<dyn Store>,
    multi_identifier: bool,
    clock: Arc<CacheClock>,
}

impl EventInvalidationCache {
    pub fn new(store: Arc<dyn Store>, clock: Arc<CacheClock>) -> Self {
        let multi_identifier = store.capabilities().multiple_identifiers;
        Self {
            definition: Definition::new(EVENT_COMPONENT, EVENT_AREA).simple_data(true),
            store,
            multi_identifier,
            clock,
        }
    }

    fn event_key(&self, event: &str) -> ParsedKey {
        parse_key(
            &self.definition,
            &CacheKey::from(event),
            self.multi_identifier,
        )
    }

    /// The invalidation record for an event: caller key → purge token.
    pub fn record(&self, event: &str) -> Option<BTreeMap<String, String>> {
        match self.store.get(&self.event_key(event)) {
            Ok(Some(StoredValue::Data(value))) => serde_json::from_value(value).ok(),
            Ok(_) => None,
            Err(err) => {
                warn!(event, error = %err, "event cache read failed; skipping event");
                None
            },
        }
    }

    fn write_record(&self, event: &str, record: &BTreeMap<String, String>) -> CacheResult<()> {
        let value = serde_json::to_value(record).map_err(crate::error::StoreError::from)?;
        self.store
            .set(&self.event_key(event), StoredValue::Data(value))?;
        Ok(())
    }

    /// Records that the given keys became stale for an event. Every
    /// subscribed cache deletes them on its next invalidation pass.
    /// Returns the token the keys were stamped with.
    pub fn invalidate_by_event(&self, event: &str, keys: &[CacheKey]) -> CacheResult<String> {
        let token = self.clock.purge_token(true);
        let mut record = self.record(event).unwrap_or_default();
        for key in keys {
            record.insert(key.to_string(), token.clone());
        }
        self.write_record(event, &record)?;
        debug!(event, keys = keys.len(), %token, "recorded key invalidation");
        Ok(token)
    }

    /// Records that every cache subscribed to the event was purged.
    /// Replaces the record: a whole-cache purge supersedes per-key marks.
    pub fn purge_by_event(&self, event: &str) -> CacheResult<String> {
        let token = self.clock.purge_token(true);
        let mut record = BTreeMap::new();
        record.insert(PURGED_KEY.to_string(), token.clone());
        self.write_record(event, &record)?;
        debug!(event, %token, "recorded whole-cache purge");
        Ok(token)
    }
}

/// Runs the invalidation pass for one loader.
///
/// Read-your-writes within a request: once processed, `lastinvalidation`
/// matches the current purge token and later passes return immediately.
pub(crate) fn process(loader: &mut CacheLoader) -> CacheResult<bool> {
    let Some(event_cache) = loader.event_cache() else {
        return Ok(false);
    };
    let events = loader.definition().subscribed_events().to_vec();
    if events.is_empty() {
        return Ok(false);
    }

    let clock = loader.clock_arc();
    let store = loader.store_arc();
    let last_key = loader.parse_key(&CacheKey::from(LAST_INVALIDATION_KEY));
    let current = clock.purge_token(false);

    let last = match store.get(&last_key) {
        Ok(Some(StoredValue::Data(Value::String(token)))) => Some(token),
        Ok(_) => None,
        Err(err) => {
            warn!(error = %err, "could not read lastinvalidation; treating cache as fresh");
            None
        },
    };
    let Some(last) = last else {
        // A fresh cache has nothing to invalidate; remember where we are.
        let _ = store.set(&last_key, StoredValue::Data(Value::String(current)));
        return Ok(false);
    };
    if last == current {
        return Ok(false);
    }

    let mut purge_all = false;
    let mut stale_keys: Vec<CacheKey> = Vec::new();
    for event in &events {
        let Some(record) = event_cache.record(event) else {
            continue;
        };
        for (key, token) in record {
            if CacheClock::compare(&token, &last) == Ordering::Greater {
                if key == PURGED_KEY {
                    purge_all = true;
                } else {
                    stale_keys.push(CacheKey::Str(key));
                }
            }
        }
    }

    if !purge_all && stale_keys.is_empty() {
        return Ok(false);
    }

    if purge_all {
        debug!(
            component = loader.definition().component(),
            area = loader.definition().area(),
            "event invalidation purging whole cache"
        );
        loader.purge()?;
    } else {
        stale_keys.sort();
        stale_keys.dedup();
        debug!(
            component = loader.definition().component(),
            area = loader.definition().area(),
            keys = stale_keys.len(),
            "event invalidation deleting stale keys"
        );
        loader.delete_many(&stale_keys, true)?;
    }

    let fresh = clock.purge_token(true);
    let _ = store.set(&last_key, StoredValue::Data(Value::String(fresh)));
    Ok(true)
}
