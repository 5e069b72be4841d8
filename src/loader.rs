//! The cache loader: one link in the chain.
//!
//! A loader owns exactly one store and optionally either a next loader or
//! a data source, never both. Reads walk down the chain until a value is
//! found or the data source materialises one; writes walk down as well so
//! every tier stays consistent; deletes and purges do the same.
//!
//! ## Read path
//!
//! ```text
//!   get(key)
//!     │
//!     ├─► static acceleration ── hit ──────────────────────────► return
//!     │
//!     ├─► parse key ─► store.get
//!     │       │
//!     │       ├─ version check (self-heal on shape faults,
//!     │       │                 eager delete on stale versions)
//!     │       ├─ TTL check (delete on expiry)
//!     │       ├─ object-marker restoration
//!     │       └─ hit ─► promote to acceleration ─► unshare ────► return
//!     │
//!     └─► next loader / data source ── value ─► backfill local ► return
//!                                      └─ miss ─► strictness ──► None | error
//! ```
//!
//! ## Ordering guarantees
//!
//! Writes propagate to the next loader first, so deeper tiers always
//! reflect at least as fresh a value as this one. Backfill from a read
//! writes only the local tier; ancestors already answered for themselves.

use std::collections::BTreeMap;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use tracing::warn;

use crate::accel::StaticAccel;
use crate::clock::CacheClock;
use crate::definition::Definition;
use crate::envelope::StoredValue;
use crate::error::{CacheError, CacheResult};
use crate::invalidation::{self, EventInvalidationCache};
use crate::key::{CacheKey, ParsedKey, parse_key};
use crate::object::{CachePayload, ObjectMarker, RestorerRegistry};
use crate::reference;
use crate::source::SourceHandle;
use crate::store::traits::{Capabilities, LockState, Store, StoreMetrics};

static OWNER_SEQ: AtomicU64 = AtomicU64::new(0);

/// How a miss is reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strictness {
    /// Return the missing sentinel (`None`).
    #[default]
    IgnoreMissing,
    /// A miss is a coding error.
    MustExist,
}

/// One link in the cache chain.
///
/// A loader belongs to a single request and is never shared across
/// threads; the store behind it is process-wide.
pub struct CacheLoader {
    definition: Definition,
    store: Arc<dyn Store>,
    caps: Capabilities,
    next: Option<Box<CacheLoader>>,
    source: Option<SourceHandle>,
    accel: Option<StaticAccel>,
    clock: Arc<CacheClock>,
    restorers: Arc<RestorerRegistry>,
    event_cache: Option<Arc<EventInvalidationCache>>,
    lock_store: Option<Arc<dyn Store>>,
    lock_owner: String,
}

/// Releases an advisory write lock on every exit path.
struct LockGuard {
    store: Arc<dyn Store>,
    key: ParsedKey,
    owner: String,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(lock) = self.store.lock() {
            let _ = lock.release_lock(&self.key, &self.owner);
        }
    }
}

impl CacheLoader {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        definition: Definition,
        store: Arc<dyn Store>,
        next: Option<Box<CacheLoader>>,
        source: Option<SourceHandle>,
        is_sub_loader: bool,
        clock: Arc<CacheClock>,
        restorers: Arc<RestorerRegistry>,
        event_cache: Option<Arc<EventInvalidationCache>>,
        lock_store: Option<Arc<dyn Store>>,
    ) -> Self {
        debug_assert!(
            next.is_none() || source.is_none(),
            "a loader owns a next loader or a data source, never both"
        );
        let caps = store.capabilities();
        // Only the top of a chain accelerates.
        let accel = (definition.uses_static_acceleration() && !is_sub_loader).then(|| {
            StaticAccel::new(
                definition.static_acceleration_size(),
                definition.uses_simple_data(),
            )
        });
        let owner_seq = OWNER_SEQ.fetch_add(1, AtomicOrdering::Relaxed);
        Self {
            definition,
            store,
            caps,
            next,
            source,
            accel,
            clock,
            restorers,
            event_cache,
            lock_store,
            lock_owner: format!("{}:{owner_seq}", process::id()),
        }
    }

    pub fn definition(&self) -> &Definition {
        &self.definition
    }

    /// Capability flags of the owned store, probed once at construction.
    pub fn capabilities(&self) -> Capabilities {
        self.caps
    }

    /// Entry count of the acceleration tier, or `None` when disabled.
    pub fn acceleration_len(&self) -> Option<usize> {
        self.accel.as_ref().map(StaticAccel::len)
    }

    pub fn uses_static_acceleration(&self) -> bool {
        self.accel.is_some()
    }

    /// Activity counters of the owned store.
    pub fn store_metrics(&self) -> StoreMetrics {
        self.store.metrics()
    }

    // =========================================================================
    // Read path
    // =========================================================================

    /// Fetches a value.
    pub fn get<K: Into<CacheKey>>(
        &mut self,
        key: K,
        strictness: Strictness,
    ) -> CacheResult<Option<CachePayload>> {
        let key = key.into();
        match self.fetch_one(&key, None)? {
            Some((payload, _)) => Ok(Some(payload)),
            None => self.missing(&key, strictness).map(|()| None),
        }
    }

    /// Fetches a value at least as fresh as `required_version`, returning
    /// the actual version alongside it. Entries older than the required
    /// version are deleted eagerly and refetched from below.
    pub fn get_versioned<K: Into<CacheKey>>(
        &mut self,
        key: K,
        required_version: u64,
        strictness: Strictness,
    ) -> CacheResult<Option<(CachePayload, u64)>> {
        let key = key.into();
        match self.fetch_one(&key, Some(required_version))? {
            Some((payload, Some(version))) => Ok(Some((payload, version))),
            Some((_, None)) => Err(CacheError::contract(format!(
                "versioned read of {key} produced an unversioned value"
            ))),
            None => self.missing(&key, strictness).map(|()| None),
        }
    }

    /// Batched fetch. The result pairs every caller key, in caller order,
    /// with its outcome; remaining misses are resolved in one downstream
    /// call and backfilled individually.
    pub fn get_many(
        &mut self,
        keys: &[CacheKey],
        strictness: Strictness,
    ) -> CacheResult<Vec<(CacheKey, Option<CachePayload>)>> {
        let mut results: Vec<Option<CachePayload>> = vec![None; keys.len()];
        let mut remaining: Vec<usize> = Vec::new();

        for (i, key) in keys.iter().enumerate() {
            match self.probe_accel(key, None)? {
                Some((payload, _)) => results[i] = Some(payload),
                None => remaining.push(i),
            }
        }

        if !remaining.is_empty() {
            let parsed: Vec<ParsedKey> = remaining
                .iter()
                .map(|&i| self.parse_key(&keys[i]))
                .collect();
            let fetched = match self.store.get_many(&parsed) {
                Ok(values) => values,
                Err(err) => {
                    self.warn_read_fault("get_many", &err);
                    vec![None; parsed.len()]
                },
            };

            let mut unresolved: Vec<usize> = Vec::new();
            for ((&i, parsed_key), stored) in remaining.iter().zip(parsed.iter()).zip(fetched) {
                match stored {
                    Some(stored) => {
                        match self.open_stored(&keys[i], parsed_key, stored, None)? {
                            Some((payload, _, promote)) => {
                                if let Some(accel) = &mut self.accel {
                                    accel.set(keys[i].clone(), promote);
                                }
                                results[i] = Some(self.guard_references(payload));
                            },
                            None => unresolved.push(i),
                        }
                    },
                    None => unresolved.push(i),
                }
            }

            if !unresolved.is_empty() {
                let miss_keys: Vec<CacheKey> =
                    unresolved.iter().map(|&i| keys[i].clone()).collect();
                let resolved: Vec<Option<CachePayload>> = if let Some(next) = self.next.as_mut() {
                    next.get_many(&miss_keys, Strictness::IgnoreMissing)?
                        .into_iter()
                        .map(|(_, value)| value)
                        .collect()
                } else if let Some(source) = self.source.clone() {
                    source.as_plain().load_many_for_cache(&miss_keys)?
                } else {
                    vec![None; miss_keys.len()]
                };

                for (&i, payload) in unresolved.iter().zip(resolved) {
                    if let Some(payload) = payload {
                        self.backfill(&keys[i], payload.clone(), None)?;
                        results[i] = Some(payload);
                    }
                }
            }
        }

        if strictness == Strictness::MustExist {
            if let Some(i) = results.iter().position(Option::is_none) {
                return Err(CacheError::contract(format!(
                    "required key {} was not found in the cache",
                    keys[i]
                )));
            }
        }
        Ok(keys.iter().cloned().zip(results).collect())
    }

    fn missing(&self, key: &CacheKey, strictness: Strictness) -> CacheResult<()> {
        match strictness {
            Strictness::IgnoreMissing => Ok(()),
            Strictness::MustExist => Err(CacheError::contract(format!(
                "required key {key} was not found in the cache"
            ))),
        }
    }

    fn fetch_one(
        &mut self,
        key: &CacheKey,
        required_version: Option<u64>,
    ) -> CacheResult<Option<(CachePayload, Option<u64>)>> {
        if let Some(found) = self.probe_accel(key, required_version)? {
            return Ok(Some(found));
        }

        let parsed = self.parse_key(key);
        let stored = match self.store.get(&parsed) {
            Ok(stored) => stored,
            Err(err) => {
                self.warn_read_fault("get", &err);
                None
            },
        };
        if let Some(stored) = stored {
            if let Some((payload, version, promote)) =
                self.open_stored(key, &parsed, stored, required_version)?
            {
                if let Some(accel) = &mut self.accel {
                    accel.set(key.clone(), promote);
                }
                return Ok(Some((self.guard_references(payload), version)));
            }
        }

        // Chain fallback gets the unparsed key so it can reparse with its
        // own store's conventions.
        if let Some(next) = self.next.as_mut() {
            if let Some((payload, version)) = next.fetch_one(key, required_version)? {
                self.backfill(key, payload.clone(), version)?;
                return Ok(Some((payload, version)));
            }
        } else if let Some(source) = self.source.clone() {
            match required_version {
                None => {
                    if let Some(payload) = source.as_plain().load_for_cache(key)? {
                        self.backfill(key, payload.clone(), None)?;
                        return Ok(Some((payload, None)));
                    }
                },
                Some(required) => {
                    let versioned = source.as_versioned().ok_or_else(|| {
                        CacheError::contract(format!(
                            "versioned read of {key} against a data source that is not versionable"
                        ))
                    })?;
                    if let Some((payload, actual)) =
                        versioned.load_for_cache_versioned(key, required)?
                    {
                        if actual < required {
                            return Err(CacheError::contract(format!(
                                "data source returned version {actual} for {key}, \
                                 older than the required {required}"
                            )));
                        }
                        self.backfill(key, payload.clone(), Some(actual))?;
                        return Ok(Some((payload, Some(actual))));
                    }
                },
            }
        }

        Ok(None)
    }

    /// Acceleration probe. Entries here carry no TTL wrapper; version
    /// wrappers are re-checked on every read. Anything the tier cannot
    /// return (a version that no longer satisfies the requirement, a
    /// wrapper shape that mismatches the request, a payload that fails to
    /// open) falls through to the store path, which owns the eager
    /// delete, the contract errors, and the two-tier self-heal.
    fn probe_accel(
        &mut self,
        key: &CacheKey,
        required_version: Option<u64>,
    ) -> CacheResult<Option<(CachePayload, Option<u64>)>> {
        let stored = match self.accel.as_mut() {
            Some(accel) => accel.get(key),
            None => return Ok(None),
        };
        let Some(stored) = stored else {
            return Ok(None);
        };
        let (version, inner) = stored.split_version();
        match (required_version, version) {
            (None, None) => {},
            (None, Some(_)) => return Ok(None),
            (Some(required), Some(found)) if found >= required => {},
            (Some(_), _) => return Ok(None),
        }
        match self.open_inner(key, inner) {
            Ok(payload) => Ok(Some((payload, version))),
            Err(_) => {
                if let Some(accel) = &mut self.accel {
                    accel.delete(key);
                }
                Ok(None)
            },
        }
    }

    /// Validates and unwraps a store envelope. Returns the payload, its
    /// version, and the TTL-stripped value to promote into acceleration;
    /// `None` means the entry was dropped (stale version or expired TTL).
    fn open_stored(
        &mut self,
        key: &CacheKey,
        parsed: &ParsedKey,
        stored: StoredValue,
        required_version: Option<u64>,
    ) -> CacheResult<Option<(CachePayload, Option<u64>, StoredValue)>> {
        let (version, rest) = stored.split_version();
        match (required_version, version) {
            (None, Some(_)) => {
                self.self_heal(key, parsed);
                return Err(CacheError::contract(format!(
                    "entry for {key} is version-wrapped; use get_versioned"
                )));
            },
            (Some(_), None) => {
                self.self_heal(key, parsed);
                return Err(CacheError::contract(format!(
                    "entry for {key} is not version-wrapped; this cache is not versioned"
                )));
            },
            (Some(required), Some(found)) if found < required => {
                // Delete now so concurrent readers stop refetching a
                // large stale payload.
                let _ = self.store.delete(parsed);
                return Ok(None);
            },
            _ => {},
        }

        if rest.is_expired_at(self.clock.now_secs()) {
            let _ = self.store.delete(parsed);
            return Ok(None);
        }
        let (_, inner) = rest.split_ttl();

        let promote = StoredValue::compose(inner.clone(), None, version);
        match self.open_inner(key, inner) {
            Ok(payload) => Ok(Some((payload, version, promote))),
            Err(err) => {
                self.self_heal(key, parsed);
                Err(err)
            },
        }
    }

    /// Turns an innermost envelope into a caller payload.
    fn open_inner(&self, key: &CacheKey, inner: StoredValue) -> CacheResult<CachePayload> {
        match inner {
            StoredValue::Data(value) => Ok(CachePayload::Data(value)),
            StoredValue::Object(marker) => match self.restorers.restore(&marker) {
                Ok(object) => Ok(CachePayload::Object(object)),
                Err(err) => Err(CacheError::Integrity {
                    key: key.to_string(),
                    detail: err.to_string(),
                }),
            },
            StoredValue::Ttl { .. } | StoredValue::Versioned { .. } => Err(CacheError::Integrity {
                key: key.to_string(),
                detail: "nested envelope wrappers".to_string(),
            }),
        }
    }

    fn self_heal(&mut self, key: &CacheKey, parsed: &ParsedKey) {
        if let Some(accel) = &mut self.accel {
            accel.delete(key);
        }
        let _ = self.store.delete(parsed);
    }

    fn guard_references(&self, payload: CachePayload) -> CachePayload {
        if self.caps.dereferences_objects || self.definition.uses_simple_data() {
            return payload;
        }
        match payload {
            CachePayload::Data(value) if !reference::is_scalar(&value) => {
                CachePayload::Data(reference::unshare(&value))
            },
            other => other,
        }
    }

    // =========================================================================
    // Write path
    // =========================================================================

    /// Writes a value through the chain. Deeper tiers are written first so
    /// they always reflect at least as fresh a value as this one.
    pub fn set<K, P>(&mut self, key: K, payload: P) -> CacheResult<bool>
    where
        K: Into<CacheKey>,
        P: Into<CachePayload>,
    {
        self.set_impl(&key.into(), payload.into(), None)
    }

    /// Writes a version-tagged value through the chain.
    pub fn set_versioned<K, P>(&mut self, key: K, version: u64, payload: P) -> CacheResult<bool>
    where
        K: Into<CacheKey>,
        P: Into<CachePayload>,
    {
        self.set_impl(&key.into(), payload.into(), Some(version))
    }

    fn set_impl(
        &mut self,
        key: &CacheKey,
        payload: CachePayload,
        version: Option<u64>,
    ) -> CacheResult<bool> {
        if let Some(next) = self.next.as_mut() {
            next.set_impl(key, payload.clone(), version)?;
        }
        let parsed = self.parse_key(key);
        self.write_local(key, &parsed, payload, version)
    }

    /// Batched write; the store call is batched too. Returns how many
    /// entries the local store accepted.
    pub fn set_many(&mut self, entries: Vec<(CacheKey, CachePayload)>) -> CacheResult<usize> {
        if let Some(next) = self.next.as_mut() {
            next.set_many(entries.clone())?;
        }
        let expiry = self.ttl_expiry();
        let mut batch = Vec::with_capacity(entries.len());
        for (key, payload) in entries {
            let inner = Self::capture_payload(&payload);
            if let Some(accel) = &mut self.accel {
                accel.set(key.clone(), StoredValue::compose(inner.clone(), None, None));
            }
            let parsed = self.parse_key(&key);
            batch.push((parsed, StoredValue::compose(inner, expiry, None)));
        }
        match self.store.set_many(batch) {
            Ok(written) => Ok(written),
            Err(err) => {
                self.warn_write_fault("set_many", &err);
                Ok(0)
            },
        }
    }

    fn capture_payload(payload: &CachePayload) -> StoredValue {
        match payload {
            CachePayload::Data(value) => StoredValue::Data(value.clone()),
            CachePayload::Object(object) => {
                StoredValue::Object(ObjectMarker::capture(object.as_ref()))
            },
        }
    }

    fn ttl_expiry(&self) -> Option<u64> {
        (self.definition.ttl_secs() > 0 && !self.caps.native_ttl)
            .then(|| self.clock.now_secs() + self.definition.ttl_secs())
    }

    /// Writes to this tier only: acceleration (TTL-free, version kept) and
    /// the owned store.
    fn write_local(
        &mut self,
        key: &CacheKey,
        parsed: &ParsedKey,
        payload: CachePayload,
        version: Option<u64>,
    ) -> CacheResult<bool> {
        let inner = Self::capture_payload(&payload);
        if let Some(accel) = &mut self.accel {
            accel.set(key.clone(), StoredValue::compose(inner.clone(), None, version));
        }
        let stored = StoredValue::compose(inner, self.ttl_expiry(), version);
        match self.store.set(parsed, stored) {
            Ok(applied) => Ok(applied),
            Err(err) => {
                self.warn_write_fault("set", &err);
                Ok(false)
            },
        }
    }

    /// Writes a fallback-produced value into the local tier, honoring the
    /// locking discipline. A contended lock skips the write; the caller
    /// still gets the value.
    fn backfill(
        &mut self,
        key: &CacheKey,
        payload: CachePayload,
        version: Option<u64>,
    ) -> CacheResult<()> {
        let parsed = self.parse_key(key);
        let mut guard = None;
        if self.definition.requires_locking() {
            let holder = self.locking_store().ok_or_else(|| {
                CacheError::contract(
                    "definition requires locking before writes but no lockable store is configured",
                )
            })?;
            let state = match holder.lock() {
                Some(lock) => lock.check_lock_state(&parsed, &self.lock_owner)?,
                None => LockState::NotHeld,
            };
            match state {
                LockState::Held => {},
                LockState::NotHeld | LockState::HeldByOther => {
                    let acquired = match holder.lock() {
                        Some(lock) => lock.acquire_lock(&parsed, &self.lock_owner)?,
                        None => false,
                    };
                    if !acquired {
                        return Ok(());
                    }
                    guard = Some(LockGuard {
                        store: Arc::clone(&holder),
                        key: parsed.clone(),
                        owner: self.lock_owner.clone(),
                    });
                },
            }
        }
        let result = self.write_local(key, &parsed, payload, version);
        drop(guard);
        result.map(|_| ())
    }

    fn locking_store(&self) -> Option<Arc<dyn Store>> {
        if self.caps.lockable {
            return Some(Arc::clone(&self.store));
        }
        self.lock_store
            .as_ref()
            .filter(|store| store.capabilities().lockable)
            .map(Arc::clone)
    }

    // =========================================================================
    // Membership
    // =========================================================================

    /// Whether a key is present in this tier.
    ///
    /// With a TTL on a store lacking native TTL support, or a store that
    /// is not key-aware, membership has to evaluate the entry, otherwise
    /// expired entries would count.
    pub fn has<K: Into<CacheKey>>(&mut self, key: K) -> CacheResult<bool> {
        let key = key.into();
        if let Some(accel) = &self.accel {
            if accel.has(&key) {
                return Ok(true);
            }
        }
        if self.must_evaluate_membership() {
            return Ok(self.fetch_one(&key, None)?.is_some());
        }
        let parsed = self.parse_key(&key);
        match self.store.has(&parsed) {
            Ok(present) => Ok(present),
            Err(err) => {
                self.warn_read_fault("has", &err);
                Ok(false)
            },
        }
    }

    /// Whether every key is present in this tier.
    pub fn has_all(&mut self, keys: &[CacheKey]) -> CacheResult<bool> {
        if self.must_evaluate_membership() {
            for key in keys {
                if !self.has(key.clone())? {
                    return Ok(false);
                }
            }
            return Ok(true);
        }
        let parsed = self.membership_remainder(keys);
        match self.store.has_all(&parsed) {
            Ok(present) => Ok(present),
            Err(err) => {
                self.warn_read_fault("has_all", &err);
                Ok(false)
            },
        }
    }

    /// Whether any key is present in this tier.
    pub fn has_any(&mut self, keys: &[CacheKey]) -> CacheResult<bool> {
        if self.must_evaluate_membership() {
            for key in keys {
                if self.has(key.clone())? {
                    return Ok(true);
                }
            }
            return Ok(false);
        }
        if let Some(accel) = &self.accel {
            if keys.iter().any(|key| accel.has(key)) {
                return Ok(true);
            }
        }
        let parsed: Vec<ParsedKey> = keys.iter().map(|key| self.parse_key(key)).collect();
        match self.store.has_any(&parsed) {
            Ok(present) => Ok(present),
            Err(err) => {
                self.warn_read_fault("has_any", &err);
                Ok(false)
            },
        }
    }

    fn must_evaluate_membership(&self) -> bool {
        (self.definition.ttl_secs() > 0 && !self.caps.native_ttl) || !self.caps.key_aware
    }

    /// Parsed keys for the keys not already answered by acceleration.
    fn membership_remainder(&self, keys: &[CacheKey]) -> Vec<ParsedKey> {
        keys.iter()
            .filter(|key| match &self.accel {
                Some(accel) => !accel.has(key),
                None => true,
            })
            .map(|key| self.parse_key(key))
            .collect()
    }

    // =========================================================================
    // Delete & purge
    // =========================================================================

    /// Removes a key from this tier and, with `recurse`, from every tier
    /// below first.
    pub fn delete<K: Into<CacheKey>>(&mut self, key: K, recurse: bool) -> CacheResult<bool> {
        let key = key.into();
        if let Some(accel) = &mut self.accel {
            accel.delete(&key);
        }
        if recurse {
            if let Some(next) = self.next.as_mut() {
                next.delete(key.clone(), true)?;
            }
        }
        let parsed = self.parse_key(&key);
        match self.store.delete(&parsed) {
            Ok(removed) => Ok(removed),
            Err(err) => {
                self.warn_write_fault("delete", &err);
                Ok(false)
            },
        }
    }

    /// Batched removal; the store call is batched. Returns how many
    /// entries the local store removed.
    pub fn delete_many(&mut self, keys: &[CacheKey], recurse: bool) -> CacheResult<usize> {
        if let Some(accel) = &mut self.accel {
            for key in keys {
                accel.delete(key);
            }
        }
        if recurse {
            if let Some(next) = self.next.as_mut() {
                next.delete_many(keys, true)?;
            }
        }
        let parsed: Vec<ParsedKey> = keys.iter().map(|key| self.parse_key(key)).collect();
        match self.store.delete_many(&parsed) {
            Ok(removed) => Ok(removed),
            Err(err) => {
                self.warn_write_fault("delete_many", &err);
                Ok(0)
            },
        }
    }

    /// Empties this tier and every tier below.
    pub fn purge(&mut self) -> CacheResult<bool> {
        if let Some(accel) = &mut self.accel {
            accel.purge();
        }
        let local = match self.store.purge() {
            Ok(()) => true,
            Err(err) => {
                self.warn_write_fault("purge", &err);
                false
            },
        };
        let below = match self.next.as_mut() {
            Some(next) => next.purge()?,
            None => true,
        };
        Ok(local && below)
    }

    // =========================================================================
    // Identifiers & invalidation
    // =========================================================================

    /// Replaces the definition identifiers, chain-wide. A change moves the
    /// parsed-key space, so the acceleration tier is emptied.
    pub fn set_identifiers(&mut self, identifiers: BTreeMap<String, String>) -> bool {
        if let Some(next) = self.next.as_mut() {
            next.set_identifiers(identifiers.clone());
        }
        let changed = self.definition.set_identifiers(identifiers);
        if changed {
            if let Some(accel) = &mut self.accel {
                accel.purge();
            }
        }
        changed
    }

    /// Processes pending invalidation events for this cache. Returns
    /// whether any entry was invalidated.
    pub fn handle_invalidation_events(&mut self) -> CacheResult<bool> {
        invalidation::process(self)
    }

    // =========================================================================
    // Crate-internal plumbing
    // =========================================================================

    pub(crate) fn parse_key(&self, key: &CacheKey) -> ParsedKey {
        parse_key(&self.definition, key, self.caps.multiple_identifiers)
    }

    pub(crate) fn store_arc(&self) -> Arc<dyn Store> {
        Arc::clone(&self.store)
    }

    pub(crate) fn clock_arc(&self) -> Arc<CacheClock> {
        Arc::clone(&self.clock)
    }

    pub(crate) fn event_cache(&self) -> Option<Arc<EventInvalidationCache>> {
        self.event_cache.clone()
    }

    fn warn_read_fault(&self, op: &'static str, err: &crate::error::StoreError) {
        warn!(
            component = self.definition.component(),
            area = self.definition.area(),
            op,
            error = %err,
            "store read failed; treating as miss"
        );
    }

    fn warn_write_fault(&self, op: &'static str, err: &crate::error::StoreError) {
        warn!(
            component = self.definition.component(),
            area = self.definition.area(),
            op,
            error = %err,
            "store write failed"
        );
    }
}

impl std::fmt::Debug for CacheLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheLoader")
            .field("component", &self.definition.component())
            .field("area", &self.definition.area())
            .field("capabilities", &self.caps)
            .field("accelerated", &self.accel.is_some())
            .field("chained", &self.next.is_some())
            .field("sourced", &self.source.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::factory::CacheFactory;
    use crate::store::memory::MemoryStore;

    fn factory() -> CacheFactory {
        CacheFactory::new()
    }

    fn single_loader(definition: Definition) -> CacheLoader {
        factory()
            .create_loader(definition, vec![Arc::new(MemoryStore::new())])
            .expect("loader")
    }

    #[test]
    fn set_then_get_round_trips() {
        let mut loader = single_loader(Definition::new("core", "string"));
        assert!(loader.set("greeting", json!("hello")).unwrap());
        assert_eq!(
            loader.get("greeting", Strictness::IgnoreMissing).unwrap(),
            Some(CachePayload::Data(json!("hello")))
        );
    }

    #[test]
    fn must_exist_on_miss_is_a_contract_error() {
        let mut loader = single_loader(Definition::new("core", "string"));
        let err = loader.get("absent", Strictness::MustExist).unwrap_err();
        assert!(matches!(err, CacheError::Contract(_)));
    }

    #[test]
    fn plain_get_on_versioned_entry_self_heals() {
        let mut loader = single_loader(Definition::new("core", "config"));
        assert!(loader.set_versioned("k", 2, json!("v")).unwrap());

        let err = loader.get("k", Strictness::IgnoreMissing).unwrap_err();
        assert!(matches!(err, CacheError::Contract(_)));

        // The offending entry was removed, so the next plain write works.
        assert!(loader.set("k", json!("w")).unwrap());
        assert_eq!(
            loader.get("k", Strictness::IgnoreMissing).unwrap(),
            Some(CachePayload::Data(json!("w")))
        );
    }

    #[test]
    fn plain_get_on_accelerated_versioned_entry_self_heals() {
        let definition = Definition::new("core", "config").static_acceleration(Some(4));
        let mut loader = single_loader(definition);
        assert!(loader.set_versioned("k", 2, json!("v")).unwrap());
        assert_eq!(loader.acceleration_len(), Some(1));

        // The accelerated copy must not mask the version-mixing error.
        let err = loader.get("k", Strictness::IgnoreMissing).unwrap_err();
        assert!(matches!(err, CacheError::Contract(_)));

        // Both tiers were healed.
        assert_eq!(loader.acceleration_len(), Some(0));
        assert!(!loader.has("k").unwrap());
    }

    #[test]
    fn versioned_get_on_plain_entry_self_heals() {
        let mut loader = single_loader(Definition::new("core", "config"));
        assert!(loader.set("k", json!("v")).unwrap());

        let err = loader
            .get_versioned("k", 1, Strictness::IgnoreMissing)
            .unwrap_err();
        assert!(matches!(err, CacheError::Contract(_)));
        assert!(!loader.has("k").unwrap());
    }

    #[test]
    fn stale_version_is_deleted_and_reported_missing() {
        let mut loader = single_loader(Definition::new("core", "config"));
        assert!(loader.set_versioned("k", 3, json!("old")).unwrap());

        assert_eq!(
            loader
                .get_versioned("k", 5, Strictness::IgnoreMissing)
                .unwrap(),
            None
        );
        assert!(!loader.has("k").unwrap());
    }

    #[test]
    fn fresh_enough_version_is_returned() {
        let mut loader = single_loader(Definition::new("core", "config"));
        assert!(loader.set_versioned("k", 5, json!("v5")).unwrap());

        let (payload, version) = loader
            .get_versioned("k", 3, Strictness::IgnoreMissing)
            .unwrap()
            .expect("hit");
        assert_eq!(payload, CachePayload::Data(json!("v5")));
        assert_eq!(version, 5);
    }

    #[test]
    fn get_many_preserves_caller_key_order() {
        let mut loader = single_loader(Definition::new("core", "string"));
        loader.set("a", json!(1)).unwrap();
        loader.set("c", json!(3)).unwrap();

        let keys = [
            CacheKey::from("a"),
            CacheKey::from("b"),
            CacheKey::from("c"),
        ];
        let results = loader.get_many(&keys, Strictness::IgnoreMissing).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0], (CacheKey::from("a"), Some(CachePayload::Data(json!(1)))));
        assert_eq!(results[1], (CacheKey::from("b"), None));
        assert_eq!(results[2], (CacheKey::from("c"), Some(CachePayload::Data(json!(3)))));
    }

    #[test]
    fn delete_and_purge_empty_the_tier() {
        let mut loader = single_loader(Definition::new("core", "string"));
        loader.set("a", json!(1)).unwrap();
        loader.set("b", json!(2)).unwrap();

        assert!(loader.delete("a", true).unwrap());
        assert!(!loader.has("a").unwrap());

        assert!(loader.purge().unwrap());
        assert!(!loader.has("b").unwrap());
    }

    #[test]
    fn identifier_change_purges_acceleration() {
        let definition = Definition::new("core", "coursemodinfo").static_acceleration(Some(8));
        let mut loader = single_loader(definition);
        loader.set("k", json!(1)).unwrap();
        assert_eq!(loader.acceleration_len(), Some(1));

        let mut identifiers = BTreeMap::new();
        identifiers.insert("course".to_string(), "2".to_string());
        assert!(loader.set_identifiers(identifiers));
        assert_eq!(loader.acceleration_len(), Some(0));
    }

    #[test]
    fn unchanged_identifiers_keep_acceleration() {
        let definition = Definition::new("core", "coursemodinfo").static_acceleration(Some(8));
        let mut loader = single_loader(definition);
        loader.set("k", json!(1)).unwrap();

        assert!(!loader.set_identifiers(BTreeMap::new()));
        assert_eq!(loader.acceleration_len(), Some(1));
    }
}
