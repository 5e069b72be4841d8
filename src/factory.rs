//! Loader-chain construction.
//!
//! The factory owns everything loaders share: the process clock, the
//! restorer registry, the well-known event-invalidation cache, and an
//! optional secondary lock store. `create_loader` turns a definition plus
//! an ordered store list into a chain with the first store on top and
//! every deeper loader flagged as a sub-loader (which disables its
//! acceleration tier), then runs the first invalidation pass for
//! subscribed definitions.

use std::sync::Arc;

use serde_json::Value;

use crate::clock::CacheClock;
use crate::definition::Definition;
use crate::error::{CacheError, CacheResult};
use crate::invalidation::EventInvalidationCache;
use crate::loader::CacheLoader;
use crate::object::{CacheableObject, RestorerRegistry};
use crate::source::SourceHandle;
use crate::store::memory::MemoryStore;
use crate::store::traits::Store;

/// Builds loader chains over shared process services.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use cachefront::definition::Definition;
/// use cachefront::factory::CacheFactory;
/// use cachefront::loader::Strictness;
/// use cachefront::object::CachePayload;
/// use cachefront::store::memory::MemoryStore;
/// use serde_json::json;
///
/// let factory = CacheFactory::new();
/// let mut cache = factory
///     .create_loader(
///         Definition::new("core", "string"),
///         vec![Arc::new(MemoryStore::new())],
///     )
///     .unwrap();
///
/// cache.set("greeting", json!("hello")).unwrap();
/// assert_eq!(
///     cache.get("greeting", Strictness::IgnoreMissing).unwrap(),
///     Some(CachePayload::Data(json!("hello")))
/// );
/// ```
pub struct CacheFactory {
    clock: Arc<CacheClock>,
    restorers: Arc<RestorerRegistry>,
    event_cache: Arc<EventInvalidationCache>,
    lock_store: Option<Arc<dyn Store>>,
}

impl CacheFactory {
    /// Factory over the system clock and a fresh in-memory event cache.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(CacheClock::system()))
    }

    /// Factory over an explicit clock (tests drive time through this).
    pub fn with_clock(clock: Arc<CacheClock>) -> Self {
        let event_store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        Self {
            event_cache: Arc::new(EventInvalidationCache::new(
                event_store,
                Arc::clone(&clock),
            )),
            clock,
            restorers: Arc::new(RestorerRegistry::new()),
            lock_store: None,
        }
    }

    /// Replaces the store behind the well-known event cache. Use a shared
    /// store here for invalidation to cross process boundaries.
    pub fn with_event_store(mut self, store: Arc<dyn Store>) -> Self {
        self.event_cache = Arc::new(EventInvalidationCache::new(store, Arc::clone(&self.clock)));
        self
    }

    /// Sets the secondary lock store consulted when a definition requires
    /// locking but the owned store is not lockable.
    pub fn with_lock_store(mut self, store: Arc<dyn Store>) -> Self {
        self.lock_store = Some(store);
        self
    }

    pub fn clock(&self) -> &Arc<CacheClock> {
        &self.clock
    }

    pub fn event_cache(&self) -> Arc<EventInvalidationCache> {
        Arc::clone(&self.event_cache)
    }

    pub fn restorers(&self) -> &Arc<RestorerRegistry> {
        &self.restorers
    }

    /// Registers a restore hook for a cacheable-object kind.
    pub fn register_restorer<F>(&self, kind: impl Into<String>, hook: F)
    where
        F: Fn(&Value) -> CacheResult<Arc<dyn CacheableObject>> + Send + Sync + 'static,
    {
        self.restorers.register(kind, hook);
    }

    /// Builds a chain from an ordered store list: first store on top.
    pub fn create_loader(
        &self,
        definition: Definition,
        stores: Vec<Arc<dyn Store>>,
    ) -> CacheResult<CacheLoader> {
        self.create(definition, stores, None)
    }

    /// Builds a chain whose innermost loader falls back to a data source.
    pub fn create_loader_with_source(
        &self,
        definition: Definition,
        stores: Vec<Arc<dyn Store>>,
        source: SourceHandle,
    ) -> CacheResult<CacheLoader> {
        self.create(definition, stores, Some(source))
    }

    fn create(
        &self,
        definition: Definition,
        mut stores: Vec<Arc<dyn Store>>,
        source: Option<SourceHandle>,
    ) -> CacheResult<CacheLoader> {
        let bottom_store = stores
            .pop()
            .ok_or_else(|| CacheError::contract("a loader chain needs at least one store"))?;

        let event_cache = (!definition.subscribed_events().is_empty())
            .then(|| Arc::clone(&self.event_cache));

        let mut loader = CacheLoader::new(
            definition.clone(),
            bottom_store,
            None,
            source,
            !stores.is_empty(),
            Arc::clone(&self.clock),
            Arc::clone(&self.restorers),
            event_cache.clone(),
            self.lock_store.clone(),
        );
        for (idx, store) in stores.into_iter().enumerate().rev() {
            loader = CacheLoader::new(
                definition.clone(),
                store,
                Some(Box::new(loader)),
                None,
                idx > 0,
                Arc::clone(&self.clock),
                Arc::clone(&self.restorers),
                event_cache.clone(),
                self.lock_store.clone(),
            );
        }

        loader.handle_invalidation_events()?;
        Ok(loader)
    }
}

impl Default for CacheFactory {
    fn default() -> Self {
        Self::new()
    }
}
