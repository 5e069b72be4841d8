//! The cacheable-object contract.
//!
//! A caller value may declare itself cacheable by implementing
//! [`CacheableObject`]. On write the loader replaces the object with an
//! opaque [`ObjectMarker`] carrying the object kind and captured state; on
//! read the marker is handed to the [`RestorerRegistry`], which rebuilds
//! the domain object through the restore hook registered for that kind.
//!
//! Markers are immutable by construction (private fields, read-only
//! accessors), so the acceleration tier may hold them directly without a
//! serialized copy.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CacheError, CacheResult};

/// A domain object that knows how to capture itself for caching.
pub trait CacheableObject: Send + Sync + fmt::Debug {
    /// Stable name of this object kind, used to look up the restore hook.
    fn kind(&self) -> &'static str;

    /// Captures the object state as plain data.
    fn capture(&self) -> Value;
}

/// Opaque handle stored in place of a cacheable object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMarker {
    kind: String,
    state: Value,
}

impl ObjectMarker {
    pub fn new(kind: impl Into<String>, state: Value) -> Self {
        Self {
            kind: kind.into(),
            state,
        }
    }

    /// Captures the given object into a marker.
    pub fn capture(object: &dyn CacheableObject) -> Self {
        Self::new(object.kind(), object.capture())
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn state(&self) -> &Value {
        &self.state
    }
}

/// Restore hook: captured state back to a domain object.
pub type RestoreFn = Arc<dyn Fn(&Value) -> CacheResult<Arc<dyn CacheableObject>> + Send + Sync>;

/// Registry of restore hooks, keyed by object kind.
///
/// Shared by every loader a factory creates. Restoring a marker whose kind
/// has no registered hook is an integrity failure; the loader deletes the
/// offending entry before surfacing it.
#[derive(Default)]
pub struct RestorerRegistry {
    hooks: RwLock<FxHashMap<String, RestoreFn>>,
}

impl RestorerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the restore hook for an object kind.
    pub fn register<F>(&self, kind: impl Into<String>, hook: F)
    where
        F: Fn(&Value) -> CacheResult<Arc<dyn CacheableObject>> + Send + Sync + 'static,
    {
        self.hooks.write().insert(kind.into(), Arc::new(hook));
    }

    pub fn is_registered(&self, kind: &str) -> bool {
        self.hooks.read().contains_key(kind)
    }

    /// Rebuilds the domain object a marker stands for.
    pub fn restore(&self, marker: &ObjectMarker) -> CacheResult<Arc<dyn CacheableObject>> {
        let hook = self.hooks.read().get(marker.kind()).cloned();
        match hook {
            Some(hook) => hook(marker.state()),
            None => Err(CacheError::contract(format!(
                "no restorer registered for cacheable object kind {:?}",
                marker.kind()
            ))),
        }
    }
}

impl fmt::Debug for RestorerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestorerRegistry")
            .field("kinds", &self.hooks.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

/// A value crossing the loader surface: plain data or a domain object.
#[derive(Debug, Clone)]
pub enum CachePayload {
    /// Plain data.
    Data(Value),
    /// A domain object implementing the cacheable contract.
    Object(Arc<dyn CacheableObject>),
}

impl CachePayload {
    /// Returns the plain data, if this payload is not a domain object.
    pub fn as_data(&self) -> Option<&Value> {
        match self {
            CachePayload::Data(value) => Some(value),
            CachePayload::Object(_) => None,
        }
    }

    /// Returns the domain object, if any.
    pub fn as_object(&self) -> Option<&Arc<dyn CacheableObject>> {
        match self {
            CachePayload::Object(object) => Some(object),
            CachePayload::Data(_) => None,
        }
    }
}

impl PartialEq for CachePayload {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (CachePayload::Data(a), CachePayload::Data(b)) => a == b,
            (CachePayload::Object(a), CachePayload::Object(b)) => {
                a.kind() == b.kind() && a.capture() == b.capture()
            },
            _ => false,
        }
    }
}

impl From<Value> for CachePayload {
    fn from(value: Value) -> Self {
        CachePayload::Data(value)
    }
}

impl From<Arc<dyn CacheableObject>> for CachePayload {
    fn from(object: Arc<dyn CacheableObject>) -> Self {
        CachePayload::Object(object)
    }
}
