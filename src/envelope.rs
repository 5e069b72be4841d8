//! Value envelopes: what actually sits inside a store.
//!
//! A stored entry is the caller payload wrapped, innermost to outermost:
//!
//! 1. [`StoredValue::Object`] if the value is a cacheable object;
//! 2. [`StoredValue::Ttl`] if the cache has a TTL and the store does not
//!    support TTL natively;
//! 3. [`StoredValue::Versioned`] if a version was supplied; always the
//!    outermost wrapper of the two.
//!
//! Readers unwrap in reverse order. At most one TTL and one version
//! wrapper ever surround an entry; a shape that violates this is an
//! integrity fault and gets self-healed by the loader.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::object::ObjectMarker;

/// An envelope as held by a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoredValue {
    /// Raw caller data.
    Data(Value),
    /// Marker standing in for a cacheable domain object.
    Object(ObjectMarker),
    /// TTL-wrapped payload; `expiry` is an absolute instant in seconds.
    Ttl { data: Box<StoredValue>, expiry: u64 },
    /// Version-tagged payload.
    Versioned { data: Box<StoredValue>, version: u64 },
}

impl StoredValue {
    /// Wraps an inner payload (data or object marker) per the composition
    /// rule. `expiry` is the absolute expiry instant, already computed as
    /// `now + ttl` by the writer.
    pub fn compose(inner: StoredValue, expiry: Option<u64>, version: Option<u64>) -> StoredValue {
        let mut value = inner;
        if let Some(expiry) = expiry {
            value = StoredValue::Ttl {
                data: Box::new(value),
                expiry,
            };
        }
        if let Some(version) = version {
            value = StoredValue::Versioned {
                data: Box::new(value),
                version,
            };
        }
        value
    }

    /// Removes the outermost version wrapper, if any.
    pub fn split_version(self) -> (Option<u64>, StoredValue) {
        match self {
            StoredValue::Versioned { data, version } => (Some(version), *data),
            other => (None, other),
        }
    }

    /// Removes a TTL wrapper, if any, exposing its expiry instant.
    pub fn split_ttl(self) -> (Option<u64>, StoredValue) {
        match self {
            StoredValue::Ttl { data, expiry } => (Some(expiry), *data),
            other => (None, other),
        }
    }

    /// Whether the outermost wrapper is a version tag.
    pub fn is_versioned(&self) -> bool {
        matches!(self, StoredValue::Versioned { .. })
    }

    /// Version on the outermost wrapper, if any.
    pub fn version(&self) -> Option<u64> {
        match self {
            StoredValue::Versioned { version, .. } => Some(*version),
            _ => None,
        }
    }

    /// Whether a TTL wrapper has expired at the given instant.
    ///
    /// Has-expired is `now >= expiry`; values without a TTL wrapper never
    /// expire here (native-TTL stores expire entries themselves).
    pub fn is_expired_at(&self, now_secs: u64) -> bool {
        match self {
            StoredValue::Ttl { expiry, .. } => now_secs >= *expiry,
            StoredValue::Versioned { data, .. } => data.is_expired_at(now_secs),
            _ => false,
        }
    }
}
