//! Data-source contracts: the terminal producers behind a chain.
//!
//! When every tier misses, the innermost loader asks its data source to
//! materialise a value. Sources come in two strengths: plain loading, and
//! versioned loading for caches whose entries carry version tags.

use std::sync::Arc;

use crate::error::CacheResult;
use crate::key::CacheKey;
use crate::object::CachePayload;

/// Terminal producer of values for a cache.
pub trait DataSource: Send + Sync {
    /// Loads the value for a key, or `None` if the source has nothing.
    fn load_for_cache(&self, key: &CacheKey) -> CacheResult<Option<CachePayload>>;

    /// Batched load; the result aligns with `keys`.
    fn load_many_for_cache(&self, keys: &[CacheKey]) -> CacheResult<Vec<Option<CachePayload>>> {
        keys.iter().map(|key| self.load_for_cache(key)).collect()
    }
}

/// A data source that can answer versioned reads.
pub trait VersionedDataSource: DataSource {
    /// Loads a value at least as fresh as `required_version`, returning
    /// the actual version alongside it. A source returning an older
    /// version is a coding error on its side; the loader rejects it.
    fn load_for_cache_versioned(
        &self,
        key: &CacheKey,
        required_version: u64,
    ) -> CacheResult<Option<(CachePayload, u64)>>;
}

/// The loader's handle on whichever source strength was supplied.
#[derive(Clone)]
pub enum SourceHandle {
    Plain(Arc<dyn DataSource>),
    Versioned(Arc<dyn VersionedDataSource>),
}

impl SourceHandle {
    pub(crate) fn as_plain(&self) -> &dyn DataSource {
        match self {
            SourceHandle::Plain(source) => source.as_ref(),
            SourceHandle::Versioned(source) => source.as_ref(),
        }
    }

    pub(crate) fn as_versioned(&self) -> Option<&dyn VersionedDataSource> {
        match self {
            SourceHandle::Plain(_) => None,
            SourceHandle::Versioned(source) => Some(source.as_ref()),
        }
    }
}

impl std::fmt::Debug for SourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceHandle::Plain(_) => f.write_str("SourceHandle::Plain"),
            SourceHandle::Versioned(_) => f.write_str("SourceHandle::Versioned"),
        }
    }
}
