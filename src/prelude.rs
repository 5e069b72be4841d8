pub use crate::clock::{CacheClock, ManualTimeSource, SystemTimeSource, TimeSource};
pub use crate::definition::Definition;
pub use crate::envelope::StoredValue;
pub use crate::error::{CacheError, CacheResult, StoreError, StoreResult};
pub use crate::factory::CacheFactory;
pub use crate::invalidation::EventInvalidationCache;
pub use crate::key::{CacheKey, ParsedKey};
pub use crate::loader::{CacheLoader, Strictness};
pub use crate::object::{CachePayload, CacheableObject, ObjectMarker, RestorerRegistry};
pub use crate::source::{DataSource, SourceHandle, VersionedDataSource};
pub use crate::store::memory::MemoryStore;
pub use crate::store::traits::{Capabilities, LockState, Store, StoreLock, StoreMetrics};
