pub mod memory;
pub mod traits;

pub use memory::{MemoryStore, MemoryStoreBuilder};
pub use traits::{Capabilities, LockState, Store, StoreLock, StoreMetrics};
