//! Error types for the cachefront library.
//!
//! ## Key Components
//!
//! - [`CacheError`]: caller-facing errors raised by loaders: contract
//!   violations, backend faults, and integrity failures.
//! - [`StoreError`]: faults raised by a backing store implementation.
//!
//! ## Propagation Policy
//!
//! - Contract errors abort the operation and surface to the caller.
//! - Store faults on the read path are swallowed as misses (logged) so the
//!   chain can fall through; on the write path they surface as a failed
//!   write (`Ok(false)`) rather than an `Err`.
//! - Integrity failures self-heal: the loader deletes the offending entry
//!   before raising the error, so subsequent requests recover.

use thiserror::Error;

/// Result alias for loader-level operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Result alias for store-level operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Fault raised by a backing store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend failed to service the request.
    #[error("store backend failure: {0}")]
    Backend(String),

    /// A value could not be serialized or deserialized by the store.
    #[error("store serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Error raised by a cache loader.
#[derive(Debug, Error)]
pub enum CacheError {
    /// A coding error on the caller's side: versioned/unversioned misuse,
    /// a required key that is missing, or a data source that cannot honor
    /// the requested contract.
    #[error("coding error: {0}")]
    Contract(String),

    /// The underlying store failed and the failure could not be absorbed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A retrieved entry had an unexpected shape. The offending entry has
    /// already been deleted by the time this error is observed.
    #[error("cache integrity violation for key {key}: {detail}")]
    Integrity {
        /// Display form of the caller key involved.
        key: String,
        /// What was wrong with the entry.
        detail: String,
    },
}

impl CacheError {
    /// Shorthand for a [`CacheError::Contract`] with a formatted message.
    pub(crate) fn contract(msg: impl Into<String>) -> Self {
        CacheError::Contract(msg.into())
    }
}
