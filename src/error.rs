//! Error types for the cache
//!
//! Provides unified error handling using thiserror.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache.
///
/// Errors are `Clone` so a single loader failure can be handed to every
/// caller waiting on the same load.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// Construction-time misuse (zero capacity, zero shards)
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The supplied loader failed
    #[error("Loader failed: {0:#}")]
    LoaderFailure(Arc<anyhow::Error>),

    /// Key rejected by the cache's key validator
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// An internal invariant was violated
    #[error("Internal consistency fault: {0}")]
    InternalConsistencyFault(String),

    /// Waiting for a load exceeded the caller's timeout
    #[error("Load timed out after {0:?}")]
    Timeout(Duration),
}

impl CacheError {
    // == Loader Failure ==
    /// Wraps a loader error.
    pub fn loader(err: anyhow::Error) -> Self {
        CacheError::LoaderFailure(Arc::new(err))
    }

    /// Returns the underlying loader error, if this is a `LoaderFailure`.
    pub fn loader_error(&self) -> Option<&anyhow::Error> {
        match self {
            CacheError::LoaderFailure(err) => Some(err),
            _ => None,
        }
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache.
pub type Result<T> = std::result::Result<T, CacheError>;
