//! Flub - generic data structures and procedures
//!
//! Provides a bounded cache with LRU, LFU and FIFO eviction, coalesced
//! memoized loading, and memoized function wrappers built on top of it.

pub mod cache;
pub mod config;
pub mod error;
pub mod memo;

pub use cache::{Cache, EvictionPolicy, Loader};
pub use config::CacheConfig;
pub use error::{CacheError, Result};
pub use memo::{memoize, memoize2, memoize_supplier};
