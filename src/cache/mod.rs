//! Cache Module
//!
//! Provides a bounded in-memory cache with pluggable eviction and coalesced
//! load-on-miss.

mod engine;
mod entry;
mod inflight;
mod loader;
mod policy;
mod stats;
mod store;


// Re-export public types
pub use engine::{Cache, CacheBuilder, KeyValidator};
pub use entry::{CacheEntry, EntryMeta, LoadState};
pub use loader::Loader;
pub use policy::EvictionPolicy;
pub use stats::CacheStats;
pub use store::{EntryStore, KeySnapshot};
