//! Cache Entry Module
//!
//! Defines individual cache entries and the metadata snapshot used for eviction.

use chrono::{DateTime, Utc};
use serde::Serialize;

// == Load State ==
/// Where a key is in its load cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadState {
    /// Nothing stored and nothing loading
    Empty,
    /// A loader is running for the key
    Loading,
    /// A value is stored
    Loaded,
    /// The last load failed. Transient: reported only until the failed
    /// load's slot is cleared, and never persisted in the store
    Failed,
}

// == Cache Entry ==
/// Represents a single cache entry with value and access metadata.
///
/// `inserted_at` and `last_access` are logical ticks issued by the owning
/// store, so they are unique and strictly ordered across the whole store.
#[derive(Debug, Clone)]
pub struct CacheEntry<K, V> {
    /// The entry's key
    pub key: K,
    /// The stored value
    pub value: V,
    /// Tick at which the value was (re)inserted
    pub inserted_at: u64,
    /// Tick of the latest access
    pub last_access: u64,
    /// Number of accesses, insertion included
    pub access_count: u64,
    /// Wall-clock creation time
    pub created_at: DateTime<Utc>,
    /// Load state, always `Loaded` for stored entries
    pub state: LoadState,
}

impl<K: Clone, V> CacheEntry<K, V> {
    // == Constructor ==
    /// Creates a freshly inserted entry.
    pub fn new(key: K, value: V, tick: u64) -> Self {
        Self {
            key,
            value,
            inserted_at: tick,
            last_access: tick,
            access_count: 1,
            created_at: Utc::now(),
            state: LoadState::Loaded,
        }
    }

    // == Touch ==
    /// Records an access at `tick`.
    pub fn touch(&mut self, tick: u64) {
        self.last_access = tick;
        self.access_count = self.access_count.saturating_add(1);
    }

    // == Replace ==
    /// Swaps in a new value, keeping the access count.
    ///
    /// Returns the previous value.
    pub fn replace(&mut self, value: V, tick: u64) -> V {
        self.inserted_at = tick;
        self.last_access = tick;
        self.created_at = Utc::now();
        std::mem::replace(&mut self.value, value)
    }

    /// Wall-clock time since the value was (re)inserted.
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.created_at
    }

    // == Metadata ==
    /// Returns the eviction metadata for this entry.
    pub fn meta(&self) -> EntryMeta<K> {
        EntryMeta {
            key: self.key.clone(),
            inserted_at: self.inserted_at,
            last_access: self.last_access,
            access_count: self.access_count,
        }
    }
}

// == Entry Metadata ==
/// Value-free view of an entry handed to eviction policies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMeta<K> {
    pub key: K,
    pub inserted_at: u64,
    pub last_access: u64,
    pub access_count: u64,
}
