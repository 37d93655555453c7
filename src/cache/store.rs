//! Entry Store Module
//!
//! Sharded key-entry storage with per-entry access bookkeeping.

use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::cache::{CacheEntry, EntryMeta};

type Shard<K, V> = Mutex<HashMap<K, CacheEntry<K, V>>>;

// == Entry Store ==
/// Thread-safe entry storage split into independently locked shards.
///
/// Every operation on a key runs under that key's shard lock, so operations
/// on one key are atomic with respect to each other while keys in different
/// shards never contend.
pub struct EntryStore<K, V> {
    /// Shards, length is a power of two
    shards: Box<[Shard<K, V>]>,
    /// Hasher used to pick a shard
    hasher: RandomState,
    /// Total number of entries across shards
    len: AtomicUsize,
    /// Logical clock for insertion and access ticks
    clock: AtomicU64,
}

impl<K, V> EntryStore<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    // == Constructor ==
    /// Creates an empty store with `shards` shards (rounded up to a power of two).
    pub fn new(shards: usize) -> Self {
        let count = shards.max(1).next_power_of_two();
        Self {
            shards: (0..count).map(|_| Mutex::new(HashMap::new())).collect(),
            hasher: RandomState::new(),
            len: AtomicUsize::new(0),
            clock: AtomicU64::new(0),
        }
    }

    fn shard(&self, key: &K) -> &Shard<K, V> {
        let index = self.hasher.hash_one(key) as usize & (self.shards.len() - 1);
        &self.shards[index]
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    // == Get ==
    /// Returns a copy of the entry after recording the access.
    pub fn get(&self, key: &K) -> Option<CacheEntry<K, V>> {
        let mut shard = self.shard(key).lock();
        let entry = shard.get_mut(key)?;
        entry.touch(self.tick());
        Some(entry.clone())
    }

    // == Peek ==
    /// Returns a copy of the entry without touching it.
    pub fn peek(&self, key: &K) -> Option<CacheEntry<K, V>> {
        self.shard(key).lock().get(key).cloned()
    }

    // == Contains ==
    pub fn contains_key(&self, key: &K) -> bool {
        self.shard(key).lock().contains_key(key)
    }

    // == Put ==
    /// Inserts or replaces an entry, returning the previous one.
    ///
    /// A replaced entry keeps its access count so frequency-based eviction
    /// is not reset by overwrites.
    pub fn put(&self, key: K, value: V) -> Option<CacheEntry<K, V>> {
        let mut shard = self.shard(&key).lock();
        let tick = self.tick();
        match shard.get_mut(&key) {
            Some(entry) => {
                let previous = entry.clone();
                entry.replace(value, tick);
                Some(previous)
            }
            None => {
                shard.insert(key.clone(), CacheEntry::new(key, value, tick));
                self.len.fetch_add(1, Ordering::AcqRel);
                None
            }
        }
    }

    // == Remove ==
    pub fn remove(&self, key: &K) -> Option<CacheEntry<K, V>> {
        let mut shard = self.shard(key).lock();
        let removed = shard.remove(key);
        if removed.is_some() {
            self.len.fetch_sub(1, Ordering::AcqRel);
        }
        removed
    }

    // == Clear ==
    /// Removes every entry, returning how many were removed.
    pub fn clear(&self) -> usize {
        let mut removed = 0;
        for shard in self.shards.iter() {
            let mut shard = shard.lock();
            removed += shard.len();
            self.len.fetch_sub(shard.len(), Ordering::AcqRel);
            shard.clear();
        }
        removed
    }

    // == Length ==
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // == Keys ==
    /// Snapshot of the keys present right now.
    pub fn keys(&self) -> KeySnapshot<K> {
        let mut keys = Vec::with_capacity(self.len());
        for shard in self.shards.iter() {
            keys.extend(shard.lock().keys().cloned());
        }
        KeySnapshot { keys: keys.into() }
    }

    // == Metadata Snapshot ==
    /// Eviction metadata for every entry present right now.
    pub fn snapshot(&self) -> Vec<EntryMeta<K>> {
        let mut metas = Vec::with_capacity(self.len());
        for shard in self.shards.iter() {
            metas.extend(shard.lock().values().map(CacheEntry::meta));
        }
        metas
    }
}

// == Key Snapshot ==
/// Keys captured at a point in time.
///
/// Later mutations of the store are not observed. The snapshot can be
/// iterated any number of times.
#[derive(Debug, Clone)]
pub struct KeySnapshot<K> {
    keys: Arc<[K]>,
}

impl<K> KeySnapshot<K> {
    pub fn iter(&self) -> std::slice::Iter<'_, K> {
        self.keys.iter()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl<'a, K> IntoIterator for &'a KeySnapshot<K> {
    type Item = &'a K;
    type IntoIter = std::slice::Iter<'a, K>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.iter()
    }
}
