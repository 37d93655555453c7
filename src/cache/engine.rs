//! Cache Engine Module
//!
//! Bounded cache combining the sharded entry store, an eviction policy and
//! coalesced load-on-miss.

use std::collections::HashMap;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use crate::cache::inflight::InFlight;
use crate::cache::stats::StatsRecorder;
use crate::cache::{CacheStats, EntryStore, EvictionPolicy, KeySnapshot, LoadState, Loader};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};

/// Predicate deciding whether a key may enter the cache.
///
/// Returns a reason on rejection.
pub type KeyValidator<K> = Arc<dyn Fn(&K) -> std::result::Result<(), String> + Send + Sync>;

type PendingTable<K, V> = HashMap<K, Arc<InFlight<V>>>;

// == Cache ==
/// Bounded, thread-safe cache with pluggable eviction and memoized loading.
///
/// `Cache` is a handle: clones share the same entries, statistics and
/// in-flight loads. Plain lookups and inserts are synchronous;
/// [`Cache::get_or_load`] is async and must run inside a Tokio runtime.
pub struct Cache<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for Cache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<K, V> {
    store: EntryStore<K, V>,
    policy: EvictionPolicy,
    capacity: usize,
    /// Loads in progress, at most one per key.
    ///
    /// This lock also serializes every write: new-key admission, eviction,
    /// load completion and invalidation. Evict-then-insert is therefore atomic
    /// and `size() <= capacity` holds at every instant, at the cost of writes
    /// to unrelated keys queueing behind each other. Reads never take it.
    /// Eviction snapshots lock one shard at a time, so readers of other shards
    /// are not blocked while victims are selected.
    pending: Mutex<PendingTable<K, V>>,
    stats: StatsRecorder,
    key_validator: Option<KeyValidator<K>>,
    load_timeout: Option<Duration>,
}

impl<K, V> Cache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    // == Constructors ==
    /// Creates a cache holding at most `capacity` entries.
    ///
    /// Fails with `InvalidConfiguration` when `capacity` is zero.
    pub fn new(capacity: usize, policy: EvictionPolicy) -> Result<Self> {
        Self::builder().capacity(capacity).policy(policy).build()
    }

    /// Creates a cache from a loaded configuration.
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        CacheBuilder::from_config(config.clone()).build()
    }

    pub fn builder() -> CacheBuilder<K, V> {
        CacheBuilder::from_config(CacheConfig::default())
    }

    // == Accessors ==
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.inner.policy
    }

    // == Get Or Load ==
    /// Returns the cached value, loading it with `loader` on a miss.
    ///
    /// Concurrent misses of the same key run `loader` once; every caller
    /// receives the same value or the same `LoaderFailure`. Failed loads are
    /// not cached. The configured load timeout, if any, bounds the wait.
    pub async fn get_or_load<L>(&self, key: K, loader: L) -> Result<V>
    where
        L: Loader<K, V>,
    {
        match self.inner.load_timeout {
            Some(timeout) => self.get_or_load_with_timeout(key, timeout, loader).await,
            None => self.load_through(key, loader).await,
        }
    }

    /// Like [`Cache::get_or_load`] with an explicit wait timeout.
    ///
    /// On timeout only this caller gives up; the load keeps running while
    /// other callers still wait on it.
    pub async fn get_or_load_with_timeout<L>(
        &self,
        key: K,
        timeout: Duration,
        loader: L,
    ) -> Result<V>
    where
        L: Loader<K, V>,
    {
        current_runtime()?;
        match tokio::time::timeout(timeout, self.load_through(key, loader)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                debug!(?timeout, "Gave up waiting for load");
                Err(CacheError::Timeout(timeout))
            }
        }
    }

    async fn load_through<L>(&self, key: K, loader: L) -> Result<V>
    where
        L: Loader<K, V>,
    {
        self.inner.validate(&key)?;

        if let Some(entry) = self.inner.store.get(&key) {
            self.inner.stats.record_hit();
            return Ok(entry.value);
        }

        let waiter = {
            let mut pending = self.inner.pending.lock();
            if let Some(flight) = pending.get(&key) {
                // Join the load already running for this key
                flight.join();
                self.inner.stats.record_miss();
                self.inner.stats.record_coalesced_wait();
                Waiter::new(Arc::clone(&self.inner), key, Arc::clone(flight))
            } else if let Some(entry) = self.inner.store.get(&key) {
                // Stored by a load that finished after the first lookup
                self.inner.stats.record_hit();
                return Ok(entry.value);
            } else {
                // Checked before the slot exists so a failure leaves nothing behind
                let runtime = current_runtime()?;
                self.inner.stats.record_miss();
                self.inner.stats.record_load();

                let flight = InFlight::new();
                pending.insert(key.clone(), Arc::clone(&flight));
                let task = runtime.spawn(run_load(
                    Arc::clone(&self.inner),
                    key.clone(),
                    Arc::clone(&flight),
                    loader,
                ));
                flight.attach_task(task.abort_handle());
                debug!(pending = pending.len(), "Started load");

                Waiter::new(Arc::clone(&self.inner), key, flight)
            }
        };

        waiter.flight.wait().await
    }

    // == Get ==
    /// Returns the stored value without loading, recording the access.
    pub fn get(&self, key: &K) -> Option<V> {
        match self.inner.store.get(key) {
            Some(entry) => {
                self.inner.stats.record_hit();
                Some(entry.value)
            }
            None => {
                self.inner.stats.record_miss();
                None
            }
        }
    }

    // == Put ==
    /// Stores a value, evicting first if the cache is full.
    ///
    /// A load in progress for the key is detached: its callers still get the
    /// loaded value but it will not overwrite this one. Returns the
    /// previously stored value.
    pub fn put(&self, key: K, value: V) -> Result<Option<V>> {
        self.inner.validate(&key)?;

        let mut pending = self.inner.pending.lock();
        if let Some(flight) = pending.get(&key) {
            flight.detach();
            debug!("Detached in-flight load superseded by put");
        }
        self.inner.admit(&mut pending, key, value)
    }

    // == Invalidate ==
    /// Removes the key and detaches any load in progress for it.
    ///
    /// A detached load keeps its slot until it finishes, so callers arriving
    /// meanwhile join it instead of starting a second loader; its result is
    /// returned to them but not stored. Returns whether an entry was removed.
    /// Idempotent.
    pub fn invalidate(&self, key: &K) -> bool {
        let pending = self.inner.pending.lock();
        if let Some(flight) = pending.get(key) {
            flight.detach();
            debug!("Detached in-flight load on invalidate");
        }
        self.inner.store.remove(key).is_some()
    }

    /// Removes every entry and detaches every load in progress.
    ///
    /// Returns the number of entries removed.
    pub fn invalidate_all(&self) -> usize {
        let pending = self.inner.pending.lock();
        for flight in pending.values() {
            flight.detach();
        }
        let removed = self.inner.store.clear();
        debug!(removed, detached = pending.len(), "Invalidated all entries");
        removed
    }

    // == Read-only Queries ==
    /// Number of stored entries.
    pub fn size(&self) -> usize {
        self.inner.store.len()
    }

    /// Whether a value is stored for the key. Does not count as an access.
    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.store.contains_key(key)
    }

    /// Snapshot of the stored keys.
    pub fn keys(&self) -> KeySnapshot<K> {
        self.inner.store.keys()
    }

    /// Wall-clock time since the stored value was inserted or last
    /// overwritten. Does not count as an access.
    pub fn entry_age(&self, key: &K) -> Option<chrono::Duration> {
        self.inner.store.peek(key).map(|entry| entry.age())
    }

    /// Where the key currently is in its load cycle.
    ///
    /// `Failed` is transient: it shows only between a load failing and its
    /// slot being cleared, after which the key is `Empty` again.
    pub fn load_state(&self, key: &K) -> LoadState {
        let pending = self.inner.pending.lock();
        if self.inner.store.contains_key(key) {
            return LoadState::Loaded;
        }
        match pending.get(key) {
            Some(flight) => flight.state(),
            None => LoadState::Empty,
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats.snapshot(self.inner.store.len())
    }
}

impl<K, V> Inner<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn validate(&self, key: &K) -> Result<()> {
        match &self.key_validator {
            Some(validator) => validator(key).map_err(CacheError::InvalidKey),
            None => Ok(()),
        }
    }

    // == Admit ==
    /// Inserts a value, evicting victims first when the key is new and the
    /// store is full.
    ///
    /// Takes the pending table to prove the caller holds its lock.
    fn admit(&self, _pending: &mut PendingTable<K, V>, key: K, value: V) -> Result<Option<V>> {
        if !self.store.contains_key(&key) {
            let overflow = (self.store.len() + 1).saturating_sub(self.capacity);
            if overflow > 0 {
                self.evict(overflow)?;
            }
        }
        Ok(self.store.put(key, value).map(|previous| previous.value))
    }

    fn evict(&self, overflow: usize) -> Result<()> {
        let snapshot = self.store.snapshot();
        let victims = self
            .policy
            .select_victims(&snapshot, overflow)
            .inspect_err(|err| error!(%err, "Eviction failed"))?;

        let mut evicted = 0;
        for victim in victims {
            if self.store.remove(&victim).is_some() {
                evicted += 1;
            }
        }
        self.stats.record_evictions(evicted);
        debug!(evicted, policy = %self.policy, "Evicted entries");
        Ok(())
    }

    // == Complete ==
    /// Frees the pending slot and stores the loaded value unless the load
    /// was detached or abandoned.
    fn complete(&self, key: &K, flight: &Arc<InFlight<V>>, value: V) -> Result<V> {
        let mut pending = self.pending.lock();
        if !owns_slot(&pending, key, flight) {
            debug!("Discarded result of abandoned load");
            return Ok(value);
        }
        pending.remove(key);
        if flight.is_detached() {
            debug!("Discarded result of detached load");
            return Ok(value);
        }
        self.admit(&mut pending, key.clone(), value.clone())?;
        Ok(value)
    }

    /// Drops the pending slot if the load still owns it.
    fn forget(&self, key: &K, flight: &Arc<InFlight<V>>) {
        let mut pending = self.pending.lock();
        if owns_slot(&pending, key, flight) {
            pending.remove(key);
        }
    }

    // == Release ==
    /// Unregisters a waiter. The last waiter to leave an unsettled load
    /// aborts it and returns the key to `Empty`.
    fn release(&self, key: &K, flight: &Arc<InFlight<V>>) {
        let abort = {
            let mut pending = self.pending.lock();
            if flight.leave() > 0 {
                return;
            }
            if owns_slot(&pending, key, flight) {
                pending.remove(key);
            }
            !flight.is_settled()
        };

        if abort {
            debug!("Last waiter left, aborting load");
            flight.abort();
        }
    }
}

fn owns_slot<K: Hash + Eq, V>(
    pending: &PendingTable<K, V>,
    key: &K,
    flight: &Arc<InFlight<V>>,
) -> bool {
    pending
        .get(key)
        .is_some_and(|current| Arc::ptr_eq(current, flight))
}

// == Load Task ==
async fn run_load<K, V, L>(
    inner: Arc<Inner<K, V>>,
    key: K,
    flight: Arc<InFlight<V>>,
    loader: L,
) where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    L: Loader<K, V>,
{
    let mut guard = LoadGuard {
        inner: Arc::clone(&inner),
        key: key.clone(),
        flight: Arc::clone(&flight),
        finished: false,
    };

    match loader.load(key.clone()).await {
        Ok(value) => {
            let outcome = inner.complete(&key, &flight, value);
            guard.finished = true;
            flight.settle(outcome);
        }
        Err(err) => {
            inner.stats.record_load_failure();
            warn!(error = %err, "Loader failed");
            guard.finished = true;
            flight.settle(Err(CacheError::loader(err)));
            inner.forget(&key, &flight);
        }
    }
}

fn current_runtime() -> Result<Handle> {
    Handle::try_current().map_err(|_| {
        CacheError::InvalidConfiguration("loading requires a Tokio runtime".to_string())
    })
}

/// Settles a load whose task ended without producing an outcome, either
/// because the loader panicked or because the task was aborted.
struct LoadGuard<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    inner: Arc<Inner<K, V>>,
    key: K,
    flight: Arc<InFlight<V>>,
    finished: bool,
}

impl<K, V> Drop for LoadGuard<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if std::thread::panicking() {
            error!("Loader panicked");
        } else {
            debug!("Load aborted");
        }
        self.flight.settle(Err(CacheError::InternalConsistencyFault(
            "load task ended without an outcome".to_string(),
        )));
        self.inner.forget(&self.key, &self.flight);
    }
}

// == Waiter ==
/// A caller's registration on an in-flight load; leaving is tied to drop so
/// timeouts and cancelled futures are accounted for.
struct Waiter<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    inner: Arc<Inner<K, V>>,
    key: K,
    flight: Arc<InFlight<V>>,
}

impl<K, V> Waiter<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn new(inner: Arc<Inner<K, V>>, key: K, flight: Arc<InFlight<V>>) -> Self {
        Self { inner, key, flight }
    }
}

impl<K, V> Drop for Waiter<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.inner.release(&self.key, &self.flight);
    }
}

// == Cache Builder ==
/// Configures and constructs a [`Cache`].
pub struct CacheBuilder<K, V> {
    config: CacheConfig,
    key_validator: Option<KeyValidator<K>>,
    _values: PhantomData<fn() -> V>,
}

impl<K, V> CacheBuilder<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn from_config(config: CacheConfig) -> Self {
        Self {
            config,
            key_validator: None,
            _values: PhantomData,
        }
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.config.capacity = capacity;
        self
    }

    pub fn policy(mut self, policy: EvictionPolicy) -> Self {
        self.config.policy = policy;
        self
    }

    pub fn shards(mut self, shards: usize) -> Self {
        self.config.shards = shards;
        self
    }

    /// Default wait timeout applied by `get_or_load`.
    pub fn load_timeout(mut self, timeout: Duration) -> Self {
        self.config.load_timeout = Some(timeout);
        self
    }

    /// Rejects keys for which `validator` returns an error.
    pub fn key_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&K) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.key_validator = Some(Arc::new(validator));
        self
    }

    // == Build ==
    pub fn build(self) -> Result<Cache<K, V>> {
        let config = self.config;
        if config.capacity == 0 {
            return Err(CacheError::InvalidConfiguration(
                "capacity must be positive".to_string(),
            ));
        }
        if config.shards == 0 {
            return Err(CacheError::InvalidConfiguration(
                "shard count must be positive".to_string(),
            ));
        }

        info!(
            capacity = config.capacity,
            policy = %config.policy,
            shards = config.shards,
            "Cache created"
        );

        Ok(Cache {
            inner: Arc::new(Inner {
                store: EntryStore::new(config.shards),
                policy: config.policy,
                capacity: config.capacity,
                pending: Mutex::new(HashMap::new()),
                stats: StatsRecorder::default(),
                key_validator: self.key_validator,
                load_timeout: config.load_timeout,
            }),
        })
    }
}
