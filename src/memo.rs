//! Memoization Module
//!
//! Wraps async functions so their results are computed once per argument and
//! served from a bounded cache afterwards.
//!
//! # Example
//! ```ignore
//! let square = memoize(128, EvictionPolicy::Lru, |n: u64| async move {
//!     anyhow::Ok(n * n)
//! })?;
//! assert_eq!(square.call(12).await?, 144);
//! ```

use std::future::Future;
use std::hash::Hash;

use crate::cache::{Cache, EvictionPolicy};
use crate::error::Result;

// == Memoized Function ==
/// A single-argument function backed by a cache.
pub struct Memoized<K, V, F> {
    cache: Cache<K, V>,
    func: F,
}

impl<K, V, F, Fut> Memoized<K, V, F>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    F: Fn(K) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
{
    /// Memoizes `func` into an existing cache.
    pub fn new(cache: Cache<K, V>, func: F) -> Self {
        Self { cache, func }
    }

    /// Returns `func(key)`, computing it only if no result is cached.
    pub async fn call(&self, key: K) -> Result<V> {
        self.cache.get_or_load(key, self.func.clone()).await
    }

    /// The backing cache, for invalidation and statistics.
    pub fn cache(&self) -> &Cache<K, V> {
        &self.cache
    }
}

/// Memoizes a single-argument async function.
pub fn memoize<K, V, F, Fut>(
    capacity: usize,
    policy: EvictionPolicy,
    func: F,
) -> Result<Memoized<K, V, F>>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    F: Fn(K) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
{
    Ok(Memoized::new(Cache::new(capacity, policy)?, func))
}

// == Memoized Bi-Function ==
/// A two-argument function backed by a cache keyed on the argument pair.
pub struct MemoizedBi<A, B, V, F> {
    cache: Cache<(A, B), V>,
    func: F,
}

impl<A, B, V, F, Fut> MemoizedBi<A, B, V, F>
where
    A: Hash + Eq + Clone + Send + Sync + 'static,
    B: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    F: Fn(A, B) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
{
    pub fn new(cache: Cache<(A, B), V>, func: F) -> Self {
        Self { cache, func }
    }

    /// Returns `func(a, b)`, computing it only if no result is cached.
    pub async fn call(&self, a: A, b: B) -> Result<V> {
        let func = self.func.clone();
        self.cache
            .get_or_load((a, b), move |(a, b): (A, B)| func(a, b))
            .await
    }

    pub fn cache(&self) -> &Cache<(A, B), V> {
        &self.cache
    }
}

/// Memoizes a two-argument async function.
pub fn memoize2<A, B, V, F, Fut>(
    capacity: usize,
    policy: EvictionPolicy,
    func: F,
) -> Result<MemoizedBi<A, B, V, F>>
where
    A: Hash + Eq + Clone + Send + Sync + 'static,
    B: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    F: Fn(A, B) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
{
    Ok(MemoizedBi::new(Cache::new(capacity, policy)?, func))
}

// == Memoized Supplier ==
/// A lazily computed value.
///
/// The first callers coalesce on one computation; a failed computation is
/// not remembered and the next call tries again.
pub struct MemoizedSupplier<V, F> {
    cache: Cache<(), V>,
    func: F,
}

impl<V, F, Fut> MemoizedSupplier<V, F>
where
    V: Clone + Send + Sync + 'static,
    F: Fn() -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
{
    pub async fn get(&self) -> Result<V> {
        let func = self.func.clone();
        self.cache.get_or_load((), move |_: ()| func()).await
    }

    /// Whether the value has been computed and is still held.
    pub fn is_computed(&self) -> bool {
        self.cache.contains_key(&())
    }

    /// Forgets the computed value so the next `get` recomputes it.
    pub fn reset(&self) {
        self.cache.invalidate(&());
    }
}

/// Memoizes an async supplier.
pub fn memoize_supplier<V, F, Fut>(func: F) -> MemoizedSupplier<V, F>
where
    V: Clone + Send + Sync + 'static,
    F: Fn() -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
{
    let cache: Cache<(), V> = Cache::builder()
        .capacity(1)
        .shards(1)
        .build()
        .expect("capacity and shards are positive");
    MemoizedSupplier { cache, func }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_memoize_computes_once_per_argument() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let square = memoize(16, EvictionPolicy::Lru, move |n: u64| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(n * n)
            }
        })
        .unwrap();

        assert_eq!(square.call(3).await.unwrap(), 9);
        assert_eq!(square.call(3).await.unwrap(), 9);
        assert_eq!(square.call(4).await.unwrap(), 16);

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(square.cache().size(), 2);
    }

    #[tokio::test]
    async fn test_memoize_respects_capacity() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let double = memoize(1, EvictionPolicy::Lru, move |n: u32| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(n * 2)
            }
        })
        .unwrap();

        double.call(1).await.unwrap();
        double.call(2).await.unwrap();
        double.call(1).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(double.cache().size(), 1);
    }

    #[test]
    fn test_memoize_rejects_zero_capacity() {
        let result = memoize(0, EvictionPolicy::Lfu, |n: u32| async move { anyhow::Ok(n) });
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_memoize2_keys_on_both_arguments() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let join = memoize2(16, EvictionPolicy::Fifo, move |a: String, b: u32| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(format!("{}-{}", a, b))
            }
        })
        .unwrap();

        assert_eq!(join.call("x".to_string(), 1).await.unwrap(), "x-1");
        assert_eq!(join.call("x".to_string(), 2).await.unwrap(), "x-2");
        assert_eq!(join.call("x".to_string(), 1).await.unwrap(), "x-1");

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(join.cache().contains_key(&("x".to_string(), 2)));
    }

    #[tokio::test]
    async fn test_supplier_is_lazy_and_resettable() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let config = memoize_supplier(move || {
            let counter = Arc::clone(&counter);
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(format!("config-v{}", n))
            }
        });

        assert!(!config.is_computed());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        assert_eq!(config.get().await.unwrap(), "config-v0");
        assert_eq!(config.get().await.unwrap(), "config-v0");
        assert!(config.is_computed());

        config.reset();
        assert_eq!(config.get().await.unwrap(), "config-v1");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_supplier_failure_is_not_remembered() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let flaky = memoize_supplier(move || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    anyhow::bail!("first attempt fails");
                }
                anyhow::Ok(7u32)
            }
        });

        assert!(flaky.get().await.is_err());
        assert!(!flaky.is_computed());
        assert_eq!(flaky.get().await.unwrap(), 7);
    }
}
