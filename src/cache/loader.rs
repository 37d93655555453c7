//! Loader Contract
//!
//! The computation a caller supplies to produce a value for a missing key.

use std::future::Future;

// == Loader ==
/// Computes the value for a key that is not cached.
///
/// A loader is consumed by the load it drives and runs on its own Tokio task,
/// so the returned future must be `Send` and own everything it uses. It is
/// invoked at most once per concurrent miss of a key.
///
/// Any `FnOnce(K) -> Fut` closure is a loader:
///
/// ```ignore
/// cache.get_or_load(user_id, |id| async move { fetch_user(id).await }).await?;
/// ```
pub trait Loader<K, V>: Send + 'static {
    /// Produces the value for `key`.
    fn load(self, key: K) -> impl Future<Output = anyhow::Result<V>> + Send;
}

impl<K, V, F, Fut> Loader<K, V> for F
where
    F: FnOnce(K) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
{
    fn load(self, key: K) -> impl Future<Output = anyhow::Result<V>> + Send {
        self(key)
    }
}
