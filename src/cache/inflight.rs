//! In-flight Load Module
//!
//! Shared handle for a load that is still running, so concurrent misses of the
//! same key wait on one computation instead of starting their own.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::sync::watch;
use tokio::task::AbortHandle;

use crate::cache::LoadState;
use crate::error::{CacheError, Result};

// == In-flight Load ==
/// A pending load plus the callers waiting on it.
///
/// The outcome is published once through a watch channel; every waiter,
/// including late joiners, observes the same value or the same error.
pub(crate) struct InFlight<V> {
    /// Settles from None to Some exactly once
    outcome: watch::Sender<Option<Result<V>>>,
    /// Callers currently waiting; changed only under the pending-table lock
    waiters: AtomicUsize,
    /// Handle of the task running the loader
    task: OnceLock<AbortHandle>,
    /// Set when the key was overwritten or invalidated mid-load; the result
    /// still reaches waiters but is not stored
    detached: AtomicBool,
}

impl<V: Clone> InFlight<V> {
    // == Constructor ==
    /// Creates an unsettled load with its first waiter already counted.
    pub fn new() -> Arc<Self> {
        let (outcome, _) = watch::channel(None);
        Arc::new(Self {
            outcome,
            waiters: AtomicUsize::new(1),
            task: OnceLock::new(),
            detached: AtomicBool::new(false),
        })
    }

    // == Waiters ==
    /// Registers another waiter.
    pub fn join(&self) {
        self.waiters.fetch_add(1, Ordering::AcqRel);
    }

    /// Unregisters a waiter, returning how many remain.
    pub fn leave(&self) -> usize {
        self.waiters.fetch_sub(1, Ordering::AcqRel) - 1
    }

    // == Task ==
    pub fn attach_task(&self, handle: AbortHandle) {
        let _ = self.task.set(handle);
    }

    /// Aborts the loader task, if one was attached.
    pub fn abort(&self) {
        if let Some(handle) = self.task.get() {
            handle.abort();
        }
    }

    // == Detach ==
    /// Marks the load so its result is handed to waiters but not stored.
    pub fn detach(&self) {
        self.detached.store(true, Ordering::Release);
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    // == Outcome ==
    pub fn state(&self) -> LoadState {
        match &*self.outcome.borrow() {
            None => LoadState::Loading,
            Some(Ok(_)) => LoadState::Loaded,
            Some(Err(_)) => LoadState::Failed,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.state() != LoadState::Loading
    }

    /// Publishes the outcome. Later calls are ignored.
    pub fn settle(&self, outcome: Result<V>) {
        self.outcome.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(outcome);
            true
        });
    }

    /// Waits until the load settles and returns its outcome.
    pub async fn wait(&self) -> Result<V> {
        let mut rx = self.outcome.subscribe();
        let settled = rx.wait_for(Option::is_some).await;
        match settled {
            Ok(outcome) => (*outcome).clone().unwrap_or_else(|| {
                Err(CacheError::InternalConsistencyFault(
                    "load settled without an outcome".to_string(),
                ))
            }),
            Err(_) => Err(CacheError::InternalConsistencyFault(
                "load channel closed before settling".to_string(),
            )),
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_waiter_counting() {
        let flight: Arc<InFlight<u32>> = InFlight::new();
        flight.join();
        flight.join();

        assert_eq!(flight.leave(), 2);
        assert_eq!(flight.leave(), 1);
        assert_eq!(flight.leave(), 0);
    }

    #[test]
    fn test_settle_only_once() {
        let flight: Arc<InFlight<u32>> = InFlight::new();
        assert!(!flight.is_settled());

        assert_eq!(flight.state(), LoadState::Loading);

        flight.settle(Ok(1));
        flight.settle(Err(CacheError::loader(anyhow::anyhow!("too late"))));

        assert!(flight.is_settled());
        assert_eq!(flight.state(), LoadState::Loaded);
        assert_eq!(tokio_test::block_on(flight.wait()).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_all_waiters_see_same_outcome() {
        let flight: Arc<InFlight<String>> = InFlight::new();

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let flight = Arc::clone(&flight);
                tokio::spawn(async move { flight.wait().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        flight.settle(Err(CacheError::loader(anyhow::anyhow!("boom"))));

        for waiter in waiters {
            let err = waiter.await.unwrap().unwrap_err();
            assert_eq!(err.to_string(), "Loader failed: boom");
        }
        assert_eq!(flight.state(), LoadState::Failed);
    }

    #[test]
    fn test_detach_is_sticky() {
        let flight: Arc<InFlight<u32>> = InFlight::new();
        assert!(!flight.is_detached());

        flight.detach();
        flight.detach();

        assert!(flight.is_detached());
        assert_eq!(flight.state(), LoadState::Loading);
    }

    #[tokio::test]
    async fn test_abort_stops_attached_task() {
        let flight: Arc<InFlight<u32>> = InFlight::new();
        let task = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        flight.attach_task(task.abort_handle());

        flight.abort();

        assert!(task.await.unwrap_err().is_cancelled());
    }
}
