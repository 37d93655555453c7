//! Configuration Module
//!
//! Handles loading and managing cache configuration from environment variables.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::EvictionPolicy;

/// Default number of entries a cache holds.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Default number of store shards.
pub const DEFAULT_SHARDS: usize = 16;

/// Cache construction parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of entries the cache can hold
    pub capacity: usize,
    /// Eviction policy applied when the cache is full
    pub policy: EvictionPolicy,
    /// Number of independently locked store shards
    pub shards: usize,
    /// Default wait timeout for `get_or_load`, None = wait forever
    pub load_timeout: Option<Duration>,
}

impl CacheConfig {
    /// Creates a new CacheConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_CAPACITY` - Maximum cache entries (default: 1000)
    /// - `CACHE_POLICY` - `lru`, `lfu` or `fifo` (default: lru)
    /// - `CACHE_SHARDS` - Store shard count (default: 16)
    /// - `CACHE_LOAD_TIMEOUT_MS` - Load wait timeout in milliseconds (default: none)
    pub fn from_env() -> Self {
        Self {
            capacity: env::var("CACHE_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_CAPACITY),
            policy: env::var("CACHE_POLICY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_default(),
            shards: env::var("CACHE_SHARDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_SHARDS),
            load_timeout: env::var("CACHE_LOAD_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis),
        }
    }

    /// Sets the capacity.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the eviction policy.
    pub fn with_policy(mut self, policy: EvictionPolicy) -> Self {
        self.policy = policy;
        self
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            policy: EvictionPolicy::Lru,
            shards: DEFAULT_SHARDS,
            load_timeout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = CacheConfig::default();
        assert_eq!(config.capacity, 1000);
        assert_eq!(config.policy, EvictionPolicy::Lru);
        assert_eq!(config.shards, 16);
        assert!(config.load_timeout.is_none());
    }

    #[test]
    fn test_config_from_env() {
        // Single test touches the environment to avoid races between tests
        env::remove_var("CACHE_CAPACITY");
        env::remove_var("CACHE_POLICY");
        env::remove_var("CACHE_SHARDS");
        env::remove_var("CACHE_LOAD_TIMEOUT_MS");

        assert_eq!(CacheConfig::from_env(), CacheConfig::default());

        env::set_var("CACHE_CAPACITY", "64");
        env::set_var("CACHE_POLICY", "LFU");
        env::set_var("CACHE_SHARDS", "not-a-number");
        env::set_var("CACHE_LOAD_TIMEOUT_MS", "250");

        let config = CacheConfig::from_env();
        assert_eq!(config.capacity, 64);
        assert_eq!(config.policy, EvictionPolicy::Lfu);
        assert_eq!(config.shards, DEFAULT_SHARDS);
        assert_eq!(config.load_timeout, Some(Duration::from_millis(250)));

        env::remove_var("CACHE_CAPACITY");
        env::remove_var("CACHE_POLICY");
        env::remove_var("CACHE_SHARDS");
        env::remove_var("CACHE_LOAD_TIMEOUT_MS");
    }

    #[test]
    fn test_config_builders() {
        let config = CacheConfig::default()
            .with_capacity(8)
            .with_policy(EvictionPolicy::Fifo);
        assert_eq!(config.capacity, 8);
        assert_eq!(config.policy, EvictionPolicy::Fifo);
    }
}
