//! Eviction Policy Module
//!
//! Chooses which entries to remove when the cache overflows.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::cache::EntryMeta;
use crate::error::{CacheError, Result};

// == Eviction Policy ==
/// Victim selection strategy.
///
/// Selection is a pure function of the metadata snapshot. Ticks are unique
/// per store, so every ordering below is total and the result deterministic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Least recently used: oldest last access, then oldest insertion
    #[default]
    Lru,
    /// Least frequently used: lowest access count, ties broken by LRU
    Lfu,
    /// First in, first out: oldest insertion
    Fifo,
}

impl EvictionPolicy {
    // == Select Victims ==
    /// Returns up to `overflow` keys to evict, first victim first.
    ///
    /// Fails with `InternalConsistencyFault` when asked to evict from an
    /// empty snapshot.
    pub fn select_victims<K: Clone>(
        &self,
        entries: &[EntryMeta<K>],
        overflow: usize,
    ) -> Result<Vec<K>> {
        if overflow == 0 {
            return Ok(Vec::new());
        }
        if entries.is_empty() {
            return Err(CacheError::InternalConsistencyFault(format!(
                "{} policy asked to evict {} entries from an empty store",
                self, overflow
            )));
        }

        let mut ranked: Vec<&EntryMeta<K>> = entries.iter().collect();
        match self {
            EvictionPolicy::Lru => ranked.sort_by_key(|m| (m.last_access, m.inserted_at)),
            EvictionPolicy::Lfu => {
                ranked.sort_by_key(|m| (m.access_count, m.last_access, m.inserted_at))
            }
            EvictionPolicy::Fifo => ranked.sort_by_key(|m| m.inserted_at),
        }

        Ok(ranked
            .into_iter()
            .take(overflow)
            .map(|m| m.key.clone())
            .collect())
    }
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EvictionPolicy::Lru => "lru",
            EvictionPolicy::Lfu => "lfu",
            EvictionPolicy::Fifo => "fifo",
        };
        f.write_str(name)
    }
}

impl FromStr for EvictionPolicy {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lru" => Ok(EvictionPolicy::Lru),
            "lfu" => Ok(EvictionPolicy::Lfu),
            "fifo" => Ok(EvictionPolicy::Fifo),
            other => Err(CacheError::InvalidConfiguration(format!(
                "unknown eviction policy '{}'",
                other
            ))),
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    fn meta(key: &'static str, inserted_at: u64, last_access: u64, count: u64) -> EntryMeta<&'static str> {
        EntryMeta {
            key,
            inserted_at,
            last_access,
            access_count: count,
        }
    }

    #[test]
    fn test_lru_picks_oldest_access() {
        let entries = vec![meta("a", 1, 5, 2), meta("b", 2, 2, 1), meta("c", 3, 3, 1)];

        let victims = EvictionPolicy::Lru.select_victims(&entries, 1).unwrap();
        assert_eq!(victims, vec!["b"]);
    }

    #[test]
    fn test_lru_orders_multiple_victims() {
        let entries = vec![meta("a", 1, 6, 2), meta("b", 2, 2, 1), meta("c", 3, 4, 1)];

        let victims = EvictionPolicy::Lru.select_victims(&entries, 2).unwrap();
        assert_eq!(victims, vec!["b", "c"]);
    }

    #[test]
    fn test_lfu_picks_lowest_count() {
        let entries = vec![meta("a", 1, 1, 1), meta("b", 2, 7, 4), meta("c", 3, 3, 2)];

        let victims = EvictionPolicy::Lfu.select_victims(&entries, 1).unwrap();
        assert_eq!(victims, vec!["a"]);
    }

    #[test]
    fn test_lfu_ties_broken_by_recency() {
        let entries = vec![meta("a", 1, 9, 3), meta("b", 2, 4, 3), meta("c", 3, 8, 5)];

        let victims = EvictionPolicy::Lfu.select_victims(&entries, 1).unwrap();
        assert_eq!(victims, vec!["b"]);
    }

    #[test]
    fn test_fifo_ignores_access() {
        let entries = vec![meta("a", 1, 10, 9), meta("b", 2, 2, 1), meta("c", 3, 3, 1)];

        let victims = EvictionPolicy::Fifo.select_victims(&entries, 1).unwrap();
        assert_eq!(victims, vec!["a"]);
    }

    #[test]
    fn test_zero_overflow_selects_nothing() {
        let entries = vec![meta("a", 1, 1, 1)];
        assert!(EvictionPolicy::Lru.select_victims(&entries, 0).unwrap().is_empty());

        let empty: Vec<EntryMeta<&str>> = Vec::new();
        assert!(EvictionPolicy::Lru.select_victims(&empty, 0).unwrap().is_empty());
    }

    #[test]
    fn test_empty_store_with_overflow_is_fault() {
        let empty: Vec<EntryMeta<&str>> = Vec::new();

        let result = EvictionPolicy::Fifo.select_victims(&empty, 1);
        assert!(matches!(
            result,
            Err(CacheError::InternalConsistencyFault(_))
        ));
    }

    #[test]
    fn test_overflow_larger_than_entries() {
        let entries = vec![meta("a", 1, 1, 1), meta("b", 2, 2, 1)];

        let victims = EvictionPolicy::Lru.select_victims(&entries, 5).unwrap();
        assert_eq!(victims, vec!["a", "b"]);
    }

    #[test]
    fn test_selection_is_deterministic() {
        let entries = vec![meta("a", 4, 8, 2), meta("b", 1, 9, 2), meta("c", 2, 3, 7)];
        let mut reversed = entries.clone();
        reversed.reverse();

        for policy in [EvictionPolicy::Lru, EvictionPolicy::Lfu, EvictionPolicy::Fifo] {
            assert_eq!(
                policy.select_victims(&entries, 2).unwrap(),
                policy.select_victims(&reversed, 2).unwrap()
            );
        }
    }

    #[test]
    fn test_policy_parse_and_display() {
        assert_eq!("LRU".parse::<EvictionPolicy>().unwrap(), EvictionPolicy::Lru);
        assert_eq!(" lfu ".parse::<EvictionPolicy>().unwrap(), EvictionPolicy::Lfu);
        assert_eq!("fifo".parse::<EvictionPolicy>().unwrap(), EvictionPolicy::Fifo);
        assert!(matches!(
            "random".parse::<EvictionPolicy>(),
            Err(CacheError::InvalidConfiguration(_))
        ));
        assert_eq!(EvictionPolicy::Lfu.to_string(), "lfu");
    }
}
