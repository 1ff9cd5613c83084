//! # Eviction Caches
//!
//! Purpose: Track key recency and frequency so the keyspace can pick
//! eviction victims under memory pressure.
//!
//! ## Design Principles
//! 1. **Ordered Indexes**: LRU keeps a monotonic tick per key in a
//!    `BTreeMap`; LFU keeps `(count, tick, key)` tuples in a `BTreeSet` so
//!    a touch reweights in O(log n) with no stale heap entries.
//! 2. **No Dangling Keys**: Both caches are purged on delete; a key never
//!    appears twice.
//! 3. **Victim Filters**: `pop_where` serves the `volatile-*` policies by
//!    skipping keys without a deadline instead of evicting them.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use ahash::RandomState;
use hashbrown::HashMap;

/// Eviction policy applied when the keyspace crosses its capacity budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Caches inactive; over-budget writes are logged and allowed.
    NoEviction,
    /// Evict the least-recently-touched key.
    AllkeysLru,
    /// Evict the least-recently-touched key among keys with a TTL.
    VolatileLru,
    /// Evict the key with the smallest access count, oldest access first.
    AllkeysLfu,
    /// LFU restricted to keys with a TTL.
    VolatileLfu,
    /// Evict the key with the soonest deadline.
    VolatileTtl,
    /// Evict a uniformly random key.
    AllkeysRandom,
    /// Random among keys with a TTL.
    VolatileRandom,
}

impl EvictionPolicy {
    /// True when the policy consults the LRU cache.
    pub fn uses_lru(&self) -> bool {
        matches!(self, EvictionPolicy::AllkeysLru | EvictionPolicy::VolatileLru)
    }

    /// True when the policy consults the LFU cache.
    pub fn uses_lfu(&self) -> bool {
        matches!(self, EvictionPolicy::AllkeysLfu | EvictionPolicy::VolatileLfu)
    }

    /// True when victims must carry a TTL.
    pub fn is_volatile(&self) -> bool {
        matches!(
            self,
            EvictionPolicy::VolatileLru
                | EvictionPolicy::VolatileLfu
                | EvictionPolicy::VolatileTtl
                | EvictionPolicy::VolatileRandom
        )
    }
}

impl FromStr for EvictionPolicy {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "noeviction" => Ok(EvictionPolicy::NoEviction),
            "allkeys-lru" => Ok(EvictionPolicy::AllkeysLru),
            "volatile-lru" => Ok(EvictionPolicy::VolatileLru),
            "allkeys-lfu" => Ok(EvictionPolicy::AllkeysLfu),
            "volatile-lfu" => Ok(EvictionPolicy::VolatileLfu),
            "volatile-ttl" => Ok(EvictionPolicy::VolatileTtl),
            "allkeys-random" => Ok(EvictionPolicy::AllkeysRandom),
            "volatile-random" => Ok(EvictionPolicy::VolatileRandom),
            other => Err(format!("unknown eviction policy '{}'", other)),
        }
    }
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EvictionPolicy::NoEviction => "noeviction",
            EvictionPolicy::AllkeysLru => "allkeys-lru",
            EvictionPolicy::VolatileLru => "volatile-lru",
            EvictionPolicy::AllkeysLfu => "allkeys-lfu",
            EvictionPolicy::VolatileLfu => "volatile-lfu",
            EvictionPolicy::VolatileTtl => "volatile-ttl",
            EvictionPolicy::AllkeysRandom => "allkeys-random",
            EvictionPolicy::VolatileRandom => "volatile-random",
        };
        f.write_str(name)
    }
}

/// Keys ordered by last-access time.
#[derive(Debug, Default)]
pub struct LruCache {
    tick: u64,
    order: BTreeMap<u64, String>,
    index: HashMap<String, u64, RandomState>,
}

impl LruCache {
    pub fn new() -> Self {
        LruCache::default()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Marks `key` as most recently used.
    pub fn touch(&mut self, key: &str) {
        if let Some(old) = self.index.get(key) {
            self.order.remove(old);
        }
        self.tick += 1;
        self.order.insert(self.tick, key.to_string());
        self.index.insert(key.to_string(), self.tick);
    }

    /// Drops `key` from the cache.
    pub fn remove(&mut self, key: &str) {
        if let Some(tick) = self.index.remove(key) {
            self.order.remove(&tick);
        }
    }

    /// Removes and returns the least-recently-used key.
    pub fn pop(&mut self) -> Option<String> {
        self.pop_where(|_| true)
    }

    /// Removes and returns the least-recently-used key matching `keep`.
    ///
    /// Non-matching keys stay in place.
    pub fn pop_where(&mut self, keep: impl Fn(&str) -> bool) -> Option<String> {
        let victim = self
            .order
            .values()
            .find(|key| keep(key.as_str()))
            .cloned()?;
        self.remove(&victim);
        Some(victim)
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.index.clear();
        self.tick = 0;
    }
}

/// Keys ordered by access count, ties broken by oldest access.
#[derive(Debug, Default)]
pub struct LfuCache {
    tick: u64,
    order: BTreeSet<(u64, u64, String)>,
    index: HashMap<String, (u64, u64), RandomState>,
}

impl LfuCache {
    pub fn new() -> Self {
        LfuCache::default()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Bumps the access count for `key` and refreshes its tick.
    pub fn touch(&mut self, key: &str) {
        self.tick += 1;
        let count = match self.index.get(key) {
            Some((count, tick)) => {
                self.order.remove(&(*count, *tick, key.to_string()));
                count + 1
            }
            None => 1,
        };
        self.order.insert((count, self.tick, key.to_string()));
        self.index.insert(key.to_string(), (count, self.tick));
    }

    /// Drops `key` from the cache.
    pub fn remove(&mut self, key: &str) {
        if let Some((count, tick)) = self.index.remove(key) {
            self.order.remove(&(count, tick, key.to_string()));
        }
    }

    /// Removes and returns the coldest key.
    pub fn pop(&mut self) -> Option<String> {
        self.pop_where(|_| true)
    }

    /// Removes and returns the coldest key matching `keep`.
    pub fn pop_where(&mut self, keep: impl Fn(&str) -> bool) -> Option<String> {
        let victim = self
            .order
            .iter()
            .find(|(_, _, key)| keep(key.as_str()))
            .map(|(_, _, key)| key.clone())?;
        self.remove(&victim);
        Some(victim)
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.index.clear();
        self.tick = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_parsing_round_trips() {
        for name in [
            "noeviction",
            "allkeys-lru",
            "volatile-lru",
            "allkeys-lfu",
            "volatile-lfu",
            "volatile-ttl",
            "allkeys-random",
            "volatile-random",
        ] {
            let policy: EvictionPolicy = name.parse().unwrap();
            assert_eq!(policy.to_string(), name);
        }
        assert!("sometimes-lru".parse::<EvictionPolicy>().is_err());
    }

    #[test]
    fn lru_pops_least_recent() {
        let mut lru = LruCache::new();
        lru.touch("a");
        lru.touch("b");
        lru.touch("c");
        lru.touch("a");

        assert_eq!(lru.pop(), Some("b".to_string()));
        assert_eq!(lru.pop(), Some("c".to_string()));
        assert_eq!(lru.pop(), Some("a".to_string()));
        assert_eq!(lru.pop(), None);
    }

    #[test]
    fn lru_touch_does_not_duplicate() {
        let mut lru = LruCache::new();
        lru.touch("a");
        lru.touch("a");
        assert_eq!(lru.len(), 1);
        lru.remove("a");
        assert!(lru.is_empty());
    }

    #[test]
    fn lru_filtered_pop_skips_without_evicting() {
        let mut lru = LruCache::new();
        lru.touch("keep");
        lru.touch("victim");
        let popped = lru.pop_where(|key| key == "victim");
        assert_eq!(popped, Some("victim".to_string()));
        assert_eq!(lru.len(), 1);
    }

    #[test]
    fn lfu_pops_smallest_count_then_oldest() {
        let mut lfu = LfuCache::new();
        lfu.touch("hot");
        lfu.touch("hot");
        lfu.touch("old");
        lfu.touch("new");

        // old and new both have count 1; old was touched first.
        assert_eq!(lfu.pop(), Some("old".to_string()));
        assert_eq!(lfu.pop(), Some("new".to_string()));
        assert_eq!(lfu.pop(), Some("hot".to_string()));
    }

    #[test]
    fn lfu_remove_clears_both_indexes() {
        let mut lfu = LfuCache::new();
        lfu.touch("a");
        lfu.touch("a");
        lfu.remove("a");
        assert!(lfu.is_empty());
        assert_eq!(lfu.pop(), None);
    }
}
