//! Three-tier cache with an in-process L1 and injected L2/L3 tiers.

use crate::cache::level::CacheLevel;
use engram_core::{EngramError, Result};
use serde::{Deserialize, Serialize};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Statistics for cache performance tracking
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    /// L1 cache hits
    pub l1_hits: u64,
    /// L2 cache hits
    pub l2_hits: u64,
    /// L3 cache hits
    pub l3_hits: u64,
    /// Misses across all configured tiers
    pub misses: u64,
    /// Total number of get operations
    pub total_gets: u64,
    /// Total number of set operations
    pub total_sets: u64,
    /// Total number of delete/clear invalidations
    pub total_invalidations: u64,
}

impl CacheStats {
    /// Aggregate hit rate (0.0 to 1.0): hits / (hits + misses).
    pub fn hit_rate(&self) -> f64 {
        let hits = self.l1_hits + self.l2_hits + self.l3_hits;
        let total = hits + self.misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

/// Configuration for the multi-level cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiLevelCacheConfig {
    /// L1 capacity in entries (hot data, in-process LRU)
    pub l1_capacity: usize,
    /// Default TTL applied when `set` is called without one
    pub default_ttl: Option<Duration>,
}

impl Default for MultiLevelCacheConfig {
    fn default() -> Self {
        Self {
            l1_capacity: 1_000,
            default_ttl: None,
        }
    }
}

struct L1Entry<V> {
    value: V,
    expires_at: Option<Instant>,
}

impl<V> L1Entry<V> {
    fn new(value: V, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Multi-level cache with L1 (hot, in-process) and pluggable L2/L3 tiers.
///
/// `get` walks L1 → L2 → L3 and promotes lower-tier hits into L1; the
/// L1 path never awaits. `set` writes through to every configured tier,
/// so a value set once is retrievable from any tier independently and
/// survives an L1 reset. L1 evicts its least-recently-used entry in O(1)
/// when at capacity; TTL expiry is enforced lazily at access time.
pub struct MultiLevelCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// L1 cache, hot data
    l1: Mutex<LruCache<String, L1Entry<V>>>,
    /// Optional warm tier
    l2: Option<Arc<dyn CacheLevel<V>>>,
    /// Optional cold tier
    l3: Option<Arc<dyn CacheLevel<V>>>,
    config: MultiLevelCacheConfig,
    stats: Mutex<CacheStats>,
}

impl<V> MultiLevelCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a new cache with only the L1 tier configured.
    ///
    /// Fails fast on a zero L1 capacity.
    pub fn new(config: MultiLevelCacheConfig) -> Result<Self> {
        let l1_cap = NonZeroUsize::new(config.l1_capacity)
            .ok_or_else(|| EngramError::config("L1 capacity must be greater than 0"))?;

        info!(
            l1_capacity = config.l1_capacity,
            default_ttl = ?config.default_ttl,
            "Initializing multi-level cache"
        );

        Ok(Self {
            l1: Mutex::new(LruCache::new(l1_cap)),
            l2: None,
            l3: None,
            config,
            stats: Mutex::new(CacheStats::default()),
        })
    }

    /// Attach a warm (L2) tier.
    pub fn with_l2(mut self, level: Arc<dyn CacheLevel<V>>) -> Self {
        self.l2 = Some(level);
        self
    }

    /// Attach a cold (L3) tier.
    pub fn with_l3(mut self, level: Arc<dyn CacheLevel<V>>) -> Self {
        self.l3 = Some(level);
        self
    }

    /// Get a value, checking L1 → L2 → L3.
    ///
    /// Returns `Ok(None)` only after every configured tier misses. A hit
    /// in L2 or L3 is promoted into L1 (counting as an L1 write for
    /// eviction purposes). Lower-tier failures propagate to the caller.
    pub async fn get(&self, key: &str) -> Result<Option<V>> {
        {
            let mut stats = self.stats.lock();
            stats.total_gets += 1;
        }

        // L1 check: a local lookup, never awaits.
        {
            let mut l1 = self.l1.lock();
            let expired = l1.peek(key).map(|entry| entry.is_expired());
            match expired {
                Some(false) => {
                    let value = l1.get(key).map(|entry| entry.value.clone());
                    debug!(key, "L1 cache hit");
                    let mut stats = self.stats.lock();
                    stats.l1_hits += 1;
                    return Ok(value);
                }
                Some(true) => {
                    l1.pop(key);
                    debug!(key, "L1 entry expired, removed lazily");
                }
                None => {}
            }
        }

        // L2 check
        if let Some(l2) = &self.l2 {
            if let Some(value) = l2.get(key).await? {
                debug!(key, "L2 cache hit, promoting to L1");
                {
                    let mut stats = self.stats.lock();
                    stats.l2_hits += 1;
                }
                self.insert_l1(key, value.clone());
                return Ok(Some(value));
            }
        }

        // L3 check
        if let Some(l3) = &self.l3 {
            if let Some(value) = l3.get(key).await? {
                debug!(key, "L3 cache hit, promoting to L1");
                {
                    let mut stats = self.stats.lock();
                    stats.l3_hits += 1;
                }
                self.insert_l1(key, value.clone());
                return Ok(Some(value));
            }
        }

        debug!(key, "cache miss");
        {
            let mut stats = self.stats.lock();
            stats.misses += 1;
        }

        Ok(None)
    }

    /// Write a value through to L1 and every configured lower tier.
    ///
    /// `ttl` falls back to the cache-wide default when omitted. A failure
    /// in a lower tier propagates; the L1 write is not rolled back.
    pub async fn set(&self, key: &str, value: V, ttl: Option<Duration>) -> Result<()> {
        {
            let mut stats = self.stats.lock();
            stats.total_sets += 1;
        }

        let ttl = ttl.or(self.config.default_ttl);

        {
            let mut l1 = self.l1.lock();
            if let Some((evicted_key, _)) = l1.push(key.to_string(), L1Entry::new(value.clone(), ttl))
            {
                // push returns the old entry when the key already existed
                if evicted_key != key {
                    debug!(key = %evicted_key, "L1 evicted least-recently-used entry");
                }
            }
        }

        if let Some(l2) = &self.l2 {
            l2.set(key, value.clone(), ttl).await?;
        }
        if let Some(l3) = &self.l3 {
            l3.set(key, value, ttl).await?;
        }

        Ok(())
    }

    /// Remove a key from every configured tier.
    pub async fn delete(&self, key: &str) -> Result<()> {
        {
            let mut stats = self.stats.lock();
            stats.total_invalidations += 1;
        }

        {
            let mut l1 = self.l1.lock();
            l1.pop(key);
        }

        if let Some(l2) = &self.l2 {
            l2.delete(key).await?;
        }
        if let Some(l3) = &self.l3 {
            l3.delete(key).await?;
        }

        Ok(())
    }

    /// Clear every configured tier. Statistics are cumulative and survive.
    pub async fn clear(&self) -> Result<()> {
        info!("Clearing all cache tiers");
        {
            let mut stats = self.stats.lock();
            stats.total_invalidations += 1;
        }

        {
            let mut l1 = self.l1.lock();
            l1.clear();
        }

        if let Some(l2) = &self.l2 {
            l2.clear().await?;
        }
        if let Some(l3) = &self.l3 {
            l3.clear().await?;
        }

        Ok(())
    }

    /// Snapshot of the cumulative counters. Touches no tier.
    pub fn stats(&self) -> CacheStats {
        self.stats.lock().clone()
    }

    /// Current number of L1 entries.
    pub fn l1_len(&self) -> usize {
        self.l1.lock().len()
    }

    /// Promotion re-applies the default TTL since lower tiers do not
    /// expose remaining lifetimes through the capability trait.
    fn insert_l1(&self, key: &str, value: V) {
        let mut l1 = self.l1.lock();
        if let Some((evicted_key, _)) =
            l1.push(key.to_string(), L1Entry::new(value, self.config.default_ttl))
        {
            if evicted_key != key {
                debug!(key = %evicted_key, "L1 evicted least-recently-used entry on promotion");
            }
        }
    }
}
