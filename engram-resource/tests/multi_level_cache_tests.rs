//! Integration tests for the multi-level cache with injected tiers.

use async_trait::async_trait;
use engram_core::{EngramError, Result};
use engram_resource::cache::{CacheLevel, InMemoryLevel, MultiLevelCache, MultiLevelCacheConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

fn config(l1_capacity: usize) -> MultiLevelCacheConfig {
    MultiLevelCacheConfig {
        l1_capacity,
        default_ttl: None,
    }
}

/// A tier whose every operation fails, for propagation tests.
struct FailingLevel;

#[async_trait]
impl CacheLevel<String> for FailingLevel {
    async fn get(&self, _key: &str) -> Result<Option<String>> {
        Err(EngramError::cache("tier unavailable"))
    }
    async fn set(&self, _key: &str, _value: String, _ttl: Option<Duration>) -> Result<()> {
        Err(EngramError::cache("tier unavailable"))
    }
    async fn delete(&self, _key: &str) -> Result<bool> {
        Err(EngramError::cache("tier unavailable"))
    }
    async fn clear(&self) -> Result<()> {
        Err(EngramError::cache("tier unavailable"))
    }
    async fn has(&self, _key: &str) -> Result<bool> {
        Err(EngramError::cache("tier unavailable"))
    }
    async fn size(&self) -> Result<usize> {
        Err(EngramError::cache("tier unavailable"))
    }
    async fn keys(&self) -> Result<Vec<String>> {
        Err(EngramError::cache("tier unavailable"))
    }
}

#[tokio::test]
async fn test_eviction_scenario_without_lower_tiers() {
    // l1_capacity = 2: "a", "b", "c" leaves "a" evicted and absent.
    let cache = MultiLevelCache::new(config(2)).unwrap();

    cache.set("a", 1, None).await.unwrap();
    cache.set("b", 2, None).await.unwrap();
    cache.set("c", 3, None).await.unwrap();

    assert_eq!(cache.get("a").await.unwrap(), None);
    assert_eq!(cache.get("b").await.unwrap(), Some(2));
    assert_eq!(cache.get("c").await.unwrap(), Some(3));
}

#[tokio::test]
async fn test_write_through_reaches_all_tiers() {
    let l2 = Arc::new(InMemoryLevel::new());
    let l3 = Arc::new(InMemoryLevel::new());
    let cache = MultiLevelCache::new(config(4))
        .unwrap()
        .with_l2(l2.clone())
        .with_l3(l3.clone());

    cache.set("event", "payload".to_string(), None).await.unwrap();

    assert!(l2.has("event").await.unwrap());
    assert!(l3.has("event").await.unwrap());
    assert_eq!(
        l3.get("event").await.unwrap(),
        Some("payload".to_string())
    );
}

#[tokio::test]
async fn test_round_trip_from_any_tier() {
    let l2 = Arc::new(InMemoryLevel::new());
    let l3 = Arc::new(InMemoryLevel::new());
    let cache = MultiLevelCache::new(config(2))
        .unwrap()
        .with_l2(l2.clone())
        .with_l3(l3.clone());

    cache.set("a", 1, None).await.unwrap();
    cache.set("b", 2, None).await.unwrap();
    cache.set("c", 3, None).await.unwrap(); // "a" evicted from L1

    // Still served, from L2.
    assert_eq!(cache.get("a").await.unwrap(), Some(1));
    assert_eq!(cache.stats().l2_hits, 1);

    // Remove from L2 as well: L3 is the last resort.
    cache.set("d", 4, None).await.unwrap(); // "b" or older evicted from L1
    l2.delete("b").await.unwrap();
    assert_eq!(cache.get("b").await.unwrap(), Some(2));
    assert_eq!(cache.stats().l3_hits, 1);

    // Absent everywhere.
    assert_eq!(cache.get("nope").await.unwrap(), None);
    assert_eq!(cache.stats().misses, 1);
}

#[tokio::test]
async fn test_promotion_applies_l1_eviction() {
    let l2 = Arc::new(InMemoryLevel::new());
    let cache = MultiLevelCache::new(config(2))
        .unwrap()
        .with_l2(l2.clone());

    cache.set("a", 1, None).await.unwrap();
    cache.set("b", 2, None).await.unwrap();
    cache.set("c", 3, None).await.unwrap(); // L1: {b, c}

    // L2 hit on "a" promotes it, evicting "b" from L1.
    assert_eq!(cache.get("a").await.unwrap(), Some(1));
    assert_eq!(cache.l1_len(), 2);

    // "a" now answers from L1.
    cache.get("a").await.unwrap();
    assert_eq!(cache.stats().l1_hits, 1);
}

#[tokio::test]
async fn test_delete_removes_from_every_tier() {
    let l2 = Arc::new(InMemoryLevel::new());
    let l3 = Arc::new(InMemoryLevel::new());
    let cache = MultiLevelCache::new(config(4))
        .unwrap()
        .with_l2(l2.clone())
        .with_l3(l3.clone());

    cache.set("gone", 1, None).await.unwrap();
    cache.delete("gone").await.unwrap();

    assert_eq!(cache.get("gone").await.unwrap(), None);
    assert!(!l2.has("gone").await.unwrap());
    assert!(!l3.has("gone").await.unwrap());
}

#[tokio::test]
async fn test_clear_empties_every_tier() {
    let l2 = Arc::new(InMemoryLevel::new());
    let l3 = Arc::new(InMemoryLevel::new());
    let cache = MultiLevelCache::new(config(4))
        .unwrap()
        .with_l2(l2.clone())
        .with_l3(l3.clone());

    cache.set("a", 1, None).await.unwrap();
    cache.set("b", 2, None).await.unwrap();
    cache.clear().await.unwrap();

    assert_eq!(cache.l1_len(), 0);
    assert_eq!(l2.size().await.unwrap(), 0);
    assert_eq!(l3.size().await.unwrap(), 0);

    // Counters are cumulative and survive a clear.
    assert_eq!(cache.stats().total_sets, 2);
}

#[tokio::test]
async fn test_ttl_expires_across_tiers() {
    let l2 = Arc::new(InMemoryLevel::new());
    let cache = MultiLevelCache::new(config(4))
        .unwrap()
        .with_l2(l2.clone());

    cache
        .set("short", 1, Some(Duration::from_millis(25)))
        .await
        .unwrap();
    assert_eq!(cache.get("short").await.unwrap(), Some(1));

    sleep(Duration::from_millis(50)).await;
    assert_eq!(cache.get("short").await.unwrap(), None);
}

#[tokio::test]
async fn test_default_ttl_applies_when_omitted() {
    let cache = MultiLevelCache::<i32>::new(MultiLevelCacheConfig {
        l1_capacity: 4,
        default_ttl: Some(Duration::from_millis(25)),
    })
    .unwrap();

    cache.set("k", 7, None).await.unwrap();
    assert_eq!(cache.get("k").await.unwrap(), Some(7));

    sleep(Duration::from_millis(50)).await;
    assert_eq!(cache.get("k").await.unwrap(), None);
}

#[tokio::test]
async fn test_lower_tier_failure_propagates() {
    let cache = MultiLevelCache::new(config(2)).unwrap().with_l2(Arc::new(FailingLevel));

    // The L1 write lands first, so the hit path still works...
    let err = cache.set("k", "v".to_string(), None).await.err().unwrap();
    assert!(matches!(err, EngramError::Cache(_)));
    assert_eq!(cache.get("k").await.unwrap(), Some("v".to_string()));

    // ...but an L1 miss that must consult the failing tier errors.
    let err = cache.get("absent").await.err().unwrap();
    assert!(matches!(err, EngramError::Cache(_)));
}

#[tokio::test]
async fn test_stats_never_touch_tiers() {
    // stats() stays usable even when every lower tier is failing.
    let cache = MultiLevelCache::new(config(2)).unwrap().with_l2(Arc::new(FailingLevel));

    let _ = cache.set("k", "v".to_string(), None).await;
    let stats = cache.stats();
    assert_eq!(stats.total_sets, 1);
    assert_eq!(stats.hit_rate(), 0.0);
}
