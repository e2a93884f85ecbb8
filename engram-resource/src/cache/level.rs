//! The pluggable cache-tier capability and an in-memory reference tier.

use async_trait::async_trait;
use engram_core::Result;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// An asynchronous key/value store usable as an L2 or L3 cache tier.
///
/// Implementations are injected into [`MultiLevelCache`]; the cache never
/// depends on a concrete backing store. Values are opaque to the tier.
///
/// [`MultiLevelCache`]: crate::cache::MultiLevelCache
#[async_trait]
pub trait CacheLevel<V>: Send + Sync
where
    V: Clone + Send + Sync + 'static,
{
    /// Look up a value by key. Expired entries count as absent.
    async fn get(&self, key: &str) -> Result<Option<V>>;

    /// Store a value, optionally bounded by a time-to-live.
    async fn set(&self, key: &str, value: V, ttl: Option<Duration>) -> Result<()>;

    /// Remove a key. Returns whether the key was present.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Remove every key.
    async fn clear(&self) -> Result<()>;

    /// Whether a live (non-expired) entry exists for the key.
    async fn has(&self, key: &str) -> Result<bool>;

    /// Number of live entries.
    async fn size(&self) -> Result<usize>;

    /// Keys of all live entries.
    async fn keys(&self) -> Result<Vec<String>>;
}

struct StoredEntry<V> {
    value: V,
    expires_at: Option<Instant>,
}

impl<V> StoredEntry<V> {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-memory [`CacheLevel`] implementation.
///
/// Available in all builds so integration tests and single-process
/// deployments can wire a lower tier without an external store.
pub struct InMemoryLevel<V> {
    entries: RwLock<HashMap<String, StoredEntry<V>>>,
}

impl<V> InMemoryLevel<V> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<V> Default for InMemoryLevel<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<V> CacheLevel<V> for InMemoryLevel<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Result<Option<V>> {
        {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(entry) if !entry.is_expired() => return Ok(Some(entry.value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }
        // Expired entry is removed lazily.
        self.entries.write().remove(key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: V, ttl: Option<Duration>) -> Result<()> {
        let entry = StoredEntry {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.entries.write().insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.write().remove(key).is_some())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.write().clear();
        Ok(())
    }

    async fn has(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn size(&self) -> Result<usize> {
        let entries = self.entries.read();
        Ok(entries.values().filter(|e| !e.is_expired()).count())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let entries = self.entries.read();
        Ok(entries
            .iter()
            .filter(|(_, e)| !e.is_expired())
            .map(|(k, _)| k.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_in_memory_level_basic() {
        let level = InMemoryLevel::new();

        level.set("a", 1u32, None).await.unwrap();
        assert_eq!(level.get("a").await.unwrap(), Some(1));
        assert!(level.has("a").await.unwrap());
        assert_eq!(level.size().await.unwrap(), 1);

        assert!(level.delete("a").await.unwrap());
        assert!(!level.delete("a").await.unwrap());
        assert_eq!(level.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_in_memory_level_ttl() {
        let level = InMemoryLevel::new();

        level
            .set("short", "v".to_string(), Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(level.has("short").await.unwrap());

        sleep(Duration::from_millis(40)).await;
        assert_eq!(level.get("short").await.unwrap(), None);
        assert_eq!(level.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_in_memory_level_keys_and_clear() {
        let level = InMemoryLevel::new();

        level.set("a", 1u32, None).await.unwrap();
        level.set("b", 2u32, None).await.unwrap();

        let mut keys = level.keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);

        level.clear().await.unwrap();
        assert_eq!(level.size().await.unwrap(), 0);
    }
}
