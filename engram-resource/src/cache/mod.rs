//! Multi-level caching for the Engram resource layer.
//!
//! A 3-tier read-through/write-through architecture:
//! - L1 (hot): in-process LRU with lazy TTL expiry, built into the cache
//! - L2 (warm): pluggable asynchronous tier supplied by the caller
//! - L3 (cold): pluggable asynchronous tier supplied by the caller
//!
//! Hits in a lower tier are promoted upward; L1 evicts by recency when
//! full. Lower-tier failures propagate to the caller rather than being
//! masked by a no-op tier.

pub mod level;
pub mod multi_level;

pub use level::{CacheLevel, InMemoryLevel};
pub use multi_level::{CacheStats, MultiLevelCache, MultiLevelCacheConfig};
