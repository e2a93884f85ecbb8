//! Resource-management layer for the Engram memory system.
//!
//! Every expensive or shared operation in the surrounding storage and
//! intelligence layers passes through one of three components:
//!
//! - [`cache::MultiLevelCache`]: a three-tier read-through/write-through
//!   cache with an in-process L1 and pluggable asynchronous L2/L3 tiers
//! - [`pool::ConnectionPool`]: a bounded pool of caller-defined resources
//!   with lazy growth and background health checking
//! - [`batch::BatchProcessor`]: an asynchronous queue that groups work
//!   items into batches and retries failures individually
//!
//! The components are independent of each other; callers wire concrete
//! resources (database handles, vector-store clients, write functions)
//! into them through the [`cache::CacheLevel`], [`pool::ConnectionFactory`],
//! and [`batch::BatchHandler`] seams.

pub mod batch;
pub mod cache;
pub mod pool;

pub use batch::{
    BatchConfig, BatchHandler, BatchItem, BatchOptions, BatchProcessor, BatchStatistics,
    ProcessingResult,
};
pub use cache::{CacheLevel, CacheStats, InMemoryLevel, MultiLevelCache, MultiLevelCacheConfig};
pub use pool::{
    ConnectionFactory, ConnectionPool, MetricsSnapshot, PoolConfig, PoolMetrics, PoolStats,
    PooledConnection, RetryPolicy,
};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::batch::{
        BatchConfig, BatchHandler, BatchItem, BatchOptions, BatchProcessor, BatchStatistics,
        ProcessingResult,
    };
    pub use crate::cache::{
        CacheLevel, CacheStats, InMemoryLevel, MultiLevelCache, MultiLevelCacheConfig,
    };
    pub use crate::pool::{
        ConnectionFactory, ConnectionPool, MetricsSnapshot, PoolConfig, PoolMetrics, PoolStats,
        PooledConnection, RetryPolicy,
    };
    pub use engram_core::{EngramError, Result};
}
