//! Generic bounded connection pooling.
//!
//! The pool manages opaque resource handles produced by a caller-supplied
//! [`ConnectionFactory`]: warm-up to a minimum size, lazy growth to a
//! maximum, FIFO queueing with an acquire timeout, and a background
//! health monitor that destroys failed connections and replenishes the
//! pool back toward its minimum.

pub mod connection_pool;

pub use connection_pool::{
    ConnectionFactory, ConnectionPool, MetricsSnapshot, PoolConfig, PoolMetrics, PoolStats,
    PooledConnection, RetryPolicy,
};
