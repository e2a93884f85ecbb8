//! Bounded pool of caller-defined resources with health monitoring.
//!
//! Features:
//! - Eager warm-up to a minimum size, lazy growth to a maximum
//! - FIFO acquisition with a configurable timeout
//! - Background health checking with min-size replenishment
//! - Lifecycle hooks and retry logic for transient factory failures
//! - Metrics and observability

use async_trait::async_trait;
use engram_core::{EngramError, Result};
use serde::{Deserialize, Serialize};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

// ==============================================================================
// Factory
// ==============================================================================

/// Produces and inspects the resources the pool manages.
///
/// The pool is generic over this seam: database handles, vector-store
/// clients, anything `Send`. Lifecycle hooks default to no-ops.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    type Connection: Send + 'static;

    /// Construct one resource. Transient failures may be retried per the
    /// pool's [`RetryPolicy`].
    async fn create(&self) -> Result<Self::Connection>;

    /// Health predicate. A connection that fails this check is destroyed,
    /// never reused.
    async fn is_healthy(&self, conn: &Self::Connection) -> bool;

    /// Called after a connection is successfully constructed.
    fn on_create(&self, _conn: &Self::Connection) {}

    /// Called just before a connection is destroyed.
    fn on_destroy(&self, _conn: &Self::Connection) {}

    /// Called when a connection is handed out.
    fn on_acquire(&self, _conn: &Self::Connection) {}

    /// Called when a connection returns to the idle set.
    fn on_release(&self, _conn: &Self::Connection) {}
}

// ==============================================================================
// Configuration
// ==============================================================================

/// Retry policy for transient factory failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,
    /// Initial backoff duration
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Backoff multiplier
    pub multiplier: f64,
}

impl RetryPolicy {
    /// Calculate backoff delay for given attempt
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let delay =
            self.initial_backoff.as_secs_f64() * self.multiplier.powi(attempt as i32 - 1);
        Duration::from_secs_f64(delay.min(self.max_backoff.as_secs_f64()))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(5),
            multiplier: 1.5,
        }
    }
}

/// Connection pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Minimum number of connections to maintain
    pub min_size: usize,
    /// Maximum number of connections allowed
    pub max_size: usize,
    /// Timeout for acquiring a connection from the pool
    pub acquire_timeout: Duration,
    /// Cadence of the background health sweep (zero disables it)
    pub health_check_interval: Duration,
    /// Re-check health before handing out an idle connection
    pub validate_on_acquire: bool,
    /// Retry policy for transient factory failures
    pub retry_policy: RetryPolicy,
}

impl PoolConfig {
    /// Fail fast on sizes that could never form a working pool.
    fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(EngramError::config("pool max_size must be greater than 0"));
        }
        if self.min_size > self.max_size {
            return Err(EngramError::config(format!(
                "pool min_size ({}) exceeds max_size ({})",
                self.min_size, self.max_size
            )));
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 2,
            max_size: 10,
            acquire_timeout: Duration::from_secs(10),
            health_check_interval: Duration::from_secs(30),
            validate_on_acquire: false,
            retry_policy: RetryPolicy::default(),
        }
    }
}

// ==============================================================================
// Statistics and Metrics
// ==============================================================================

/// Point-in-time pool occupancy. `total == active + idle` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub total: usize,
    pub active: usize,
    pub idle: usize,
}

/// Cumulative pool counters.
#[derive(Debug, Default)]
pub struct PoolMetrics {
    pub connections_created: AtomicU64,
    pub connections_reused: AtomicU64,
    pub connections_closed: AtomicU64,
    pub acquisition_timeouts: AtomicU64,
    pub health_checks_passed: AtomicU64,
    pub health_checks_failed: AtomicU64,
    pub retries: AtomicU64,
}

impl PoolMetrics {
    /// Get metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_created: self.connections_created.load(Ordering::Relaxed),
            connections_reused: self.connections_reused.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            acquisition_timeouts: self.acquisition_timeouts.load(Ordering::Relaxed),
            health_checks_passed: self.health_checks_passed.load(Ordering::Relaxed),
            health_checks_failed: self.health_checks_failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of cumulative pool counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub connections_created: u64,
    pub connections_reused: u64,
    pub connections_closed: u64,
    pub acquisition_timeouts: u64,
    pub health_checks_passed: u64,
    pub health_checks_failed: u64,
    pub retries: u64,
}

// ==============================================================================
// Pool Internals
// ==============================================================================

struct PoolEntry<C> {
    id: Uuid,
    conn: C,
    created_at: Instant,
    last_used: Instant,
}

/// All occupancy bookkeeping mutates behind this single mutex, so
/// `total == idle.len() + checked-out handles` at every observable
/// instant.
struct PoolState<C> {
    idle: VecDeque<PoolEntry<C>>,
    total: usize,
}

/// A slot counted in `total` ahead of factory construction. Rolls the
/// count back on drop unless committed, so a failed or cancelled create
/// never strands a phantom connection.
struct SlotReservation<'a, C> {
    state: &'a Mutex<PoolState<C>>,
    committed: bool,
}

impl<'a, C> SlotReservation<'a, C> {
    fn try_reserve(state: &'a Mutex<PoolState<C>>, max_size: usize) -> Option<Self> {
        let mut guard = state.lock();
        if guard.total < max_size {
            guard.total += 1;
            Some(Self {
                state,
                committed: false,
            })
        } else {
            None
        }
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl<C> Drop for SlotReservation<'_, C> {
    fn drop(&mut self) {
        if !self.committed {
            let mut guard = self.state.lock();
            guard.total -= 1;
        }
    }
}

/// Holds a connection popped from the idle set while it is validated.
/// If the acquire future is dropped mid-check, the connection goes back
/// to the idle set instead of leaking out of the accounting.
struct CheckoutGuard<'a, C> {
    state: &'a Mutex<PoolState<C>>,
    entry: Option<PoolEntry<C>>,
}

impl<'a, C> CheckoutGuard<'a, C> {
    fn new(state: &'a Mutex<PoolState<C>>, entry: PoolEntry<C>) -> Self {
        Self {
            state,
            entry: Some(entry),
        }
    }

    fn conn(&self) -> &C {
        &self
            .entry
            .as_ref()
            .expect("connection checked out of guard")
            .conn
    }

    fn into_entry(mut self) -> PoolEntry<C> {
        self.entry.take().expect("connection checked out of guard")
    }
}

impl<C> Drop for CheckoutGuard<'_, C> {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            let mut state = self.state.lock();
            state.idle.push_front(entry);
        }
    }
}

struct PoolInner<F: ConnectionFactory> {
    factory: F,
    config: PoolConfig,
    state: Mutex<PoolState<F::Connection>>,
    /// Fair semaphore with `max_size` permits; every checked-out handle
    /// holds one, so waiters are served FIFO as releases occur.
    slots: Arc<Semaphore>,
    shutdown: AtomicBool,
    metrics: PoolMetrics,
    monitor_running: AtomicBool,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl<F: ConnectionFactory> PoolInner<F> {
    async fn create_with_retry(&self) -> Result<F::Connection> {
        let policy = &self.config.retry_policy;
        let mut attempt: u32 = 0;
        loop {
            match self.factory.create().await {
                Ok(conn) => return Ok(conn),
                Err(e) => {
                    attempt += 1;
                    if attempt >= policy.max_attempts.max(1) {
                        return Err(e);
                    }
                    let delay = policy.calculate_delay(attempt);
                    warn!(
                        attempt,
                        max_attempts = policy.max_attempts,
                        error = %e,
                        "connection factory failed, retrying in {:?}", delay
                    );
                    self.metrics.retries.fetch_add(1, Ordering::Relaxed);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Construct a connection and run creation-side effects. Counting
    /// it into `state.total` is the caller's responsibility.
    async fn create_connection(&self) -> Result<PoolEntry<F::Connection>> {
        let conn = self.create_with_retry().await?;
        self.factory.on_create(&conn);
        self.metrics
            .connections_created
            .fetch_add(1, Ordering::Relaxed);
        let entry = PoolEntry {
            id: Uuid::new_v4(),
            conn,
            created_at: Instant::now(),
            last_used: Instant::now(),
        };
        debug!(id = %entry.id, "connection created");
        Ok(entry)
    }

    /// Remove a constructed connection from the pool's accounting and
    /// run its destruction hook.
    fn discard(&self, entry: PoolEntry<F::Connection>) {
        {
            let mut state = self.state.lock();
            state.total -= 1;
        }
        self.factory.on_destroy(&entry.conn);
        self.metrics
            .connections_closed
            .fetch_add(1, Ordering::Relaxed);
        debug!(id = %entry.id, "connection destroyed");
    }

    /// Health-check idle connections one at a time, destroying failures.
    /// Each connection stays guarded while its check is in flight, so an
    /// aborted sweep cannot strand it outside the accounting.
    async fn check_idle(&self) {
        debug!("running idle connection health sweep");
        let count = {
            let state = self.state.lock();
            state.idle.len()
        };

        for _ in 0..count {
            let entry = {
                let mut state = self.state.lock();
                state.idle.pop_front()
            };
            let Some(entry) = entry else { return };

            let guard = CheckoutGuard::new(&self.state, entry);
            let healthy = self.factory.is_healthy(guard.conn()).await;
            let entry = guard.into_entry();

            if healthy {
                self.metrics
                    .health_checks_passed
                    .fetch_add(1, Ordering::Relaxed);
                let mut state = self.state.lock();
                state.idle.push_back(entry);
            } else {
                warn!(id = %entry.id, "idle connection failed health check, destroying");
                self.metrics
                    .health_checks_failed
                    .fetch_add(1, Ordering::Relaxed);
                self.discard(entry);
            }
        }
    }

    /// Create replacements in the background while below `min_size`.
    ///
    /// The connection is constructed before it is counted, so a
    /// cancelled sweep can never strand a phantom slot in `total`.
    async fn replenish(&self) {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return;
            }
            let below_min = {
                let state = self.state.lock();
                state.total < self.config.min_size
            };
            if !below_min {
                return;
            }
            match self.create_connection().await {
                Ok(entry) => {
                    let mut state = self.state.lock();
                    if !self.shutdown.load(Ordering::SeqCst)
                        && state.total < self.config.max_size
                    {
                        state.total += 1;
                        state.idle.push_back(entry);
                        drop(state);
                        debug!("replenished pool below minimum size");
                    } else {
                        drop(state);
                        // Acquirers filled the pool first, or it shut
                        // down; this connection was never counted.
                        self.factory.on_destroy(&entry.conn);
                        self.metrics
                            .connections_closed
                            .fetch_add(1, Ordering::Relaxed);
                        return;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "failed to replenish connection");
                    return;
                }
            }
        }
    }
}

// ==============================================================================
// Connection Pool
// ==============================================================================

/// Generic bounded pool of caller-defined resources.
///
/// `acquire()` hands out an idle healthy connection, creates one while
/// under `max_size`, or queues FIFO until a release or the acquire
/// timeout. Handles return themselves to the pool on drop.
pub struct ConnectionPool<F: ConnectionFactory> {
    inner: Arc<PoolInner<F>>,
}

impl<F: ConnectionFactory> Clone for ConnectionPool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<F: ConnectionFactory> ConnectionPool<F> {
    /// Create a new pool. Fails fast on an invalid configuration; no
    /// connections are constructed until [`initialize`](Self::initialize)
    /// or the first [`acquire`](Self::acquire).
    pub fn new(factory: F, config: PoolConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            inner: Arc::new(PoolInner {
                factory,
                slots: Arc::new(Semaphore::new(config.max_size)),
                config,
                state: Mutex::new(PoolState {
                    idle: VecDeque::new(),
                    total: 0,
                }),
                shutdown: AtomicBool::new(false),
                metrics: PoolMetrics::default(),
                monitor_running: AtomicBool::new(false),
                monitor: Mutex::new(None),
            }),
        })
    }

    /// Warm the pool up to `min_size` idle connections and start the
    /// health monitor.
    ///
    /// Individual warm-up failures are tolerated; the shortfall shows up
    /// in [`stats`](Self::stats) and the monitor keeps replenishing.
    pub async fn initialize(&self) -> Result<()> {
        info!(
            min_size = self.inner.config.min_size,
            "warming up connection pool"
        );

        for _ in 0..self.inner.config.min_size {
            match self.inner.create_connection().await {
                Ok(entry) => {
                    let mut state = self.inner.state.lock();
                    state.total += 1;
                    state.idle.push_back(entry);
                }
                Err(e) => {
                    warn!(error = %e, "warm-up connection creation failed");
                }
            }
        }

        self.start_health_monitor();

        info!(total = self.stats().total, "connection pool warmed up");
        Ok(())
    }

    /// Acquire a connection.
    ///
    /// Resolution order: an idle healthy connection, a freshly created
    /// one while `total < max_size`, or a FIFO wait until a release or
    /// `acquire_timeout` elapses. A timed-out acquire fails with a
    /// timeout error and leaves the pool's size unchanged. Factory
    /// errors propagate without corrupting the pool's accounting.
    pub async fn acquire(&self) -> Result<PooledConnection<F>> {
        if self.inner.shutdown.load(Ordering::SeqCst) {
            return Err(EngramError::pool("pool has been destroyed"));
        }

        // The permit wait is the only part governed by acquire_timeout;
        // factory construction time is not counted against it.
        let permit = match timeout(
            self.inner.config.acquire_timeout,
            self.inner.slots.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(EngramError::pool("pool has been destroyed")),
            Err(_) => {
                self.inner
                    .metrics
                    .acquisition_timeouts
                    .fetch_add(1, Ordering::Relaxed);
                return Err(EngramError::timeout(format!(
                    "no connection available within {:?}",
                    self.inner.config.acquire_timeout
                )));
            }
        };

        loop {
            if self.inner.shutdown.load(Ordering::SeqCst) {
                return Err(EngramError::pool("pool has been destroyed"));
            }

            let candidate = {
                let mut state = self.inner.state.lock();
                state.idle.pop_front()
            };

            match candidate {
                Some(mut entry) => {
                    if self.inner.config.validate_on_acquire {
                        let guard = CheckoutGuard::new(&self.inner.state, entry);
                        let healthy = self.inner.factory.is_healthy(guard.conn()).await;
                        entry = guard.into_entry();
                        if !healthy {
                            warn!(id = %entry.id, "connection failed validation on acquire, discarding");
                            self.inner
                                .metrics
                                .health_checks_failed
                                .fetch_add(1, Ordering::Relaxed);
                            self.inner.discard(entry);
                            continue;
                        }
                    }
                    entry.last_used = Instant::now();
                    self.inner.factory.on_acquire(&entry.conn);
                    self.inner
                        .metrics
                        .connections_reused
                        .fetch_add(1, Ordering::Relaxed);
                    debug!(id = %entry.id, "connection reused");
                    return Ok(PooledConnection {
                        entry: Some(entry),
                        pool: self.inner.clone(),
                        permit: Some(permit),
                    });
                }
                None => {
                    let reservation = match SlotReservation::try_reserve(
                        &self.inner.state,
                        self.inner.config.max_size,
                    ) {
                        Some(reservation) => reservation,
                        None => {
                            // Every slot is constructed and momentarily
                            // in transit (e.g. under validation); retry
                            // the idle queue.
                            tokio::task::yield_now().await;
                            continue;
                        }
                    };
                    match self.inner.create_connection().await {
                        Ok(entry) => {
                            reservation.commit();
                            self.inner.factory.on_acquire(&entry.conn);
                            return Ok(PooledConnection {
                                entry: Some(entry),
                                pool: self.inner.clone(),
                                permit: Some(permit),
                            });
                        }
                        // The reservation rolls back and the permit
                        // drops with this frame, waking the next FIFO
                        // waiter.
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }

    /// Point-in-time occupancy. Synchronous and cheap enough to call at
    /// high frequency.
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        PoolStats {
            total: state.total,
            active: state.total - state.idle.len(),
            idle: state.idle.len(),
        }
    }

    /// Snapshot of the cumulative counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Shut the pool down. Idempotent.
    ///
    /// Pending and future `acquire()` calls fail immediately; idle
    /// connections are destroyed now, active ones as their handles drop.
    pub async fn destroy(&self) {
        if self.inner.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("destroying connection pool");

        self.inner.slots.close();

        self.inner.monitor_running.store(false, Ordering::Relaxed);
        let handle = {
            let mut monitor = self.inner.monitor.lock();
            monitor.take()
        };
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }

        let drained: Vec<PoolEntry<F::Connection>> = {
            let mut state = self.inner.state.lock();
            state.idle.drain(..).collect()
        };
        for entry in drained {
            self.inner.discard(entry);
        }
    }

    fn start_health_monitor(&self) {
        let interval = self.inner.config.health_check_interval;
        if interval.is_zero() {
            return;
        }

        let mut monitor = self.inner.monitor.lock();
        if monitor.is_some() {
            return;
        }
        self.inner.monitor_running.store(true, Ordering::Relaxed);

        let inner = self.inner.clone();
        *monitor = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // Skip the immediate tick so warmed connections settle first.
            ticker.tick().await;
            while inner.monitor_running.load(Ordering::Relaxed) {
                ticker.tick().await;
                if !inner.monitor_running.load(Ordering::Relaxed) {
                    break;
                }
                inner.check_idle().await;
                inner.replenish().await;
            }
        }));
    }
}

// ==============================================================================
// Pooled Connection
// ==============================================================================

/// A connection checked out of the pool, returned automatically on drop.
pub struct PooledConnection<F: ConnectionFactory> {
    entry: Option<PoolEntry<F::Connection>>,
    pool: Arc<PoolInner<F>>,
    permit: Option<OwnedSemaphorePermit>,
}

impl<F: ConnectionFactory> PooledConnection<F> {
    fn entry(&self) -> &PoolEntry<F::Connection> {
        self.entry
            .as_ref()
            .expect("pooled connection accessed after release")
    }

    /// The underlying resource.
    pub fn connection(&self) -> &F::Connection {
        &self.entry().conn
    }

    /// Pool-assigned connection id.
    pub fn id(&self) -> Uuid {
        self.entry().id
    }

    /// When the underlying resource was constructed.
    pub fn created_at(&self) -> Instant {
        self.entry().created_at
    }
}

impl<F: ConnectionFactory> Drop for PooledConnection<F> {
    fn drop(&mut self) {
        if let Some(mut entry) = self.entry.take() {
            self.pool.factory.on_release(&entry.conn);
            // The shutdown check happens under the state lock so a
            // concurrent destroy() cannot drain the idle set between the
            // check and the push.
            let rejected = {
                let mut state = self.pool.state.lock();
                if self.pool.shutdown.load(Ordering::SeqCst) {
                    Some(entry)
                } else {
                    entry.last_used = Instant::now();
                    state.idle.push_back(entry);
                    None
                }
            };
            if let Some(entry) = rejected {
                self.pool.discard(entry);
            }
        }
        // Released after the connection is back in the idle set, so the
        // woken FIFO waiter finds it there.
        let _ = self.permit.take();
    }
}
