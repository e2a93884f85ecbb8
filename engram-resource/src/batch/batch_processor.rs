//! Queue, dispatch loop, and retry bookkeeping for batched work.
//!
//! Batching behavior:
//! - FIFO dequeue by default, priority order when a comparator is set
//! - Batches are homogeneous by type tag; per-type size overrides
//! - Backpressure delays `add_item` once `max_queue_size` is reached
//! - Per-item retry with an explicit attempt counter and result isolation

use async_trait::async_trait;
use engram_core::{EngramError, Result};
use serde::{Deserialize, Serialize};
use parking_lot::Mutex;
use std::cmp::Ordering as CmpOrdering;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

// ==============================================================================
// Items and Results
// ==============================================================================

/// A unit of work submitted to the processor.
///
/// `id` must be unique for the processor's lifetime; results are matched
/// back to items by it.
#[derive(Debug, Clone)]
pub struct BatchItem<T> {
    pub id: String,
    pub item_type: String,
    pub payload: T,
    pub priority: Option<i64>,
}

impl<T> BatchItem<T> {
    pub fn new(id: impl Into<String>, item_type: impl Into<String>, payload: T) -> Self {
        Self {
            id: id.into(),
            item_type: item_type.into(),
            payload,
            priority: None,
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// Outcome for a single item, produced one-to-one with the dispatched
/// batch and matched by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub id: String,
    pub success: bool,
    pub error: Option<String>,
}

impl ProcessingResult {
    pub fn success(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            success: true,
            error: None,
        }
    }

    pub fn failure(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Processes one dispatched batch.
///
/// Implementations return a [`ProcessingResult`] per input item. A
/// whole-call `Err` counts as a failed attempt for every item in the
/// batch; each still retries independently.
#[async_trait]
pub trait BatchHandler<T>: Send + Sync + 'static
where
    T: Send + 'static,
{
    async fn process(&self, items: &[BatchItem<T>]) -> Result<Vec<ProcessingResult>>;
}

// ==============================================================================
// Configuration
// ==============================================================================

/// Batch processor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Maximum items per processing call
    pub batch_size: usize,
    /// Per-type overrides of `batch_size`
    pub type_batch_sizes: HashMap<String, usize>,
    /// Queue capacity; reaching it delays `add_item`
    pub max_queue_size: usize,
    /// Failed attempts allowed beyond the first before an item is
    /// recorded as permanently failed
    pub retry_limit: u32,
    /// Cadence of the background dispatch loop
    pub processing_interval: Duration,
}

impl BatchConfig {
    fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(EngramError::config("batch_size must be greater than 0"));
        }
        if self.max_queue_size == 0 {
            return Err(EngramError::config("max_queue_size must be greater than 0"));
        }
        if self.processing_interval.is_zero() {
            return Err(EngramError::config(
                "processing_interval must be greater than 0",
            ));
        }
        if let Some((item_type, _)) = self.type_batch_sizes.iter().find(|(_, size)| **size == 0) {
            return Err(EngramError::config(format!(
                "type batch size for '{item_type}' must be greater than 0"
            )));
        }
        Ok(())
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            type_batch_sizes: HashMap::new(),
            max_queue_size: 1_000,
            retry_limit: 3,
            processing_interval: Duration::from_millis(100),
        }
    }
}

/// Comparator deciding dispatch order when priority ordering is wanted.
pub type PriorityComparator<T> =
    Box<dyn Fn(&BatchItem<T>, &BatchItem<T>) -> CmpOrdering + Send + Sync>;

/// Callback invoked when an item exhausts its retries.
pub type FailureCallback<T> = Box<dyn Fn(&BatchItem<T>, Option<&str>) + Send + Sync>;

/// Non-serializable configuration: dispatch-order comparator and the
/// permanent-failure callback.
pub struct BatchOptions<T> {
    /// When set, each dispatch dequeues in this order instead of FIFO.
    pub priority_comparator: Option<PriorityComparator<T>>,
    /// Observes items whose retries are exhausted.
    pub on_permanent_failure: Option<FailureCallback<T>>,
}

impl<T> Default for BatchOptions<T> {
    fn default() -> Self {
        Self {
            priority_comparator: None,
            on_permanent_failure: None,
        }
    }
}

impl<T> BatchOptions<T> {
    /// Orders by descending `priority`, unprioritized items last.
    pub fn highest_priority_first() -> Self {
        Self {
            priority_comparator: Some(Box::new(|a, b| {
                b.priority
                    .unwrap_or(i64::MIN)
                    .cmp(&a.priority.unwrap_or(i64::MIN))
            })),
            on_permanent_failure: None,
        }
    }
}

// ==============================================================================
// Statistics
// ==============================================================================

#[derive(Debug, Default)]
struct StatCounters {
    total_processed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

/// Monotonically non-decreasing terminal-outcome counters.
///
/// `total_processed` counts each accepted item exactly once, at the
/// moment it reaches a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStatistics {
    pub total_processed: u64,
    pub succeeded: u64,
    pub failed: u64,
}

// ==============================================================================
// Processor
// ==============================================================================

struct QueuedItem<T> {
    item: BatchItem<T>,
    /// Failed attempts so far.
    attempts: u32,
    /// Queue-capacity permit; travels with the item until its terminal
    /// state so retries re-enter the queue without deadlocking the loop.
    _permit: OwnedSemaphorePermit,
}

struct ProcessorInner<T, H> {
    handler: H,
    config: BatchConfig,
    options: BatchOptions<T>,
    queue: Mutex<VecDeque<QueuedItem<T>>>,
    capacity: Arc<Semaphore>,
    /// Items accepted but not yet terminal.
    pending: AtomicUsize,
    /// Signaled after every dispatched batch.
    progress: Notify,
    stats: StatCounters,
    running: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Asynchronous batching queue with a background dispatch loop.
pub struct BatchProcessor<T, H>
where
    T: Send + 'static,
    H: BatchHandler<T>,
{
    inner: Arc<ProcessorInner<T, H>>,
}

impl<T, H> Clone for BatchProcessor<T, H>
where
    T: Send + 'static,
    H: BatchHandler<T>,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T, H> BatchProcessor<T, H>
where
    T: Send + 'static,
    H: BatchHandler<T>,
{
    /// Create a processor with default options. Fails fast on an invalid
    /// configuration.
    pub fn new(handler: H, config: BatchConfig) -> Result<Self> {
        Self::with_options(handler, config, BatchOptions::default())
    }

    /// Create a processor with a priority comparator and/or a
    /// permanent-failure callback.
    pub fn with_options(handler: H, config: BatchConfig, options: BatchOptions<T>) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            inner: Arc::new(ProcessorInner {
                handler,
                capacity: Arc::new(Semaphore::new(config.max_queue_size)),
                config,
                options,
                queue: Mutex::new(VecDeque::new()),
                pending: AtomicUsize::new(0),
                progress: Notify::new(),
                stats: StatCounters::default(),
                running: AtomicBool::new(false),
                worker: Mutex::new(None),
            }),
        })
    }

    /// Enqueue a work item.
    ///
    /// Backpressure is a delay, not a rejection: once the queue holds
    /// `max_queue_size` non-terminal items, the call suspends until one
    /// of them reaches a terminal state. Accepted items are never
    /// dropped.
    pub async fn add_item(&self, item: BatchItem<T>) -> Result<()> {
        let permit = self
            .inner
            .capacity
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| EngramError::queue("batch queue is closed"))?;

        self.inner.pending.fetch_add(1, Ordering::SeqCst);
        debug!(id = %item.id, item_type = %item.item_type, "item enqueued");

        let mut queue = self.inner.queue.lock();
        queue.push_back(QueuedItem {
            item,
            attempts: 0,
            _permit: permit,
        });
        Ok(())
    }

    /// Start the background dispatch loop. A no-op while already running.
    pub fn start(&self) {
        let mut worker = self.inner.worker.lock();
        if worker.is_some() {
            return;
        }
        self.inner.running.store(true, Ordering::SeqCst);
        info!(
            interval = ?self.inner.config.processing_interval,
            batch_size = self.inner.config.batch_size,
            "starting batch dispatch loop"
        );

        let inner = self.inner.clone();
        *worker = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.config.processing_interval);
            loop {
                ticker.tick().await;
                if !inner.running.load(Ordering::SeqCst) {
                    break;
                }
                inner.drain_once().await;
                if !inner.running.load(Ordering::SeqCst) {
                    break;
                }
            }
        }));
    }

    /// Stop the dispatch loop, letting an in-flight batch complete.
    /// Items remain queued; `start()` resumes where it left off.
    pub async fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        let handle = {
            let mut worker = self.inner.worker.lock();
            worker.take()
        };
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        info!("batch dispatch loop stopped");
    }

    /// Block until every accepted item has reached a terminal state,
    /// including items going through retries.
    ///
    /// `flush` drains the queue itself, so it completes even when the
    /// background loop is not running.
    pub async fn flush(&self) {
        loop {
            while !self.inner.queue.lock().is_empty() {
                self.inner.drain_once().await;
            }
            if self.inner.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            // Remaining items are in flight in the dispatch loop; wait
            // for the next batch to finish, then re-check for requeues.
            let notified = self.inner.progress.notified();
            if self.inner.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            if !self.inner.queue.lock().is_empty() {
                continue;
            }
            notified.await;
        }
    }

    /// Terminal-outcome counters.
    pub fn statistics(&self) -> BatchStatistics {
        BatchStatistics {
            total_processed: self.inner.stats.total_processed.load(Ordering::Relaxed),
            succeeded: self.inner.stats.succeeded.load(Ordering::Relaxed),
            failed: self.inner.stats.failed.load(Ordering::Relaxed),
        }
    }

    /// Number of currently queued (not in-flight) items.
    pub fn queue_len(&self) -> usize {
        self.inner.queue.lock().len()
    }
}

impl<T, H> ProcessorInner<T, H>
where
    T: Send + 'static,
    H: BatchHandler<T>,
{
    /// Dequeue and dispatch one batch, then settle every item in it.
    async fn drain_once(&self) {
        let batch: Vec<QueuedItem<T>> = {
            let mut queue = self.queue.lock();
            if queue.is_empty() {
                return;
            }
            if let Some(cmp) = &self.options.priority_comparator {
                // Stable sort: FIFO order is preserved among equals.
                queue.make_contiguous().sort_by(|a, b| cmp(&a.item, &b.item));
            }

            // Batches are homogeneous by type; the head item's type
            // selects the per-type size override.
            let head_type = match queue.front() {
                Some(q) => q.item.item_type.clone(),
                None => return,
            };
            let limit = self
                .config
                .type_batch_sizes
                .get(&head_type)
                .copied()
                .unwrap_or(self.config.batch_size);

            let mut batch = Vec::with_capacity(limit.min(queue.len()));
            let mut rest = VecDeque::with_capacity(queue.len());
            while let Some(q) = queue.pop_front() {
                if batch.len() < limit && q.item.item_type == head_type {
                    batch.push(q);
                } else {
                    rest.push_back(q);
                }
            }
            *queue = rest;
            batch
        };

        if batch.is_empty() {
            return;
        }
        debug!(batch_len = batch.len(), "dispatching batch");

        let mut items = Vec::with_capacity(batch.len());
        let mut meta = Vec::with_capacity(batch.len());
        for queued in batch {
            items.push(queued.item);
            meta.push((queued.attempts, queued._permit));
        }

        match self.handler.process(&items).await {
            Ok(results) => {
                let mut by_id: HashMap<String, ProcessingResult> = results
                    .into_iter()
                    .map(|result| (result.id.clone(), result))
                    .collect();
                for (item, (attempts, permit)) in items.into_iter().zip(meta) {
                    match by_id.remove(&item.id) {
                        Some(result) if result.success => self.settle_success(),
                        Some(result) => self.retry_or_fail(item, attempts, result.error, permit),
                        None => self.retry_or_fail(
                            item,
                            attempts,
                            Some("no result returned for item".to_string()),
                            permit,
                        ),
                    }
                }
            }
            Err(e) => {
                // One failed call is one failed attempt per item; the
                // loop itself carries on.
                warn!(error = %e, "batch processing call failed, items retry individually");
                let err = e.to_string();
                for (item, (attempts, permit)) in items.into_iter().zip(meta) {
                    self.retry_or_fail(item, attempts, Some(err.clone()), permit);
                }
            }
        }

        self.progress.notify_waiters();
    }

    fn settle_success(&self) {
        self.stats.total_processed.fetch_add(1, Ordering::Relaxed);
        self.stats.succeeded.fetch_add(1, Ordering::Relaxed);
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }

    fn retry_or_fail(
        &self,
        item: BatchItem<T>,
        attempts: u32,
        error: Option<String>,
        permit: OwnedSemaphorePermit,
    ) {
        let attempts = attempts + 1;
        if attempts > self.config.retry_limit {
            debug!(id = %item.id, attempts, "retries exhausted, recording permanent failure");
            self.stats.total_processed.fetch_add(1, Ordering::Relaxed);
            self.stats.failed.fetch_add(1, Ordering::Relaxed);
            if let Some(callback) = &self.options.on_permanent_failure {
                callback(&item, error.as_deref());
            }
            self.pending.fetch_sub(1, Ordering::SeqCst);
            drop(permit);
        } else {
            debug!(id = %item.id, attempts, "attempt failed, re-enqueueing");
            let mut queue = self.queue.lock();
            queue.push_back(QueuedItem {
                item,
                attempts,
                _permit: permit,
            });
        }
    }
}
