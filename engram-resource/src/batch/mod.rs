//! Asynchronous batching with backpressure and per-item retry.
//!
//! Work items accepted by [`BatchProcessor::add_item`] are grouped into
//! batches by a background dispatch loop and handed to a caller-supplied
//! [`BatchHandler`]. Failures are retried individually; one bad item
//! never aborts its siblings or the loop.

pub mod batch_processor;

pub use batch_processor::{
    BatchConfig, BatchHandler, BatchItem, BatchOptions, BatchProcessor, BatchStatistics,
    ProcessingResult,
};
