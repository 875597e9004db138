//! Runtime metrics for the dispatch pipeline and store cache.
//!
//! Metrics are thread-safe and can be read concurrently with indexing. All
//! counters are monotonically increasing; gauges track the latest observed
//! value.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::types::BlockHeight;

#[derive(Debug, Clone, Default)]
pub struct IndexerMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    blocks_fetched: AtomicU64,
    blocks_indexed: AtomicU64,
    batches_fetched: AtomicU64,
    stale_batches_discarded: AtomicU64,
    flushes_performed: AtomicU64,
    records_flushed: AtomicU64,
    failed_operations: AtomicU64,
    total_fetch_time_us: AtomicU64,
    total_index_time_us: AtomicU64,
    latest_processed_height: AtomicU64,
    latest_buffered_height: AtomicU64,
    heights_pending: AtomicUsize,
    runner_backlog: AtomicUsize,
}

impl IndexerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_fetch(&self, block_count: usize, duration: Duration) {
        self.inner
            .blocks_fetched
            .fetch_add(block_count as u64, Ordering::Relaxed);
        self.inner.batches_fetched.fetch_add(1, Ordering::Relaxed);
        self.inner
            .total_fetch_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_index(&self, height: BlockHeight, duration: Duration) {
        self.inner.blocks_indexed.fetch_add(1, Ordering::Relaxed);
        self.inner
            .total_index_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.inner
            .latest_processed_height
            .store(height, Ordering::Relaxed);
    }

    pub fn record_stale_batch(&self) {
        self.inner
            .stale_batches_discarded
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flush(&self, record_count: usize) {
        self.inner.flushes_performed.fetch_add(1, Ordering::Relaxed);
        self.inner
            .records_flushed
            .fetch_add(record_count as u64, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.inner.failed_operations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn update_buffered_height(&self, height: BlockHeight) {
        self.inner
            .latest_buffered_height
            .store(height, Ordering::Relaxed);
    }

    pub fn update_queue_sizes(&self, heights_pending: usize, runner_backlog: usize) {
        self.inner
            .heights_pending
            .store(heights_pending, Ordering::Relaxed);
        self.inner
            .runner_backlog
            .store(runner_backlog, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let blocks_fetched = self.inner.blocks_fetched.load(Ordering::Relaxed);
        let blocks_indexed = self.inner.blocks_indexed.load(Ordering::Relaxed);
        let batches_fetched = self.inner.batches_fetched.load(Ordering::Relaxed);
        let total_fetch_time_us = self.inner.total_fetch_time_us.load(Ordering::Relaxed);
        let total_index_time_us = self.inner.total_index_time_us.load(Ordering::Relaxed);

        let avg_fetch_time_us = if batches_fetched > 0 {
            total_fetch_time_us / batches_fetched
        } else {
            0
        };
        let avg_index_time_us = if blocks_indexed > 0 {
            total_index_time_us / blocks_indexed
        } else {
            0
        };

        MetricsSnapshot {
            blocks_fetched,
            blocks_indexed,
            batches_fetched,
            stale_batches_discarded: self.inner.stale_batches_discarded.load(Ordering::Relaxed),
            flushes_performed: self.inner.flushes_performed.load(Ordering::Relaxed),
            records_flushed: self.inner.records_flushed.load(Ordering::Relaxed),
            failed_operations: self.inner.failed_operations.load(Ordering::Relaxed),
            avg_fetch_time_us,
            avg_index_time_us,
            latest_processed_height: self.inner.latest_processed_height.load(Ordering::Relaxed),
            latest_buffered_height: self.inner.latest_buffered_height.load(Ordering::Relaxed),
            heights_pending: self.inner.heights_pending.load(Ordering::Relaxed),
            runner_backlog: self.inner.runner_backlog.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time export of the runtime counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub blocks_fetched: u64,
    pub blocks_indexed: u64,
    pub batches_fetched: u64,
    pub stale_batches_discarded: u64,
    pub flushes_performed: u64,
    pub records_flushed: u64,
    pub failed_operations: u64,
    pub avg_fetch_time_us: u64,
    pub avg_index_time_us: u64,
    pub latest_processed_height: BlockHeight,
    pub latest_buffered_height: BlockHeight,
    pub heights_pending: usize,
    pub runner_backlog: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_metrics_are_zero() {
        let metrics = IndexerMetrics::new();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn record_fetch_and_index_update_averages() {
        let metrics = IndexerMetrics::new();
        metrics.record_fetch(4, Duration::from_millis(8));
        metrics.record_index(10, Duration::from_millis(2));
        metrics.record_index(11, Duration::from_millis(4));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.blocks_fetched, 4);
        assert_eq!(snapshot.batches_fetched, 1);
        assert_eq!(snapshot.blocks_indexed, 2);
        assert_eq!(snapshot.latest_processed_height, 11);
        assert!(snapshot.avg_fetch_time_us >= 8_000);
        assert!(snapshot.avg_index_time_us >= 2_000);
    }

    #[test]
    fn flush_counters_accumulate() {
        let metrics = IndexerMetrics::new();
        metrics.record_flush(120);
        metrics.record_flush(30);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.flushes_performed, 2);
        assert_eq!(snapshot.records_flushed, 150);
    }
}
