use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{IndexerError, IndexerResult};
use crate::metrics::IndexerMetrics;
use crate::runtime::events::{EventSink, IndexerEvent};
use crate::types::{Block, BlockHeight};

use super::core::DispatcherCore;
use super::height_queue::HeightQueue;
use super::task_runner::OrderedTaskRunner;

/// Retrieves block bodies for a batch of heights, in the requested order.
pub trait BlockFetcher: Send + Sync {
    fn fetch_blocks(&self, heights: &[BlockHeight]) -> IndexerResult<Vec<Block>>;
}

/// User-handler dispatch for one block.
pub trait BlockIndexer: Send + Sync {
    fn index_block(&self, block: &Block) -> IndexerResult<crate::types::ProcessBlockResponse>;
}

/// Two-stage pipeline: buffered heights are fetched in batches shaped by the
/// task runner's free space, then indexed strictly in height order.
///
/// A single cooperative fetch loop runs at a time, guarded by the `fetching`
/// flag. Mid-flight queue flushes are detected by the staleness check and the
/// affected batch is discarded. Task failures are fatal: the cache state for
/// that height can no longer be trusted, so the host must restart.
pub struct SerialBlockDispatcher {
    core: Arc<DispatcherCore>,
    queue: Arc<HeightQueue>,
    runner: Arc<OrderedTaskRunner>,
    fetcher: Arc<dyn BlockFetcher>,
    indexer: Arc<dyn BlockIndexer>,
    events: Arc<dyn EventSink>,
    metrics: IndexerMetrics,
    batch_size: usize,
    profiler: bool,
    fetching: AtomicBool,
    shutdown: AtomicBool,
    fatal_error: Mutex<Option<String>>,
    fetch_thread: Mutex<Option<JoinHandle<()>>>,
}

impl SerialBlockDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        core: Arc<DispatcherCore>,
        runner: Arc<OrderedTaskRunner>,
        fetcher: Arc<dyn BlockFetcher>,
        indexer: Arc<dyn BlockIndexer>,
        events: Arc<dyn EventSink>,
        metrics: IndexerMetrics,
        batch_size: usize,
        profiler: bool,
    ) -> Arc<Self> {
        let queue = Arc::clone(core.queue());
        Arc::new(Self {
            core,
            queue,
            runner,
            fetcher,
            indexer,
            events,
            metrics,
            batch_size: batch_size.max(1),
            profiler,
            fetching: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            fatal_error: Mutex::new(None),
            fetch_thread: Mutex::new(None),
        })
    }

    /// Appends heights to the buffer and (idempotently) starts the fetch
    /// loop. An empty `heights` with a provided watermark advances the
    /// watermark only, so bypassed ranges still make progress.
    pub fn enqueue_blocks(
        self: &Arc<Self>,
        heights: &[BlockHeight],
        latest_buffered: Option<BlockHeight>,
    ) -> IndexerResult<()> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(IndexerError::ShuttingDown);
        }
        self.ensure_healthy()?;

        let Some(&last) = heights.last() else {
            if let Some(height) = latest_buffered {
                self.core.set_buffered_height(height);
            }
            return Ok(());
        };

        self.queue.put_many(heights.iter().copied())?;
        self.core.set_buffered_height(latest_buffered.unwrap_or(last));
        self.start_fetch_loop();
        Ok(())
    }

    /// Discards buffered heights, rewinds the buffered watermark, and clears
    /// the indexing backlog so no pre-flush height reaches a handler.
    pub fn flush_queue(&self, height: BlockHeight) {
        self.core.flush_queue(height);
        self.runner.flush();
    }

    pub fn on_application_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.runner.join();
        if let Some(handle) = self.fetch_thread.lock().take() {
            let _ = handle.join();
        }
        if let Err(err) = self.core.flush_store() {
            tracing::error!(%err, "Final store flush failed during shutdown");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub fn core(&self) -> &Arc<DispatcherCore> {
        &self.core
    }

    pub fn metrics(&self) -> &IndexerMetrics {
        &self.metrics
    }

    pub fn ensure_healthy(&self) -> IndexerResult<()> {
        if let Some(reason) = self.fatal_error.lock().clone() {
            return Err(IndexerError::Halted { reason });
        }
        self.core.store().ensure_healthy()
    }

    fn record_fatal(&self, reason: String) {
        let mut fatal = self.fatal_error.lock();
        if fatal.is_none() {
            *fatal = Some(reason);
        }
    }

    fn start_fetch_loop(self: &Arc<Self>) {
        if self
            .fetching
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let mut guard = self.fetch_thread.lock();
        if let Some(previous) = guard.take() {
            let _ = previous.join();
        }

        let dispatcher = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("chainsift-fetch".to_string())
            .spawn(move || loop {
                dispatcher.run_fetch_loop();
                dispatcher.fetching.store(false, Ordering::Release);

                // Heights may have been enqueued while the loop was winding
                // down; reclaim the flag instead of stranding them.
                if dispatcher.queue.is_empty()
                    || dispatcher.is_shutdown()
                    || dispatcher.fatal_error.lock().is_some()
                {
                    return;
                }
                if dispatcher
                    .fetching
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    return;
                }
            })
            .expect("failed to spawn fetch loop");
        *guard = Some(handle);
    }

    fn run_fetch_loop(self: &Arc<Self>) {
        loop {
            if self.shutdown.load(Ordering::Acquire) || self.fatal_error.lock().is_some() {
                return;
            }

            let room = self.runner.free_space().min(self.batch_size);
            let taken = if room == 0 {
                Vec::new()
            } else {
                self.queue.take_many(room)
            };
            let pre_snapshot = self.core.latest_buffered_height();

            if taken.is_empty() {
                if self.queue.is_empty() {
                    return;
                }
                // Runner is full; keep the heights buffered and yield.
                std::thread::sleep(Duration::from_millis(1));
                continue;
            }

            let fetch_start = Instant::now();
            let blocks = match self.fetcher.fetch_blocks(&taken) {
                Ok(blocks) => blocks,
                Err(err) => {
                    if self.shutdown.load(Ordering::Acquire) {
                        return;
                    }
                    tracing::error!(?taken, %err, "Failed to fetch block batch");
                    self.metrics.record_failure();
                    self.record_fatal(err.to_string());
                    return;
                }
            };
            if self.profiler {
                tracing::debug!(
                    batch = taken.len(),
                    elapsed_ms = fetch_start.elapsed().as_millis() as u64,
                    "Fetched block batch"
                );
            }
            self.metrics.record_fetch(blocks.len(), fetch_start.elapsed());

            if self.batch_is_stale(pre_snapshot, &taken) {
                tracing::warn!(
                    first = taken.first().copied(),
                    last = taken.last().copied(),
                    "Queue was flushed while batch was in flight; discarding"
                );
                self.metrics.record_stale_batch();
                continue;
            }

            if self.submit_index_tasks(blocks).is_err() {
                return;
            }

            let pending = self.queue.len();
            let backlog = self.runner.len();
            self.metrics.update_queue_sizes(pending, backlog);
            self.events.emit(IndexerEvent::QueueSize {
                heights_pending: pending,
                runner_backlog: backlog,
            });
        }
    }

    /// A batch is stale when the buffered watermark went backwards while the
    /// fetch was in flight, or when the queue head rewound below the batch.
    fn batch_is_stale(&self, pre_snapshot: Option<BlockHeight>, taken: &[BlockHeight]) -> bool {
        let buffered_now = self.core.latest_buffered_height();
        if let (Some(pre), Some(now)) = (pre_snapshot, buffered_now) {
            if pre > now {
                return true;
            }
        }
        match (self.queue.peek(), taken.first()) {
            (Some(head), Some(&first)) => head < first,
            _ => false,
        }
    }

    fn submit_index_tasks(self: &Arc<Self>, blocks: Vec<Block>) -> IndexerResult<()> {
        let mut tasks: Vec<Box<dyn FnOnce() -> IndexerResult<()> + Send>> =
            Vec::with_capacity(blocks.len());

        for block in blocks {
            let dispatcher = Arc::clone(self);
            tasks.push(Box::new(move || dispatcher.index_one(block)));
        }

        match self.runner.put_many(tasks) {
            Ok(_handles) => Ok(()),
            Err(IndexerError::RunnerAborted) => Err(IndexerError::RunnerAborted),
            Err(err) => {
                // free_space was consulted before the fetch; losing capacity
                // mid-flight means something flushed and refilled the runner.
                tracing::error!(%err, "Failed to submit index tasks");
                self.record_fatal(err.to_string());
                Err(err)
            }
        }
    }

    fn index_one(self: &Arc<Self>, block: Block) -> IndexerResult<()> {
        let height = block.height();
        let index_start = Instant::now();

        let result = self
            .core
            .pre_process_block(height)
            .and_then(|()| self.indexer.index_block(&block))
            .and_then(|response| self.core.post_process_block(height, &response));

        match result {
            Ok(()) => {
                self.metrics.record_index(height, index_start.elapsed());
                if self.profiler {
                    tracing::debug!(
                        block_height = height,
                        elapsed_ms = index_start.elapsed().as_millis() as u64,
                        "Indexed block"
                    );
                }
                Ok(())
            }
            Err(err) => {
                if !self.is_shutdown() {
                    tracing::error!(block_height = height, %err, "Failed to index block");
                    self.metrics.record_failure();
                    self.record_fatal(err.to_string());
                    // The cache state for this height is untrusted; stop
                    // everything queued behind it.
                    self.runner.abort();
                }
                Err(IndexerError::IndexingFailure {
                    block: height,
                    reason: err.to_string(),
                })
            }
        }
    }
}
