use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::error::{IndexerError, IndexerResult};
use crate::metrics::IndexerMetrics;
use crate::runtime::events::{EventSink, IndexerEvent};
use crate::store::controller::StoreCacheController;
use crate::types::{BlockHeight, MetadataKey, MetadataValue, ProcessBlockResponse};

use super::height_queue::HeightQueue;

/// Receives per-block inputs for proof-of-indexing. The hashing itself lives
/// outside the runtime.
pub trait PoiSink: Send + Sync {
    fn record(&self, height: BlockHeight, block_hash: &str);
}

#[derive(Debug, Default)]
pub struct NoopPoiSink;

impl PoiSink for NoopPoiSink {
    fn record(&self, _height: BlockHeight, _block_hash: &str) {}
}

/// Hook invoked when a user handler registers a dynamic datasource; the
/// owner decides how buffered heights are re-fetched.
pub trait DynamicDsHook: Send + Sync {
    fn on_dynamic_ds_created(&self, height: BlockHeight);
}

#[derive(Debug, Default)]
pub struct NoopDynamicDsHook;

impl DynamicDsHook for NoopDynamicDsHook {
    fn on_dynamic_ds_created(&self, _height: BlockHeight) {}
}

#[derive(Debug, Clone, Copy, Default)]
struct Watermarks {
    processed: Option<BlockHeight>,
    buffered: Option<BlockHeight>,
    finalized: Option<BlockHeight>,
}

/// Height bookkeeping shared by dispatcher implementations: watermarks,
/// pre/post-block hooks, and flush gating.
pub struct DispatcherCore {
    queue: Arc<HeightQueue>,
    store: Arc<StoreCacheController>,
    events: Arc<dyn EventSink>,
    poi: Arc<dyn PoiSink>,
    dynamic_ds: Arc<dyn DynamicDsHook>,
    metrics: IndexerMetrics,
    watermarks: Mutex<Watermarks>,
    flush_interval_blocks: u64,
    blocks_since_flush: AtomicU64,
}

impl DispatcherCore {
    pub fn new(
        queue: Arc<HeightQueue>,
        store: Arc<StoreCacheController>,
        events: Arc<dyn EventSink>,
        poi: Arc<dyn PoiSink>,
        dynamic_ds: Arc<dyn DynamicDsHook>,
        metrics: IndexerMetrics,
        flush_interval_blocks: u64,
    ) -> Self {
        Self {
            queue,
            store,
            events,
            poi,
            dynamic_ds,
            metrics,
            watermarks: Mutex::new(Watermarks::default()),
            flush_interval_blocks: flush_interval_blocks.max(1),
            blocks_since_flush: AtomicU64::new(0),
        }
    }

    pub fn queue(&self) -> &Arc<HeightQueue> {
        &self.queue
    }

    pub fn store(&self) -> &Arc<StoreCacheController> {
        &self.store
    }

    pub fn latest_processed_height(&self) -> Option<BlockHeight> {
        self.watermarks.lock().processed
    }

    pub fn latest_buffered_height(&self) -> Option<BlockHeight> {
        self.watermarks.lock().buffered
    }

    pub fn latest_finalized_height(&self) -> Option<BlockHeight> {
        self.watermarks.lock().finalized
    }

    pub fn set_buffered_height(&self, height: BlockHeight) {
        self.watermarks.lock().buffered = Some(height);
        self.metrics.update_buffered_height(height);
        self.store
            .metadata()
            .set(MetadataKey::TargetHeight, MetadataValue::from(height));
    }

    /// Finalisation only moves forward; it is also a flush boundary.
    pub fn set_finalized_height(&self, height: BlockHeight) -> IndexerResult<()> {
        {
            let mut watermarks = self.watermarks.lock();
            if watermarks.finalized.is_some_and(|current| height <= current) {
                return Ok(());
            }
            watermarks.finalized = Some(height);
        }
        self.flush_store()
    }

    /// Truncates the height queue and rewinds the buffered watermark.
    pub fn flush_queue(&self, height: BlockHeight) {
        self.queue.flush();
        self.watermarks.lock().buffered = Some(height);
        self.metrics.update_buffered_height(height);
    }

    /// Guards height ordering before a block enters the indexing stage.
    pub fn pre_process_block(&self, height: BlockHeight) -> IndexerResult<()> {
        let processed = self.watermarks.lock().processed;
        if let Some(current) = processed {
            if height <= current {
                return Err(IndexerError::BlockHeightNotIncreasing {
                    block_height: height,
                    current,
                });
            }
        }
        self.events.emit(IndexerEvent::Progress { height });
        Ok(())
    }

    /// Applies handler signals, records watermark metadata, advances the
    /// processed height, and flushes the store when a boundary is hit.
    pub fn post_process_block(
        &self,
        height: BlockHeight,
        response: &ProcessBlockResponse,
    ) -> IndexerResult<()> {
        if let Some(target) = response.reindex_block_height {
            return Err(IndexerError::ReindexRequested { block: target });
        }
        if response.dynamic_ds_created {
            tracing::info!(block_height = height, "Dynamic datasource created");
            self.dynamic_ds.on_dynamic_ds_created(height);
        }
        self.poi.record(height, &response.block_hash);

        let metadata = self.store.metadata();
        metadata.set(
            MetadataKey::LastProcessedHeight,
            MetadataValue::from(height),
        );
        metadata.set(
            MetadataKey::LastProcessedTimestamp,
            MetadataValue::Number(unix_timestamp_ms()),
        );
        metadata.set_increment(MetadataKey::ProcessedBlockCount, 1)?;

        self.watermarks.lock().processed = Some(height);

        let cadence_hit =
            self.blocks_since_flush.fetch_add(1, Ordering::AcqRel) + 1 >= self.flush_interval_blocks;
        if cadence_hit || self.store.should_flush() {
            self.flush_store()?;
        }
        Ok(())
    }

    pub fn flush_store(&self) -> IndexerResult<()> {
        self.blocks_since_flush.store(0, Ordering::Release);
        self.store.flush()
    }
}

fn unix_timestamp_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}
