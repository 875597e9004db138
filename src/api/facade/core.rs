use std::sync::Arc;

use crate::error::{IndexerError, IndexerResult};
use crate::metrics::{IndexerMetrics, MetricsSnapshot};
use crate::runtime::dispatcher::{
    BlockFetcher, BlockIndexer, DispatcherCore, DynamicDsHook, HeightQueue, NoopDynamicDsHook,
    NoopPoiSink, OrderedTaskRunner, PoiSink, SerialBlockDispatcher,
};
use crate::runtime::events::{EventSink, NoopEventSink};
use crate::storage::lmdb::LmdbDatabase;
use crate::storage::repository::EntityReader;
use crate::store::controller::StoreCacheController;
use crate::store::entity_cache::CachedEntityModel;
use crate::store::metadata_cache::CachedMetadataModel;
use crate::types::{BlockHeight, Entity};

use super::config::IndexerConfig;

/// Optional collaborator hooks, noop by default.
pub struct IndexerHooks {
    pub events: Arc<dyn EventSink>,
    pub poi: Arc<dyn PoiSink>,
    pub dynamic_ds: Arc<dyn DynamicDsHook>,
}

impl Default for IndexerHooks {
    fn default() -> Self {
        Self {
            events: Arc::new(NoopEventSink),
            poi: Arc::new(NoopPoiSink),
            dynamic_ds: Arc::new(NoopDynamicDsHook),
        }
    }
}

/// Wires the storage backend, store cache, and dispatch pipeline together
/// and exposes the upward API.
pub struct IndexerFacade {
    config: IndexerConfig,
    database: Arc<LmdbDatabase>,
    store: Arc<StoreCacheController>,
    dispatcher: Arc<SerialBlockDispatcher>,
}

impl IndexerFacade {
    pub fn open(
        config: IndexerConfig,
        tables: &[&'static str],
        fetcher: Arc<dyn BlockFetcher>,
        indexer: Arc<dyn BlockIndexer>,
    ) -> IndexerResult<Self> {
        Self::open_with_hooks(config, tables, fetcher, indexer, IndexerHooks::default())
    }

    pub fn open_with_hooks(
        config: IndexerConfig,
        tables: &[&'static str],
        fetcher: Arc<dyn BlockFetcher>,
        indexer: Arc<dyn BlockIndexer>,
        hooks: IndexerHooks,
    ) -> IndexerResult<Self> {
        let database = Arc::new(LmdbDatabase::open(
            &config.data_dir,
            config.lmdb_map_size,
            config.historical,
            tables,
        )?);

        let metrics = IndexerMetrics::new();
        let store = Arc::new(StoreCacheController::new(
            Arc::clone(&database),
            config.flush_threshold,
            metrics.clone(),
        ));

        let queue = Arc::new(HeightQueue::new(config.queue_capacity()));
        let runner = OrderedTaskRunner::new(config.queue_capacity());
        let core = Arc::new(DispatcherCore::new(
            queue,
            Arc::clone(&store),
            Arc::clone(&hooks.events),
            hooks.poi,
            hooks.dynamic_ds,
            metrics.clone(),
            config.flush_interval_blocks,
        ));
        let dispatcher = SerialBlockDispatcher::new(
            core,
            runner,
            fetcher,
            indexer,
            hooks.events,
            metrics,
            config.batch_size,
            config.profiler,
        );

        tracing::info!(
            data_dir = ?config.data_dir,
            batch_size = config.batch_size,
            historical = config.historical,
            "Indexer opened"
        );

        Ok(Self {
            config,
            database,
            store,
            dispatcher,
        })
    }

    /// Creates and registers the cache model for one entity type. The table
    /// must have been listed at `open` time.
    pub fn register_entity<E: Entity>(&self) -> IndexerResult<Arc<CachedEntityModel<E>>> {
        if !self.database.has_table(E::TABLE) {
            return Err(IndexerError::UnknownTable(E::TABLE.to_string()));
        }
        let model = Arc::new(CachedEntityModel::<E>::new(
            Arc::clone(&self.database) as Arc<dyn EntityReader>,
            self.config.historical,
            self.config.cache_max_entries,
            self.config.cache_ttl,
        ));
        self.store
            .register(Arc::clone(&model) as Arc<dyn crate::store::controller::FlushableStore>);
        Ok(model)
    }

    pub fn metadata(&self) -> Arc<CachedMetadataModel> {
        self.store.metadata()
    }

    /// Direct handle to the backing database, for point-in-time queries and
    /// external query layers.
    pub fn database(&self) -> Arc<LmdbDatabase> {
        Arc::clone(&self.database)
    }

    pub fn enqueue_blocks(
        &self,
        heights: &[BlockHeight],
        latest_buffered: Option<BlockHeight>,
    ) -> IndexerResult<()> {
        self.dispatcher.enqueue_blocks(heights, latest_buffered)
    }

    pub fn flush_queue(&self, height: BlockHeight) {
        self.dispatcher.flush_queue(height);
    }

    pub fn set_finalized_height(&self, height: BlockHeight) -> IndexerResult<()> {
        self.dispatcher.core().set_finalized_height(height)
    }

    /// Forces a store flush outside the dispatcher's own boundaries.
    pub fn flush(&self) -> IndexerResult<()> {
        self.store.flush()
    }

    pub fn on_application_shutdown(&self) {
        self.dispatcher.on_application_shutdown();
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.dispatcher.metrics().snapshot()
    }

    pub fn ensure_healthy(&self) -> IndexerResult<()> {
        self.dispatcher.ensure_healthy()
    }

    pub fn latest_processed_height(&self) -> Option<BlockHeight> {
        self.dispatcher.core().latest_processed_height()
    }
}
