//! # Chainsift
//!
//! A blockchain indexer runtime core: an ordered block dispatch pipeline
//! feeding a historical write-through entity cache persisted in LMDB.
//!
//! ## Features
//!
//! - **Strict Ordering**: blocks are indexed in ascending height order, even
//!   across batch boundaries
//! - **Backpressure**: the fetch stage is shaped by the indexing backlog, so
//!   memory stays bounded end to end
//! - **Reorg Safe**: a queue flush discards buffered heights and any
//!   in-flight batch before a stale block can reach a handler
//! - **Historical Mode**: every entity mutation becomes a block-range
//!   version, enabling point-in-time state
//! - **Atomic Flush**: all pending cache mutations commit in one LMDB write
//!   transaction, metadata last
//!
//! ## Quick Start
//!
//! ```ignore
//! use chainsift::*;
//!
//! let config = IndexerConfig::new("./data", 25);
//! let facade = IndexerFacade::open(config, &["accounts"], fetcher, indexer)?;
//!
//! let accounts = facade.register_entity::<Account>()?;
//! facade.enqueue_blocks(&[100, 101, 102, 103], None)?;
//!
//! // ... handlers read and write through `accounts` while blocks index ...
//!
//! facade.on_application_shutdown();
//! # Ok::<(), chainsift::error::IndexerError>(())
//! ```

pub mod api;
pub mod runtime;
pub mod storage;
pub mod store;

pub use crate::api::{error, facade, types};
pub use crate::runtime::{dispatcher, events, metrics};

pub use api::error::{IndexerError, IndexerResult};
pub use api::facade::{IndexerConfig, IndexerFacade};
pub use api::facade::core::IndexerHooks;
pub use api::types::*;
pub use runtime::dispatcher::{
    BlockFetcher, BlockIndexer, DispatcherCore, DynamicDsHook, HeightQueue, NoopDynamicDsHook,
    NoopPoiSink, OrderedTaskRunner, PoiSink, SerialBlockDispatcher, TaskHandle,
};
pub use runtime::events::{EventSink, IndexerEvent, NoopEventSink};
pub use runtime::metrics::{IndexerMetrics, MetricsSnapshot};
pub use storage::{Database, EntityFlushOp, EntityReader, FlushPlan, LmdbDatabase, MetadataFlushOp};
pub use store::{
    CachedEntityModel, CachedMetadataModel, EntityVersion, FlushableStore, RecencyMap,
    SetValueModel, StoreCacheController,
};
