//! Block dispatch pipeline and runtime observability.

pub mod dispatcher;
pub mod events;
pub mod metrics;

pub use dispatcher::{
    BlockFetcher, BlockIndexer, DispatcherCore, DynamicDsHook, HeightQueue, OrderedTaskRunner,
    PoiSink, SerialBlockDispatcher,
};
pub use events::{EventSink, IndexerEvent, NoopEventSink};
pub use metrics::{IndexerMetrics, MetricsSnapshot};
