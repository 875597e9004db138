//! Bounded two-stage block dispatch pipeline.
//!
//! Heights enter the [`HeightQueue`], are fetched in batches shaped by the
//! [`OrderedTaskRunner`]'s free space, and indexed strictly in height order.
//! The invariants callers rely on are:
//! - blocks are indexed in ascending height order within a run;
//! - watermarks advance monotonically;
//! - a queue flush discards buffered heights *and* any in-flight batch via
//!   the staleness check, so no pre-flush height reaches the indexing stage.

pub mod core;
pub mod height_queue;
pub mod serial;
pub mod task_runner;

pub use self::core::{DispatcherCore, DynamicDsHook, NoopDynamicDsHook, NoopPoiSink, PoiSink};
pub use height_queue::HeightQueue;
pub use serial::{BlockFetcher, BlockIndexer, SerialBlockDispatcher};
pub use task_runner::{OrderedTaskRunner, TaskHandle};
