//! Historical write-through entity cache.
//!
//! User handlers read and write entities through [`entity_cache::CachedEntityModel`]
//! and scalar metadata through [`metadata_cache::CachedMetadataModel`]. Writes
//! accumulate in memory, tagged with the block height that produced them,
//! until [`controller::StoreCacheController`] drains every model into one
//! [`crate::storage::FlushPlan`] and applies it atomically.

pub mod controller;
pub mod entity_cache;
pub mod metadata_cache;
pub mod recency;
pub mod set_value;

pub use controller::{FlushableStore, StoreCacheController};
pub use entity_cache::CachedEntityModel;
pub use metadata_cache::CachedMetadataModel;
pub use recency::RecencyMap;
pub use set_value::{EntityVersion, SetValueModel};
