//! Public API surface for chainsift consumers.
//!
//! This module groups lightweight types, error definitions, and the facade so
//! downstream crates can drive the indexer without pulling in the runtime,
//! store, and storage implementation details.

pub mod error;
pub mod facade;
pub mod types;

pub mod prelude {
    pub use super::error::{IndexerError, IndexerResult};
    pub use super::facade::{IndexerConfig, IndexerFacade};
    pub use super::types::*;
}
