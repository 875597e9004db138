//! Persistence boundary for the indexer.
//!
//! The store cache never talks to LMDB directly: it reads through the narrow
//! [`repository::EntityReader`] capability and writes by draining pending
//! mutations into a [`plan::FlushPlan`] that a [`repository::Database`]
//! applies inside a single write transaction.

pub mod lmdb;
pub mod plan;
pub mod repository;

pub use lmdb::LmdbDatabase;
pub use plan::{EntityFlushOp, FlushPlan, MetadataFlushOp};
pub use repository::{Database, EntityReader};
