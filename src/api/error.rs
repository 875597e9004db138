use thiserror::Error;

use crate::types::{BlockHeight, MetadataKey};

pub type IndexerResult<T> = Result<T, IndexerError>;

#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("heed error: {0}")]
    Heed(#[from] heed::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("height queue capacity exceeded (requested {requested}, free {free})")]
    QueueCapacityExceeded { requested: usize, free: usize },

    #[error("task runner backlog full (requested {requested}, free {free})")]
    RunnerBacklogFull { requested: usize, free: usize },

    #[error("task runner has been aborted")]
    RunnerAborted,

    #[error("block height {block_height} must be greater than latest processed {current}")]
    BlockHeightNotIncreasing {
        block_height: BlockHeight,
        current: BlockHeight,
    },

    #[error("version for `{id}` set at height {height} below last start height {last_start}")]
    NonMonotonicVersion {
        id: String,
        height: BlockHeight,
        last_start: BlockHeight,
    },

    #[error("updating a subset of entity fields is not supported")]
    PartialUpdateUnsupported,

    #[error("metadata key `{0}` does not accept increments")]
    NotIncrementKey(MetadataKey),

    #[error("metadata key `{key}` holds a non-numeric value; cannot increment")]
    NonNumericIncrement { key: MetadataKey },

    #[error("distinct count requires an explicit column")]
    DistinctCountRequiresColumn,

    #[error("unknown entity table `{0}`")]
    UnknownTable(String),

    #[error("indexing failure at block {block}: {reason}")]
    IndexingFailure { block: BlockHeight, reason: String },

    #[error("flush failure: {reason}")]
    FlushFailure { reason: String },

    #[error("indexer halted: {reason}")]
    Halted { reason: String },

    #[error("handler requested reindex from block {block}")]
    ReindexRequested { block: BlockHeight },

    #[error("indexer is shutting down")]
    ShuttingDown,
}

impl IndexerError {
    /// Clones the error for fan-out to multiple waiters. Wrapped source
    /// errors are flattened into their message form.
    pub fn duplicate(&self) -> Self {
        match self {
            IndexerError::QueueCapacityExceeded { requested, free } => {
                IndexerError::QueueCapacityExceeded {
                    requested: *requested,
                    free: *free,
                }
            }
            IndexerError::RunnerBacklogFull { requested, free } => {
                IndexerError::RunnerBacklogFull {
                    requested: *requested,
                    free: *free,
                }
            }
            IndexerError::RunnerAborted => IndexerError::RunnerAborted,
            IndexerError::BlockHeightNotIncreasing {
                block_height,
                current,
            } => IndexerError::BlockHeightNotIncreasing {
                block_height: *block_height,
                current: *current,
            },
            IndexerError::NonMonotonicVersion {
                id,
                height,
                last_start,
            } => IndexerError::NonMonotonicVersion {
                id: id.clone(),
                height: *height,
                last_start: *last_start,
            },
            IndexerError::PartialUpdateUnsupported => IndexerError::PartialUpdateUnsupported,
            IndexerError::NotIncrementKey(key) => IndexerError::NotIncrementKey(*key),
            IndexerError::NonNumericIncrement { key } => {
                IndexerError::NonNumericIncrement { key: *key }
            }
            IndexerError::DistinctCountRequiresColumn => IndexerError::DistinctCountRequiresColumn,
            IndexerError::UnknownTable(table) => IndexerError::UnknownTable(table.clone()),
            IndexerError::IndexingFailure { block, reason } => IndexerError::IndexingFailure {
                block: *block,
                reason: reason.clone(),
            },
            IndexerError::ReindexRequested { block } => {
                IndexerError::ReindexRequested { block: *block }
            }
            IndexerError::Halted { reason } => IndexerError::Halted {
                reason: reason.clone(),
            },
            IndexerError::ShuttingDown => IndexerError::ShuttingDown,
            other => IndexerError::FlushFailure {
                reason: other.to_string(),
            },
        }
    }
}
