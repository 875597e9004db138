use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Block height used to version every entity mutation.
///
/// Heights must be monotonically increasing within a run.
pub type BlockHeight = u64;

/// Textual primary key carried by every entity.
pub type EntityId = String;

/// A chain block handed to the indexing stage.
///
/// The runtime only projects the height out of it; the payload is opaque and
/// interpreted by the user-supplied handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub height: BlockHeight,
    pub hash: String,
    pub parent_hash: String,
    pub timestamp: u64,
    pub payload: Vec<u8>,
}

impl Block {
    pub fn height(&self) -> BlockHeight {
        self.height
    }
}

/// Outcome reported by the user handler after indexing one block.
#[derive(Debug, Clone, Default)]
pub struct ProcessBlockResponse {
    /// The handler registered a new dynamic datasource; buffered heights must
    /// be re-fetched with the widened filters.
    pub dynamic_ds_created: bool,
    /// Hash of the processed block, recorded for proof-of-indexing.
    pub block_hash: String,
    /// The handler detected an inconsistency and wants the chain re-indexed
    /// from this height.
    pub reindex_block_height: Option<BlockHeight>,
}

/// Scalar projection of one entity field, used for field-match queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Text(String),
    Uint(u64),
    Int(i64),
    Bool(bool),
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        FieldValue::Uint(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

/// An indexed entity type.
///
/// Implementations give the cache a stable table name, the primary key, and a
/// by-name field projection so field-match queries need no reflection.
pub trait Entity: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    const TABLE: &'static str;

    fn id(&self) -> &str;

    /// Projects a named field as a comparable scalar. `None` for unknown
    /// field names.
    fn field(&self, name: &str) -> Option<FieldValue>;
}

/// One persisted entity version with its validity range, payload serialized.
///
/// `end_height = None` marks the row live at tip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionRow {
    pub id: EntityId,
    pub start_height: BlockHeight,
    pub end_height: Option<BlockHeight>,
    pub payload: Vec<u8>,
}

/// Pending removal recorded against an id until the next flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRemoval {
    pub removed_at: BlockHeight,
}

/// Window applied to field-match queries.
#[derive(Debug, Clone, Copy)]
pub struct QueryWindow {
    pub offset: usize,
    pub limit: usize,
}

impl Default for QueryWindow {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 100,
        }
    }
}

/// Options for `count` queries. Distinct counts require an explicit column.
#[derive(Debug, Clone, Default)]
pub struct CountOptions {
    pub distinct: bool,
    pub column: Option<String>,
}

/// Closed set of metadata keys persisted by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetadataKey {
    LastProcessedHeight,
    LastProcessedTimestamp,
    TargetHeight,
    Chain,
    GenesisHash,
    IndexerNodeVersion,
    ProcessedBlockCount,
    SchemaMigrationCount,
    DynamicDatasources,
}

impl MetadataKey {
    pub const ALL: &'static [MetadataKey] = &[
        MetadataKey::LastProcessedHeight,
        MetadataKey::LastProcessedTimestamp,
        MetadataKey::TargetHeight,
        MetadataKey::Chain,
        MetadataKey::GenesisHash,
        MetadataKey::IndexerNodeVersion,
        MetadataKey::ProcessedBlockCount,
        MetadataKey::SchemaMigrationCount,
        MetadataKey::DynamicDatasources,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataKey::LastProcessedHeight => "lastProcessedHeight",
            MetadataKey::LastProcessedTimestamp => "lastProcessedTimestamp",
            MetadataKey::TargetHeight => "targetHeight",
            MetadataKey::Chain => "chain",
            MetadataKey::GenesisHash => "genesisHash",
            MetadataKey::IndexerNodeVersion => "indexerNodeVersion",
            MetadataKey::ProcessedBlockCount => "processedBlockCount",
            MetadataKey::SchemaMigrationCount => "schemaMigrationCount",
            MetadataKey::DynamicDatasources => "dynamicDatasources",
        }
    }

    /// Increment-only keys accumulate a delta across a flush window instead
    /// of overwriting.
    pub fn is_increment(&self) -> bool {
        matches!(
            self,
            MetadataKey::ProcessedBlockCount | MetadataKey::SchemaMigrationCount
        )
    }
}

impl std::fmt::Display for MetadataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value stored under a metadata key. Increment keys hold `Number`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetadataValue {
    Number(i64),
    Text(String),
    Bool(bool),
}

impl MetadataValue {
    pub fn as_number(&self) -> Option<i64> {
        match self {
            MetadataValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Number(value)
    }
}

impl From<u64> for MetadataValue {
    fn from(value: u64) -> Self {
        MetadataValue::Number(value as i64)
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::Text(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        MetadataValue::Bool(value)
    }
}
