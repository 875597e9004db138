use crate::types::{BlockHeight, EntityId, MetadataKey, MetadataValue, VersionRow};

/// One write batch against an entity table.
///
/// Payloads are already serialized; the plan carries no entity types so a
/// single flush can span heterogeneous tables.
#[derive(Debug, Clone)]
pub enum EntityFlushOp {
    /// Reshape each id's live row `[lo, ∞)` into `[lo, close_at)`.
    CloseRange {
        table: &'static str,
        closures: Vec<(EntityId, BlockHeight)>,
    },
    /// Append historical version rows.
    InsertVersions {
        table: &'static str,
        rows: Vec<VersionRow>,
    },
    /// Non-historical upsert of each id's latest payload.
    Upsert {
        table: &'static str,
        rows: Vec<(EntityId, Vec<u8>)>,
    },
    /// Non-historical removal.
    Delete {
        table: &'static str,
        ids: Vec<EntityId>,
    },
}

#[derive(Debug, Clone)]
pub enum MetadataFlushOp {
    Upsert {
        key: MetadataKey,
        value: MetadataValue,
    },
    /// Server-side add against the value stored at apply time, so concurrent
    /// flushers merge instead of clobbering each other.
    Increment { key: MetadataKey, delta: i64 },
}

/// Everything one flush boundary writes, in application order.
///
/// Entity ops come first, metadata last, so committed watermarks never get
/// ahead of the entity rows they describe.
#[derive(Debug, Clone, Default)]
pub struct FlushPlan {
    pub entity_ops: Vec<EntityFlushOp>,
    pub metadata_ops: Vec<MetadataFlushOp>,
}

impl FlushPlan {
    pub fn is_empty(&self) -> bool {
        self.entity_ops.is_empty() && self.metadata_ops.is_empty()
    }

    /// Number of row-level writes in the plan, for metrics.
    pub fn record_count(&self) -> usize {
        let entities: usize = self
            .entity_ops
            .iter()
            .map(|op| match op {
                EntityFlushOp::CloseRange { closures, .. } => closures.len(),
                EntityFlushOp::InsertVersions { rows, .. } => rows.len(),
                EntityFlushOp::Upsert { rows, .. } => rows.len(),
                EntityFlushOp::Delete { ids, .. } => ids.len(),
            })
            .sum();
        entities + self.metadata_ops.len()
    }
}
