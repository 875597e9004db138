use std::collections::HashSet;

use crate::error::IndexerResult;
use crate::storage::plan::FlushPlan;
use crate::types::{EntityId, MetadataKey, MetadataValue};

/// Predicate over `(id, serialized payload)` rows. The cache side supplies a
/// closure that deserializes and checks the field, so backends stay free of
/// entity types.
pub type RowMatcher<'a> = &'a dyn Fn(&str, &[u8]) -> bool;

/// Read capability over the persisted entity and metadata state.
///
/// In historical mode every read targets the live row (`end_height = None`);
/// closed versions are only reachable through point-in-time queries, which
/// the runtime itself never issues.
pub trait EntityReader: Send + Sync {
    /// Latest live payload for the id, `None` when the row is absent.
    fn find_by_pk(&self, table: &str, id: &str) -> IndexerResult<Option<Vec<u8>>>;

    /// Live rows matching `matcher`, skipping `exclude` ids, windowed by
    /// `offset`/`limit` in primary-key order.
    fn find_where(
        &self,
        table: &str,
        matcher: RowMatcher<'_>,
        exclude: &HashSet<EntityId>,
        offset: usize,
        limit: usize,
    ) -> IndexerResult<Vec<(EntityId, Vec<u8>)>>;

    /// First live row matching `matcher`, skipping `exclude` ids.
    fn find_one_where(
        &self,
        table: &str,
        matcher: RowMatcher<'_>,
        exclude: &HashSet<EntityId>,
    ) -> IndexerResult<Option<(EntityId, Vec<u8>)>> {
        Ok(self
            .find_where(table, matcher, exclude, 0, 1)?
            .into_iter()
            .next())
    }

    /// Number of live rows matching `matcher`, skipping `exclude` ids.
    fn count_where(
        &self,
        table: &str,
        matcher: RowMatcher<'_>,
        exclude: &HashSet<EntityId>,
    ) -> IndexerResult<u64>;

    fn metadata(&self, key: MetadataKey) -> IndexerResult<Option<MetadataValue>>;

    fn metadata_many(
        &self,
        keys: &[MetadataKey],
    ) -> IndexerResult<Vec<(MetadataKey, MetadataValue)>> {
        let mut found = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.metadata(*key)? {
                found.push((*key, value));
            }
        }
        Ok(found)
    }
}

/// Full database capability: reads plus atomic flush application.
pub trait Database: EntityReader {
    /// Applies every operation in the plan inside one write transaction.
    /// Either the whole plan commits or none of it does.
    fn apply_flush(&self, plan: FlushPlan) -> IndexerResult<()>;
}
