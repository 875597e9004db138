use heed::{RoTxn, RwTxn};

use crate::error::{IndexerError, IndexerResult};
use crate::types::{MetadataKey, MetadataValue};

use super::env::MetadataDb;

pub(super) struct MetadataTable {
    db: MetadataDb,
}

impl MetadataTable {
    pub(super) fn new(db: MetadataDb) -> Self {
        Self { db }
    }

    pub(super) fn get(
        &self,
        txn: &RoTxn,
        key: MetadataKey,
    ) -> IndexerResult<Option<MetadataValue>> {
        Ok(self.db.get(txn, key.as_str())?)
    }

    pub(super) fn put(
        &self,
        txn: &mut RwTxn,
        key: MetadataKey,
        value: &MetadataValue,
    ) -> IndexerResult<()> {
        Ok(self.db.put(txn, key.as_str(), value)?)
    }

    /// Adds `delta` to the value stored at apply time, so deltas from
    /// concurrent flushers merge. An absent row starts from zero.
    pub(super) fn increment(
        &self,
        txn: &mut RwTxn,
        key: MetadataKey,
        delta: i64,
    ) -> IndexerResult<()> {
        let current = match self.db.get(txn, key.as_str())? {
            Some(value) => value
                .as_number()
                .ok_or(IndexerError::NonNumericIncrement { key })?,
            None => 0,
        };
        self.db
            .put(txn, key.as_str(), &MetadataValue::Number(current + delta))?;
        Ok(())
    }
}
