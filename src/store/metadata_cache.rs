use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::error::{IndexerError, IndexerResult};
use crate::storage::plan::{FlushPlan, MetadataFlushOp};
use crate::storage::repository::EntityReader;
use crate::types::{MetadataKey, MetadataValue};

use super::controller::FlushableStore;

#[derive(Debug, Clone)]
enum PendingWrite {
    Assign(MetadataValue),
    Increment(i64),
}

#[derive(Default)]
struct MetadataData {
    set_cache: HashMap<MetadataKey, PendingWrite>,
    get_cache: HashMap<MetadataKey, MetadataValue>,
    flushable_records: usize,
}

/// Write-through cache for the scalar metadata singleton.
///
/// Increment keys accumulate a delta in memory; the delta is added to the
/// stored value inside the flush transaction, so concurrent flushers merge
/// rather than losing updates.
pub struct CachedMetadataModel {
    reader: Arc<dyn EntityReader>,
    data: Mutex<MetadataData>,
}

impl CachedMetadataModel {
    pub fn new(reader: Arc<dyn EntityReader>) -> Self {
        Self {
            reader,
            data: Mutex::new(MetadataData::default()),
        }
    }

    pub fn find(&self, key: MetadataKey) -> IndexerResult<Option<MetadataValue>> {
        let mut data = self.data.lock();
        if let Some(value) = data.get_cache.get(&key) {
            return Ok(Some(value.clone()));
        }

        let fetched = self.reader.metadata(key)?;
        if let Some(value) = &fetched {
            data.get_cache.insert(key, value.clone());
        }
        Ok(fetched)
    }

    /// Bulk lookup. Pending writes win over stored values; the merged result
    /// is written back into the read cache.
    pub fn find_many(
        &self,
        keys: &[MetadataKey],
    ) -> IndexerResult<Vec<(MetadataKey, MetadataValue)>> {
        let stored: HashMap<MetadataKey, MetadataValue> =
            self.reader.metadata_many(keys)?.into_iter().collect();

        let mut data = self.data.lock();
        let mut merged = Vec::with_capacity(keys.len());
        for key in keys {
            let value = match data.set_cache.get(key) {
                Some(PendingWrite::Assign(value)) => Some(value.clone()),
                Some(PendingWrite::Increment(delta)) => {
                    let base = stored.get(key).and_then(MetadataValue::as_number).unwrap_or(0);
                    Some(MetadataValue::Number(base + delta))
                }
                None => stored.get(key).cloned(),
            };
            if let Some(value) = value {
                data.get_cache.insert(*key, value.clone());
                merged.push((*key, value));
            }
        }
        Ok(merged)
    }

    pub fn set(&self, key: MetadataKey, value: MetadataValue) {
        let mut data = self.data.lock();
        if !data.set_cache.contains_key(&key) {
            data.flushable_records += 1;
        }
        data.set_cache.insert(key, PendingWrite::Assign(value.clone()));
        data.get_cache.insert(key, value);
    }

    pub fn set_bulk(&self, values: Vec<(MetadataKey, MetadataValue)>) {
        for (key, value) in values {
            self.set(key, value);
        }
    }

    /// Accumulates `delta` against `key`. Only valid for increment keys.
    pub fn set_increment(&self, key: MetadataKey, delta: i64) -> IndexerResult<()> {
        if !key.is_increment() {
            return Err(IndexerError::NotIncrementKey(key));
        }

        let mut data = self.data.lock();
        match data.set_cache.get_mut(&key) {
            Some(PendingWrite::Increment(pending)) => {
                *pending += delta;
            }
            Some(PendingWrite::Assign(value)) => {
                let Some(current) = value.as_number() else {
                    return Err(IndexerError::NonNumericIncrement { key });
                };
                let bumped = MetadataValue::Number(current + delta);
                *value = bumped.clone();
                data.get_cache.insert(key, bumped);
            }
            None => {
                data.flushable_records += 1;
                data.set_cache.insert(key, PendingWrite::Increment(delta));
            }
        }
        Ok(())
    }
}

impl FlushableStore for CachedMetadataModel {
    fn table(&self) -> &'static str {
        "_metadata"
    }

    fn is_flushable(&self) -> bool {
        !self.data.lock().set_cache.is_empty()
    }

    fn flushable_records(&self) -> usize {
        self.data.lock().flushable_records
    }

    fn drain_into(&self, plan: &mut FlushPlan) -> IndexerResult<()> {
        let mut data = self.data.lock();
        let pending = std::mem::take(&mut data.set_cache);
        data.get_cache.clear();
        data.flushable_records = 0;

        let mut ops: Vec<MetadataFlushOp> = pending
            .into_iter()
            .map(|(key, write)| match write {
                PendingWrite::Assign(value) => MetadataFlushOp::Upsert { key, value },
                PendingWrite::Increment(delta) => MetadataFlushOp::Increment { key, delta },
            })
            .collect();
        ops.sort_by_key(|op| match op {
            MetadataFlushOp::Upsert { key, .. } => key.as_str(),
            MetadataFlushOp::Increment { key, .. } => key.as_str(),
        });
        plan.metadata_ops.extend(ops);
        Ok(())
    }
}
