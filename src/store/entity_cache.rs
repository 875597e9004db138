use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::error::{IndexerError, IndexerResult};
use crate::storage::plan::{EntityFlushOp, FlushPlan};
use crate::storage::repository::EntityReader;
use crate::store::recency::RecencyMap;
use crate::store::set_value::SetValueModel;
use crate::types::{
    BlockHeight, CountOptions, Entity, EntityId, FieldValue, PendingRemoval, QueryWindow,
    VersionRow,
};

use super::controller::FlushableStore;

struct CacheData<E> {
    set_cache: HashMap<EntityId, SetValueModel<E>>,
    remove_cache: HashMap<EntityId, PendingRemoval>,
    /// Close heights for live DB rows of ids that were removed and then
    /// re-created within the same flush window. Without this the recreate
    /// height would leak into the closed row's range.
    prior_close: HashMap<EntityId, BlockHeight>,
    get_cache: RecencyMap<E>,
    flushable_records: usize,
}

/// Read/write/remove cache over one entity type.
///
/// Writes accumulate as per-id version histories until the controller drains
/// them into a flush plan; reads merge the pending state, the recency cache,
/// and the database.
pub struct CachedEntityModel<E: Entity> {
    reader: Arc<dyn EntityReader>,
    historical: bool,
    data: Mutex<CacheData<E>>,
}

impl<E: Entity> CachedEntityModel<E> {
    pub fn new(
        reader: Arc<dyn EntityReader>,
        historical: bool,
        cache_capacity: usize,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            reader,
            historical,
            data: Mutex::new(CacheData {
                set_cache: HashMap::new(),
                remove_cache: HashMap::new(),
                prior_close: HashMap::new(),
                get_cache: RecencyMap::new(cache_capacity, cache_ttl),
                flushable_records: 0,
            }),
        }
    }

    pub fn get(&self, id: &str) -> IndexerResult<Option<E>> {
        let mut data = self.data.lock();

        if data.remove_cache.contains_key(id) {
            return Ok(None);
        }
        if let Some(cached) = data.get_cache.get(id) {
            return Ok(cached);
        }
        if let Some(model) = data.set_cache.get(id) {
            if let Some(version) = model.latest() {
                return Ok(Some(version.data.clone()));
            }
        }

        let fetched = match self.reader.find_by_pk(E::TABLE, id)? {
            Some(payload) => Some(bincode::deserialize::<E>(&payload)?),
            None => None,
        };
        data.get_cache.set(id.to_string(), fetched.clone());
        Ok(fetched)
    }

    /// All entities whose `field` equals `value`, windowed. In-memory matches
    /// are served first (sorted by id); the database covers the remainder
    /// with all cached ids excluded.
    pub fn get_by_field(
        &self,
        field: &str,
        value: &FieldValue,
        window: QueryWindow,
    ) -> IndexerResult<Vec<E>> {
        let mut data = self.data.lock();
        let in_memory = Self::in_memory_matches(&data, Some(field), value);

        let mut result: Vec<E> = in_memory
            .iter()
            .skip(window.offset.min(in_memory.len()))
            .take(window.limit)
            .cloned()
            .collect();

        if result.len() >= window.limit {
            return Ok(result);
        }

        let db_offset = window.offset.saturating_sub(in_memory.len());
        let db_limit = window.limit - result.len();
        let exclude = Self::all_cached_ids(&data);
        let matcher = Self::row_matcher(field, value);
        let rows = self
            .reader
            .find_where(E::TABLE, &matcher, &exclude, db_offset, db_limit)?;

        for (id, payload) in rows {
            let entity = bincode::deserialize::<E>(&payload)?;
            data.get_cache.set(id, Some(entity.clone()));
            result.push(entity);
        }
        Ok(result)
    }

    pub fn get_one_by_field(&self, field: &str, value: &FieldValue) -> IndexerResult<Option<E>> {
        if field == "id" {
            if let FieldValue::Text(id) = value {
                return self.get(id);
            }
        }

        let mut data = self.data.lock();
        if let Some(found) = Self::in_memory_matches(&data, Some(field), value).first() {
            return Ok(Some(found.clone()));
        }

        let exclude = Self::all_cached_ids(&data);
        let matcher = Self::row_matcher(field, value);
        let Some((id, payload)) = self.reader.find_one_where(E::TABLE, &matcher, &exclude)? else {
            return Ok(None);
        };
        let entity = bincode::deserialize::<E>(&payload)?;
        data.get_cache.set(id, Some(entity.clone()));
        Ok(Some(entity))
    }

    /// Number of entities matching the filter across cache and database.
    pub fn count(
        &self,
        filter: Option<(&str, &FieldValue)>,
        options: CountOptions,
    ) -> IndexerResult<u64> {
        if options.distinct && options.column.is_none() {
            return Err(IndexerError::DistinctCountRequiresColumn);
        }

        let data = self.data.lock();
        let match_any = FieldValue::Bool(true);
        let (field, value) = match filter {
            Some((field, value)) => (Some(field), value),
            None => (None, &match_any),
        };
        let in_memory = Self::in_memory_matches(&data, field, value);
        let exclude = Self::all_cached_ids(&data);

        let matcher: Box<dyn Fn(&str, &[u8]) -> bool> = match filter {
            Some((field, value)) => Box::new(Self::row_matcher(field, value)),
            None => Box::new(|_: &str, _: &[u8]| true),
        };

        if let Some(column) = options.distinct.then_some(options.column.as_deref()).flatten() {
            let mut values: HashSet<String> = in_memory
                .iter()
                .filter_map(|e| e.field(column))
                .map(|v| format!("{v:?}"))
                .collect();
            let rows = self
                .reader
                .find_where(E::TABLE, matcher.as_ref(), &exclude, 0, usize::MAX)?;
            for (_, payload) in rows {
                let entity = bincode::deserialize::<E>(&payload)?;
                if let Some(v) = entity.field(column) {
                    values.insert(format!("{v:?}"));
                }
            }
            return Ok(values.len() as u64);
        }

        let db_count = self
            .reader
            .count_where(E::TABLE, matcher.as_ref(), &exclude)?;
        Ok(in_memory.len() as u64 + db_count)
    }

    pub fn set(&self, id: &str, entity: E, height: BlockHeight) -> IndexerResult<()> {
        let mut data = self.data.lock();

        if let Some(removal) = data.remove_cache.remove(id) {
            data.prior_close
                .entry(id.to_string())
                .or_insert(removal.removed_at);
        }

        if let Some(model) = data.set_cache.get_mut(id) {
            model.set(entity.clone(), height)?;
        } else {
            data.set_cache
                .insert(id.to_string(), SetValueModel::new(entity.clone(), height));
            data.flushable_records += 1;
        }
        data.get_cache.set(id.to_string(), Some(entity));
        Ok(())
    }

    pub fn bulk_create(&self, entities: Vec<E>, height: BlockHeight) -> IndexerResult<()> {
        for entity in entities {
            let id = entity.id().to_string();
            self.set(&id, entity, height)?;
        }
        Ok(())
    }

    /// Full-row updates only. Passing a field subset is a programmer error.
    pub fn bulk_update(
        &self,
        entities: Vec<E>,
        height: BlockHeight,
        fields: Option<&[&str]>,
    ) -> IndexerResult<()> {
        if fields.is_some() {
            return Err(IndexerError::PartialUpdateUnsupported);
        }
        self.bulk_create(entities, height)
    }

    /// Idempotent: removing an already-removed id is a no-op.
    pub fn remove(&self, id: &str, height: BlockHeight) -> IndexerResult<()> {
        let mut data = self.data.lock();
        if data.remove_cache.contains_key(id) {
            return Ok(());
        }

        data.remove_cache
            .insert(id.to_string(), PendingRemoval { removed_at: height });
        data.get_cache.remove(id);
        if let Some(model) = data.set_cache.get_mut(id) {
            model.mark_removed(height);
        } else {
            data.flushable_records += 1;
        }
        Ok(())
    }

    fn in_memory_matches(data: &CacheData<E>, field: Option<&str>, value: &FieldValue) -> Vec<E> {
        let mut matches: Vec<E> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();

        for (id, model) in data.set_cache.iter() {
            if data.remove_cache.contains_key(id) {
                continue;
            }
            if model.matches_field(field, value) {
                if let Some(version) = model.latest() {
                    matches.push(version.data.clone());
                    seen.insert(id.as_str());
                }
            }
        }

        data.get_cache.for_each(|id, cached| {
            if seen.contains(id.as_str()) || data.remove_cache.contains_key(id) {
                return;
            }
            let Some(entity) = cached else { return };
            let field_matches = match field {
                None => true,
                Some(name) => entity.field(name).as_ref() == Some(value),
            };
            if field_matches {
                matches.push(entity.clone());
            }
        });

        matches.sort_by(|a, b| a.id().cmp(b.id()));
        matches
    }

    fn all_cached_ids(data: &CacheData<E>) -> HashSet<EntityId> {
        let mut ids: HashSet<EntityId> = data.set_cache.keys().cloned().collect();
        ids.extend(data.remove_cache.keys().cloned());
        ids.extend(data.get_cache.keys());
        ids
    }

    fn row_matcher(field: &str, value: &FieldValue) -> impl Fn(&str, &[u8]) -> bool {
        let field = field.to_string();
        let value = value.clone();
        move |_id: &str, payload: &[u8]| match bincode::deserialize::<E>(payload) {
            Ok(entity) => entity.field(&field).as_ref() == Some(&value),
            Err(_) => false,
        }
    }

    fn drain_historical(data: &mut CacheData<E>) -> IndexerResult<Vec<EntityFlushOp>> {
        let set_cache = std::mem::take(&mut data.set_cache);
        let remove_cache = std::mem::take(&mut data.remove_cache);
        let prior_close = std::mem::take(&mut data.prior_close);

        let mut closures: Vec<(EntityId, BlockHeight)> = Vec::new();
        let mut rows: Vec<VersionRow> = Vec::new();

        for (id, model) in set_cache.iter() {
            let close_at = prior_close
                .get(id)
                .copied()
                .or_else(|| model.first_start_height());
            if let Some(close_at) = close_at {
                closures.push((id.clone(), close_at));
            }
            for version in model.versions() {
                // A version set and removed at the same height never existed.
                if version.end_height == Some(version.start_height) {
                    continue;
                }
                rows.push(VersionRow {
                    id: id.clone(),
                    start_height: version.start_height,
                    end_height: version.end_height,
                    payload: bincode::serialize(&version.data)?,
                });
            }
        }
        for (id, removal) in remove_cache.iter() {
            if !set_cache.contains_key(id) {
                closures.push((id.clone(), removal.removed_at));
            }
        }

        let mut ops = Vec::new();
        if !closures.is_empty() {
            closures.sort_by(|a, b| a.0.cmp(&b.0));
            ops.push(EntityFlushOp::CloseRange {
                table: E::TABLE,
                closures,
            });
        }
        if !rows.is_empty() {
            rows.sort_by(|a, b| (&a.id, a.start_height).cmp(&(&b.id, b.start_height)));
            ops.push(EntityFlushOp::InsertVersions {
                table: E::TABLE,
                rows,
            });
        }
        Ok(ops)
    }

    fn drain_live(data: &mut CacheData<E>) -> IndexerResult<Vec<EntityFlushOp>> {
        let set_cache = std::mem::take(&mut data.set_cache);
        let remove_cache = std::mem::take(&mut data.remove_cache);
        data.prior_close.clear();

        let mut rows: Vec<(EntityId, Vec<u8>)> = Vec::new();
        for (id, model) in set_cache.iter() {
            if remove_cache.contains_key(id) {
                continue;
            }
            if let Some(version) = model.latest() {
                rows.push((id.clone(), bincode::serialize(&version.data)?));
            }
        }
        let mut ids: Vec<EntityId> = remove_cache.into_keys().collect();

        let mut ops = Vec::new();
        if !rows.is_empty() {
            rows.sort_by(|a, b| a.0.cmp(&b.0));
            ops.push(EntityFlushOp::Upsert {
                table: E::TABLE,
                rows,
            });
        }
        if !ids.is_empty() {
            ids.sort();
            ops.push(EntityFlushOp::Delete {
                table: E::TABLE,
                ids,
            });
        }
        Ok(ops)
    }
}

impl<E: Entity> FlushableStore for CachedEntityModel<E> {
    fn table(&self) -> &'static str {
        E::TABLE
    }

    fn is_flushable(&self) -> bool {
        let data = self.data.lock();
        !data.set_cache.is_empty() || !data.remove_cache.is_empty()
    }

    fn flushable_records(&self) -> usize {
        self.data.lock().flushable_records
    }

    fn drain_into(&self, plan: &mut FlushPlan) -> IndexerResult<()> {
        let mut data = self.data.lock();
        let ops = if self.historical {
            Self::drain_historical(&mut data)?
        } else {
            Self::drain_live(&mut data)?
        };
        data.flushable_records = 0;
        plan.entity_ops.extend(ops);
        Ok(())
    }
}
