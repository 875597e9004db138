use std::collections::HashSet;

use heed::{RoTxn, RwTxn};

use crate::error::IndexerResult;
use crate::storage::repository::RowMatcher;
use crate::types::{BlockHeight, EntityId, VersionRow};

use super::env::{HistoricalDb, LiveDb};

/// One entity table, in either storage regime.
///
/// Historical tables key rows by `id NUL start_height` (big-endian), so an
/// id's versions are contiguous and height-ordered; the row with
/// `end_height = None` is live at tip. Live tables key the single row per id
/// by the id alone.
#[derive(Clone, Copy)]
pub(super) enum EntityTable {
    Historical(HistoricalDb),
    Live(LiveDb),
}

/// Ids must not contain NUL; the separator keeps `id` prefixes unambiguous.
fn version_key(id: &str, start_height: BlockHeight) -> Vec<u8> {
    let mut key = Vec::with_capacity(id.len() + 9);
    key.extend_from_slice(id.as_bytes());
    key.push(0);
    key.extend_from_slice(&start_height.to_be_bytes());
    key
}

fn id_prefix(id: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(id.len() + 1);
    prefix.extend_from_slice(id.as_bytes());
    prefix.push(0);
    prefix
}

impl EntityTable {
    /// Latest live payload for the id.
    pub(super) fn find_by_pk(&self, txn: &RoTxn, id: &str) -> IndexerResult<Option<Vec<u8>>> {
        match self {
            EntityTable::Historical(db) => {
                let prefix = id_prefix(id);
                let mut live: Option<Vec<u8>> = None;
                for entry in db.prefix_iter(txn, &prefix)? {
                    let (_, row) = entry?;
                    if row.end_height.is_none() {
                        live = Some(row.payload);
                    }
                }
                Ok(live)
            }
            EntityTable::Live(db) => Ok(db.get(txn, id)?.map(|payload| payload.to_vec())),
        }
    }

    /// Every persisted version of the id, height-ordered. Empty for live
    /// tables.
    pub(super) fn versions(&self, txn: &RoTxn, id: &str) -> IndexerResult<Vec<VersionRow>> {
        let EntityTable::Historical(db) = self else {
            return Ok(Vec::new());
        };
        let prefix = id_prefix(id);
        let mut rows = Vec::new();
        for entry in db.prefix_iter(txn, &prefix)? {
            let (_, row) = entry?;
            rows.push(row);
        }
        Ok(rows)
    }

    /// The payload whose block range contains `height`, for point-in-time
    /// queries. Live tables fall back to the single current row.
    pub(super) fn find_by_pk_at(
        &self,
        txn: &RoTxn,
        id: &str,
        height: BlockHeight,
    ) -> IndexerResult<Option<Vec<u8>>> {
        match self {
            EntityTable::Historical(_) => {
                for row in self.versions(txn, id)? {
                    let in_range = row.start_height <= height
                        && row.end_height.map_or(true, |end| height < end);
                    if in_range {
                        return Ok(Some(row.payload));
                    }
                }
                Ok(None)
            }
            EntityTable::Live(_) => self.find_by_pk(txn, id),
        }
    }

    /// Visits every live row in primary-key order until the visitor returns
    /// `false`.
    fn scan_live(
        &self,
        txn: &RoTxn,
        mut visitor: impl FnMut(&str, &[u8]) -> IndexerResult<bool>,
    ) -> IndexerResult<()> {
        match self {
            EntityTable::Historical(db) => {
                for entry in db.iter(txn)? {
                    let (_, row) = entry?;
                    if row.end_height.is_none() && !visitor(&row.id, &row.payload)? {
                        break;
                    }
                }
            }
            EntityTable::Live(db) => {
                for entry in db.iter(txn)? {
                    let (id, payload) = entry?;
                    if !visitor(id, payload)? {
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    pub(super) fn find_where(
        &self,
        txn: &RoTxn,
        matcher: RowMatcher<'_>,
        exclude: &HashSet<EntityId>,
        offset: usize,
        limit: usize,
    ) -> IndexerResult<Vec<(EntityId, Vec<u8>)>> {
        let mut rows = Vec::new();
        let mut skipped = 0usize;
        self.scan_live(txn, |id, payload| {
            if exclude.contains(id) || !matcher(id, payload) {
                return Ok(true);
            }
            if skipped < offset {
                skipped += 1;
                return Ok(true);
            }
            rows.push((id.to_string(), payload.to_vec()));
            Ok(rows.len() < limit)
        })?;
        Ok(rows)
    }

    pub(super) fn count_where(
        &self,
        txn: &RoTxn,
        matcher: RowMatcher<'_>,
        exclude: &HashSet<EntityId>,
    ) -> IndexerResult<u64> {
        let mut count = 0u64;
        self.scan_live(txn, |id, payload| {
            if !exclude.contains(id) && matcher(id, payload) {
                count += 1;
            }
            Ok(true)
        })?;
        Ok(count)
    }

    /// Reshapes the id's live row `[lo, ∞)` into `[lo, close_at)`. A missing
    /// live row is a no-op: the version being closed was never persisted.
    pub(super) fn close_range(
        &self,
        txn: &mut RwTxn,
        id: &str,
        close_at: BlockHeight,
    ) -> IndexerResult<()> {
        let EntityTable::Historical(db) = self else {
            return Ok(());
        };

        let prefix = id_prefix(id);
        let mut live: Option<VersionRow> = None;
        for entry in db.prefix_iter(txn, &prefix)? {
            let (_, row) = entry?;
            if row.end_height.is_none() {
                live = Some(row);
            }
        }

        if let Some(mut row) = live {
            if row.start_height < close_at {
                row.end_height = Some(close_at);
                let key = version_key(id, row.start_height);
                db.put(txn, &key, &row)?;
            }
        }
        Ok(())
    }

    pub(super) fn insert_versions(
        &self,
        txn: &mut RwTxn,
        rows: &[VersionRow],
    ) -> IndexerResult<()> {
        let EntityTable::Historical(db) = self else {
            return Ok(());
        };
        for row in rows {
            let key = version_key(&row.id, row.start_height);
            db.put(txn, &key, row)?;
        }
        Ok(())
    }

    pub(super) fn upsert(
        &self,
        txn: &mut RwTxn,
        rows: &[(EntityId, Vec<u8>)],
    ) -> IndexerResult<()> {
        let EntityTable::Live(db) = self else {
            return Ok(());
        };
        for (id, payload) in rows {
            db.put(txn, id, payload)?;
        }
        Ok(())
    }

    pub(super) fn delete(&self, txn: &mut RwTxn, ids: &[EntityId]) -> IndexerResult<()> {
        let EntityTable::Live(db) = self else {
            return Ok(());
        };
        for id in ids {
            db.delete(txn, id)?;
        }
        Ok(())
    }
}
