//! LMDB-backed [`Database`] implementation.
//!
//! One environment holds a named database per entity table plus the metadata
//! table. Every flush plan is applied inside a single write transaction, so
//! a flush either commits whole or not at all.

mod entity;
mod env;
mod metadata;

use std::collections::HashSet;
use std::path::Path;

use hashbrown::HashMap;
use heed::Env;

use crate::error::{IndexerError, IndexerResult};
use crate::storage::plan::{EntityFlushOp, FlushPlan, MetadataFlushOp};
use crate::storage::repository::{Database, EntityReader, RowMatcher};
use crate::types::{EntityId, MetadataKey, MetadataValue, VersionRow};

use entity::EntityTable;
use metadata::MetadataTable;

const METADATA_TABLE: &str = "_metadata";

pub struct LmdbDatabase {
    env: Env,
    tables: HashMap<&'static str, EntityTable>,
    metadata: MetadataTable,
}

impl LmdbDatabase {
    /// Opens (creating if needed) the environment with one database per
    /// entity table. `historical` selects the storage regime for every table.
    pub fn open(
        path: impl AsRef<Path>,
        map_size: usize,
        historical: bool,
        table_names: &[&'static str],
    ) -> IndexerResult<Self> {
        let env = env::open_env(path.as_ref(), map_size, table_names.len() as u32 + 1)?;

        let mut tables = HashMap::with_capacity(table_names.len());
        for name in table_names {
            let table = if historical {
                EntityTable::Historical(env::open_historical_db(&env, name)?)
            } else {
                EntityTable::Live(env::open_live_db(&env, name)?)
            };
            tables.insert(*name, table);
        }
        let metadata = MetadataTable::new(env::open_metadata_db(&env, METADATA_TABLE)?);

        Ok(Self {
            env,
            tables,
            metadata,
        })
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// Every persisted version of the id, height-ordered. Empty in live mode.
    pub fn versions(&self, table: &str, id: &str) -> IndexerResult<Vec<VersionRow>> {
        let txn = self.env.read_txn()?;
        self.table(table)?.versions(&txn, id)
    }

    /// Point-in-time read: the payload whose block range contains `height`.
    pub fn find_by_pk_at(
        &self,
        table: &str,
        id: &str,
        height: crate::types::BlockHeight,
    ) -> IndexerResult<Option<Vec<u8>>> {
        let txn = self.env.read_txn()?;
        self.table(table)?.find_by_pk_at(&txn, id, height)
    }

    fn table(&self, name: &str) -> IndexerResult<&EntityTable> {
        self.tables
            .get(name)
            .ok_or_else(|| IndexerError::UnknownTable(name.to_string()))
    }
}

impl EntityReader for LmdbDatabase {
    fn find_by_pk(&self, table: &str, id: &str) -> IndexerResult<Option<Vec<u8>>> {
        let txn = self.env.read_txn()?;
        self.table(table)?.find_by_pk(&txn, id)
    }

    fn find_where(
        &self,
        table: &str,
        matcher: RowMatcher<'_>,
        exclude: &HashSet<EntityId>,
        offset: usize,
        limit: usize,
    ) -> IndexerResult<Vec<(EntityId, Vec<u8>)>> {
        let txn = self.env.read_txn()?;
        self.table(table)?
            .find_where(&txn, matcher, exclude, offset, limit)
    }

    fn count_where(
        &self,
        table: &str,
        matcher: RowMatcher<'_>,
        exclude: &HashSet<EntityId>,
    ) -> IndexerResult<u64> {
        let txn = self.env.read_txn()?;
        self.table(table)?.count_where(&txn, matcher, exclude)
    }

    fn metadata(&self, key: MetadataKey) -> IndexerResult<Option<MetadataValue>> {
        let txn = self.env.read_txn()?;
        self.metadata.get(&txn, key)
    }
}

impl Database for LmdbDatabase {
    fn apply_flush(&self, plan: FlushPlan) -> IndexerResult<()> {
        let mut txn = self.env.write_txn()?;

        for op in &plan.entity_ops {
            match op {
                EntityFlushOp::CloseRange { table, closures } => {
                    let table = self.table(table)?;
                    for (id, close_at) in closures {
                        table.close_range(&mut txn, id, *close_at)?;
                    }
                }
                EntityFlushOp::InsertVersions { table, rows } => {
                    self.table(table)?.insert_versions(&mut txn, rows)?;
                }
                EntityFlushOp::Upsert { table, rows } => {
                    self.table(table)?.upsert(&mut txn, rows)?;
                }
                EntityFlushOp::Delete { table, ids } => {
                    self.table(table)?.delete(&mut txn, ids)?;
                }
            }
        }
        for op in &plan.metadata_ops {
            match op {
                MetadataFlushOp::Upsert { key, value } => {
                    self.metadata.put(&mut txn, *key, value)?;
                }
                MetadataFlushOp::Increment { key, delta } => {
                    self.metadata.increment(&mut txn, *key, *delta)?;
                }
            }
        }

        txn.commit()?;
        Ok(())
    }
}
