use std::path::Path;

use heed::types::{Bytes, SerdeBincode, Str};
use heed::{Database, Env, EnvOpenOptions, Error as HeedError};

use crate::error::IndexerResult;
use crate::types::{MetadataValue, VersionRow};

pub(super) const DEFAULT_MAP_SIZE: usize = 2 << 30;

pub(super) type HistoricalDb = Database<Bytes, SerdeBincode<VersionRow>>;
pub(super) type LiveDb = Database<Str, Bytes>;
pub(super) type MetadataDb = Database<Str, SerdeBincode<MetadataValue>>;

pub(super) fn open_env(path: &Path, map_size: usize, max_dbs: u32) -> IndexerResult<Env> {
    std::fs::create_dir_all(path)?;

    let mut options = EnvOpenOptions::new();
    options.map_size(map_size.max(1));
    options.max_dbs(max_dbs);

    let env = unsafe {
        match options.open(path) {
            Ok(env) => env,
            Err(HeedError::BadOpenOptions { env, .. }) => env,
            Err(err) => {
                tracing::error!(path = ?path, map_size, ?err, "Failed to open LMDB environment");
                return Err(err.into());
            }
        }
    };
    Ok(env)
}

pub(super) fn open_historical_db(env: &Env, name: &str) -> IndexerResult<HistoricalDb> {
    let mut txn = env.write_txn()?;
    let db = env.create_database::<Bytes, SerdeBincode<VersionRow>>(&mut txn, Some(name))?;
    txn.commit()?;
    Ok(db)
}

pub(super) fn open_live_db(env: &Env, name: &str) -> IndexerResult<LiveDb> {
    let mut txn = env.write_txn()?;
    let db = env.create_database::<Str, Bytes>(&mut txn, Some(name))?;
    txn.commit()?;
    Ok(db)
}

pub(super) fn open_metadata_db(env: &Env, name: &str) -> IndexerResult<MetadataDb> {
    let mut txn = env.write_txn()?;
    let db = env.create_database::<Str, SerdeBincode<MetadataValue>>(&mut txn, Some(name))?;
    txn.commit()?;
    Ok(db)
}
