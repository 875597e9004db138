use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for the indexer runtime.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Base directory for the LMDB environment.
    pub data_dir: PathBuf,
    /// Maximum blocks fetched per batch. Also sizes the height queue and the
    /// indexing backlog (each `batch_size × 3`).
    pub batch_size: usize,
    /// Storage regime: one row per entity version with a block range
    /// (historical) or one row per id (live).
    pub historical: bool,
    /// Wrap fetch and index stages with timing instrumentation.
    pub profiler: bool,
    /// Read-cache capacity per entity type.
    pub cache_max_entries: usize,
    /// Read-cache entry TTL, refreshed on access.
    pub cache_ttl: Duration,
    /// Pending record count that triggers a store flush.
    pub flush_threshold: usize,
    /// Block-count cadence that triggers a store flush regardless of volume.
    pub flush_interval_blocks: u64,
    /// LMDB map size in bytes (default: 2GB)
    pub lmdb_map_size: usize,
}

impl IndexerConfig {
    pub fn new(data_dir: impl AsRef<Path>, batch_size: usize) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            batch_size: batch_size.max(1),
            historical: true,
            profiler: false,
            cache_max_entries: 500,
            cache_ttl: Duration::from_secs(3600),
            flush_threshold: 1000,
            flush_interval_blocks: 100,
            lmdb_map_size: 2 << 30,
        }
    }

    /// Capacity shared by the height queue and the indexing backlog.
    pub fn queue_capacity(&self) -> usize {
        self.batch_size * 3
    }

    pub fn with_historical(mut self, historical: bool) -> Self {
        self.historical = historical;
        self
    }

    pub fn with_profiler(mut self, profiler: bool) -> Self {
        self.profiler = profiler;
        self
    }

    pub fn with_cache_limits(mut self, max_entries: usize, ttl: Duration) -> Self {
        self.cache_max_entries = max_entries.max(1);
        self.cache_ttl = ttl;
        self
    }

    pub fn with_flush_threshold(mut self, threshold: usize) -> Self {
        self.flush_threshold = threshold.max(1);
        self
    }

    pub fn with_flush_interval_blocks(mut self, interval: u64) -> Self {
        self.flush_interval_blocks = interval.max(1);
        self
    }

    pub fn with_lmdb_map_size(mut self, size: usize) -> Self {
        self.lmdb_map_size = size;
        self
    }
}
