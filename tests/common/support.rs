use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use chainsift::dispatcher::{
    BlockFetcher, BlockIndexer, DispatcherCore, HeightQueue, NoopDynamicDsHook, NoopPoiSink,
    OrderedTaskRunner, SerialBlockDispatcher,
};
use chainsift::error::{IndexerError, IndexerResult};
use chainsift::events::NoopEventSink;
use chainsift::metrics::IndexerMetrics;
use chainsift::storage::plan::{EntityFlushOp, FlushPlan, MetadataFlushOp};
use chainsift::storage::repository::{Database, EntityReader, RowMatcher};
use chainsift::store::StoreCacheController;
use chainsift::types::{
    Block, BlockHeight, Entity, EntityId, FieldValue, MetadataKey, MetadataValue,
    ProcessBlockResponse,
};

pub fn tempdir() -> TempDir {
    tempfile::tempdir().expect("failed to create temp dir")
}

pub fn block_at(height: BlockHeight) -> Block {
    Block {
        height,
        hash: format!("0xblock{height}"),
        parent_hash: format!("0xblock{}", height.saturating_sub(1)),
        timestamp: 1_600_000_000 + height,
        payload: Vec::new(),
    }
}

/// Polls `condition` until it holds or the timeout expires.
pub fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestAccount {
    pub id: String,
    pub owner: String,
    pub balance: u64,
}

impl TestAccount {
    pub fn new(id: &str, owner: &str, balance: u64) -> Self {
        Self {
            id: id.to_string(),
            owner: owner.to_string(),
            balance,
        }
    }
}

impl Entity for TestAccount {
    const TABLE: &'static str = "accounts";

    fn id(&self) -> &str {
        &self.id
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "id" => Some(FieldValue::Text(self.id.clone())),
            "owner" => Some(FieldValue::Text(self.owner.clone())),
            "balance" => Some(FieldValue::Uint(self.balance)),
            _ => None,
        }
    }
}

/// In-memory database keeping a live-row view plus a log of applied plans.
#[derive(Default)]
pub struct MemoryDatabase {
    rows: Mutex<BTreeMap<(String, EntityId), Vec<u8>>>,
    metadata: Mutex<BTreeMap<&'static str, MetadataValue>>,
    applied_plans: Mutex<Vec<FlushPlan>>,
    fail_flush: AtomicBool,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_flush(&self) {
        self.fail_flush.store(true, Ordering::SeqCst);
    }

    pub fn applied_plans(&self) -> Vec<FlushPlan> {
        self.applied_plans.lock().unwrap().clone()
    }

    pub fn metadata_value(&self, key: MetadataKey) -> Option<MetadataValue> {
        self.metadata.lock().unwrap().get(key.as_str()).cloned()
    }

    pub fn seed_row(&self, table: &str, id: &str, payload: Vec<u8>) {
        self.rows
            .lock()
            .unwrap()
            .insert((table.to_string(), id.to_string()), payload);
    }
}

impl EntityReader for MemoryDatabase {
    fn find_by_pk(&self, table: &str, id: &str) -> IndexerResult<Option<Vec<u8>>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .get(&(table.to_string(), id.to_string()))
            .cloned())
    }

    fn find_where(
        &self,
        table: &str,
        matcher: RowMatcher<'_>,
        exclude: &HashSet<EntityId>,
        offset: usize,
        limit: usize,
    ) -> IndexerResult<Vec<(EntityId, Vec<u8>)>> {
        let rows = self.rows.lock().unwrap();
        let mut found = Vec::new();
        let mut skipped = 0usize;
        for ((t, id), payload) in rows.iter() {
            if t != table || exclude.contains(id) || !matcher(id, payload) {
                continue;
            }
            if skipped < offset {
                skipped += 1;
                continue;
            }
            found.push((id.clone(), payload.clone()));
            if found.len() >= limit {
                break;
            }
        }
        Ok(found)
    }

    fn count_where(
        &self,
        table: &str,
        matcher: RowMatcher<'_>,
        exclude: &HashSet<EntityId>,
    ) -> IndexerResult<u64> {
        let rows = self.rows.lock().unwrap();
        let mut count = 0u64;
        for ((t, id), payload) in rows.iter() {
            if t == table && !exclude.contains(id) && matcher(id, payload) {
                count += 1;
            }
        }
        Ok(count)
    }

    fn metadata(&self, key: MetadataKey) -> IndexerResult<Option<MetadataValue>> {
        Ok(self.metadata.lock().unwrap().get(key.as_str()).cloned())
    }
}

impl Database for MemoryDatabase {
    fn apply_flush(&self, plan: FlushPlan) -> IndexerResult<()> {
        if self.fail_flush.swap(false, Ordering::SeqCst) {
            return Err(IndexerError::FlushFailure {
                reason: "injected flush failure".to_string(),
            });
        }

        let mut rows = self.rows.lock().unwrap();
        for op in &plan.entity_ops {
            match op {
                EntityFlushOp::CloseRange { table, closures } => {
                    // A closed live row disappears from the live view.
                    for (id, _) in closures {
                        rows.remove(&(table.to_string(), id.clone()));
                    }
                }
                EntityFlushOp::InsertVersions { table, rows: versions } => {
                    for row in versions {
                        if row.end_height.is_none() {
                            rows.insert((table.to_string(), row.id.clone()), row.payload.clone());
                        }
                    }
                }
                EntityFlushOp::Upsert { table, rows: upserts } => {
                    for (id, payload) in upserts {
                        rows.insert((table.to_string(), id.clone()), payload.clone());
                    }
                }
                EntityFlushOp::Delete { table, ids } => {
                    for id in ids {
                        rows.remove(&(table.to_string(), id.clone()));
                    }
                }
            }
        }

        let mut metadata = self.metadata.lock().unwrap();
        for op in &plan.metadata_ops {
            match op {
                MetadataFlushOp::Upsert { key, value } => {
                    metadata.insert(key.as_str(), value.clone());
                }
                MetadataFlushOp::Increment { key, delta } => {
                    let current = metadata
                        .get(key.as_str())
                        .and_then(MetadataValue::as_number)
                        .unwrap_or(0);
                    metadata.insert(key.as_str(), MetadataValue::Number(current + delta));
                }
            }
        }
        drop(metadata);
        drop(rows);

        self.applied_plans.lock().unwrap().push(plan);
        Ok(())
    }
}

/// Fetcher returning synthetic blocks for the requested heights. The first
/// call can be gated on a pair of barriers so tests can race a queue flush
/// against an in-flight batch.
pub struct ScriptedFetcher {
    calls: Mutex<Vec<Vec<BlockHeight>>>,
    call_count: AtomicUsize,
    first_call_gate: Option<(Arc<Barrier>, Arc<Barrier>)>,
    fail_heights: HashSet<BlockHeight>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
            first_call_gate: None,
            fail_heights: HashSet::new(),
        }
    }

    pub fn gated(ready: Arc<Barrier>, release: Arc<Barrier>) -> Self {
        Self {
            first_call_gate: Some((ready, release)),
            ..Self::new()
        }
    }

    pub fn failing_at(heights: impl IntoIterator<Item = BlockHeight>) -> Self {
        Self {
            fail_heights: heights.into_iter().collect(),
            ..Self::new()
        }
    }

    pub fn calls(&self) -> Vec<Vec<BlockHeight>> {
        self.calls.lock().unwrap().clone()
    }
}

impl Default for ScriptedFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockFetcher for ScriptedFetcher {
    fn fetch_blocks(&self, heights: &[BlockHeight]) -> IndexerResult<Vec<Block>> {
        self.calls.lock().unwrap().push(heights.to_vec());
        let call_index = self.call_count.fetch_add(1, Ordering::SeqCst);

        if call_index == 0 {
            if let Some((ready, release)) = &self.first_call_gate {
                ready.wait();
                release.wait();
            }
        }

        if let Some(&height) = heights.iter().find(|h| self.fail_heights.contains(h)) {
            return Err(IndexerError::IndexingFailure {
                block: height,
                reason: "scripted fetch failure".to_string(),
            });
        }
        Ok(heights.iter().copied().map(block_at).collect())
    }
}

/// Indexer recording the heights it sees, with optional scripted failure and
/// an optional gate on the first call.
pub struct RecordingIndexer {
    indexed: Mutex<Vec<BlockHeight>>,
    fail_at: Option<BlockHeight>,
    first_call_gate: Option<(Arc<Barrier>, Arc<Barrier>)>,
    call_count: AtomicUsize,
}

impl RecordingIndexer {
    pub fn new() -> Self {
        Self {
            indexed: Mutex::new(Vec::new()),
            fail_at: None,
            first_call_gate: None,
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn failing_at(height: BlockHeight) -> Self {
        Self {
            fail_at: Some(height),
            ..Self::new()
        }
    }

    pub fn gated(ready: Arc<Barrier>, release: Arc<Barrier>) -> Self {
        Self {
            first_call_gate: Some((ready, release)),
            ..Self::new()
        }
    }

    pub fn indexed(&self) -> Vec<BlockHeight> {
        self.indexed.lock().unwrap().clone()
    }
}

impl Default for RecordingIndexer {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockIndexer for RecordingIndexer {
    fn index_block(&self, block: &Block) -> IndexerResult<ProcessBlockResponse> {
        let call_index = self.call_count.fetch_add(1, Ordering::SeqCst);
        if call_index == 0 {
            if let Some((ready, release)) = &self.first_call_gate {
                ready.wait();
                release.wait();
            }
        }

        self.indexed.lock().unwrap().push(block.height);
        if self.fail_at == Some(block.height) {
            return Err(IndexerError::IndexingFailure {
                block: block.height,
                reason: "scripted handler failure".to_string(),
            });
        }
        Ok(ProcessBlockResponse {
            dynamic_ds_created: false,
            block_hash: block.hash.clone(),
            reindex_block_height: None,
        })
    }
}

/// Wires a full dispatch pipeline over the given collaborators.
pub fn pipeline<D: Database + 'static>(
    batch_size: usize,
    flush_interval_blocks: u64,
    database: Arc<D>,
    fetcher: Arc<dyn BlockFetcher>,
    indexer: Arc<dyn BlockIndexer>,
) -> (Arc<SerialBlockDispatcher>, Arc<StoreCacheController>) {
    let metrics = IndexerMetrics::new();
    let store = Arc::new(StoreCacheController::new(database, 1000, metrics.clone()));
    let queue = Arc::new(HeightQueue::new(batch_size * 3));
    let runner = OrderedTaskRunner::new(batch_size * 3);
    let core = Arc::new(DispatcherCore::new(
        queue,
        Arc::clone(&store),
        Arc::new(NoopEventSink),
        Arc::new(NoopPoiSink),
        Arc::new(NoopDynamicDsHook),
        metrics.clone(),
        flush_interval_blocks,
    ));
    let dispatcher = SerialBlockDispatcher::new(
        core,
        runner,
        fetcher,
        indexer,
        Arc::new(NoopEventSink),
        metrics,
        batch_size,
        false,
    );
    (dispatcher, store)
}
