use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{IndexerError, IndexerResult};
use crate::metrics::IndexerMetrics;
use crate::storage::plan::FlushPlan;
use crate::storage::repository::Database;

use super::metadata_cache::CachedMetadataModel;

/// A cache model the controller can drain at a flush boundary.
pub trait FlushableStore: Send + Sync {
    fn table(&self) -> &'static str;
    fn is_flushable(&self) -> bool;
    fn flushable_records(&self) -> usize;
    fn drain_into(&self, plan: &mut FlushPlan) -> IndexerResult<()>;
}

/// Owns every per-entity cache model plus the metadata singleton and decides
/// when their pending state is materialised.
///
/// A flush drains all models into one [`FlushPlan`] (registration order,
/// metadata last, so committed watermarks never describe unflushed rows) and
/// applies it through a single database transaction. Flushes are serialised;
/// a failed apply marks the controller unhealthy and every later call
/// surfaces the recorded error.
pub struct StoreCacheController {
    database: Arc<dyn Database>,
    entity_models: Mutex<Vec<Arc<dyn FlushableStore>>>,
    metadata: Arc<CachedMetadataModel>,
    flush_threshold: usize,
    flush_gate: Mutex<()>,
    fatal_error: Mutex<Option<String>>,
    metrics: IndexerMetrics,
}

impl StoreCacheController {
    pub fn new<D: Database + 'static>(
        database: Arc<D>,
        flush_threshold: usize,
        metrics: IndexerMetrics,
    ) -> Self {
        let reader = Arc::clone(&database) as Arc<dyn crate::storage::repository::EntityReader>;
        let metadata = Arc::new(CachedMetadataModel::new(reader));
        Self {
            database,
            entity_models: Mutex::new(Vec::new()),
            metadata,
            flush_threshold: flush_threshold.max(1),
            flush_gate: Mutex::new(()),
            fatal_error: Mutex::new(None),
            metrics,
        }
    }

    /// Registers an entity model. Registration order is the flush order.
    pub fn register(&self, model: Arc<dyn FlushableStore>) {
        self.entity_models.lock().push(model);
    }

    pub fn metadata(&self) -> Arc<CachedMetadataModel> {
        Arc::clone(&self.metadata)
    }

    pub fn database(&self) -> Arc<dyn Database> {
        Arc::clone(&self.database)
    }

    /// Pending record count across every model, metadata included.
    pub fn flushable_records(&self) -> usize {
        let entities: usize = self
            .entity_models
            .lock()
            .iter()
            .map(|model| model.flushable_records())
            .sum();
        entities + self.metadata.flushable_records()
    }

    /// True once the pending record count crosses the configured threshold.
    pub fn should_flush(&self) -> bool {
        self.flushable_records() >= self.flush_threshold
    }

    /// Drains every flushable model and applies the combined plan atomically.
    ///
    /// Pending state is moved out of the caches before any I/O, so handlers
    /// may keep writing while the transaction commits. A failed apply loses
    /// that drained state; the controller records the failure and refuses
    /// further work.
    pub fn flush(&self) -> IndexerResult<()> {
        let _gate = self.flush_gate.lock();
        self.ensure_healthy()?;

        let mut plan = FlushPlan::default();
        {
            let models = self.entity_models.lock();
            for model in models.iter() {
                if model.is_flushable() {
                    model.drain_into(&mut plan)?;
                }
            }
        }
        if self.metadata.is_flushable() {
            self.metadata.drain_into(&mut plan)?;
        }

        if plan.is_empty() {
            return Ok(());
        }

        let record_count = plan.record_count();
        if let Err(err) = self.database.apply_flush(plan) {
            let reason = err.to_string();
            tracing::error!(%reason, "Flush transaction failed; cache state is lost");
            self.metrics.record_failure();
            *self.fatal_error.lock() = Some(reason);
            return Err(err);
        }

        self.metrics.record_flush(record_count);
        tracing::debug!(record_count, "Flushed store cache");
        Ok(())
    }

    pub fn ensure_healthy(&self) -> IndexerResult<()> {
        match self.fatal_error.lock().clone() {
            Some(reason) => Err(IndexerError::FlushFailure { reason }),
            None => Ok(()),
        }
    }
}
