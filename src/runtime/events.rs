use crate::types::BlockHeight;

/// Fire-and-forget notifications emitted by the dispatch pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexerEvent {
    /// Buffered heights and indexing backlog after a fetch iteration.
    QueueSize {
        heights_pending: usize,
        runner_backlog: usize,
    },
    /// A block entered the indexing stage.
    Progress { height: BlockHeight },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: IndexerEvent);
}

/// Default sink: drops everything.
#[derive(Debug, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: IndexerEvent) {}
}
