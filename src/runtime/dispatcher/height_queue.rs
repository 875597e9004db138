use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::error::{IndexerError, IndexerResult};
use crate::types::BlockHeight;

/// Bounded FIFO queue of pending block heights.
///
/// Capacity is fixed at construction. Admission beyond capacity is a
/// programmer error: the dispatch loop is expected to respect `free_space`.
/// `flush` truncates without notifying anyone; in-flight fetches discover the
/// truncation through the staleness check. Callers cancelling mid-pipeline
/// must also flush the task runner.
pub struct HeightQueue {
    inner: Mutex<VecDeque<BlockHeight>>,
    capacity: usize,
}

impl HeightQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn put(&self, height: BlockHeight) -> IndexerResult<()> {
        self.put_many(std::iter::once(height))
    }

    pub fn put_many(&self, heights: impl IntoIterator<Item = BlockHeight>) -> IndexerResult<()> {
        let mut queue = self.inner.lock();
        let incoming: Vec<BlockHeight> = heights.into_iter().collect();
        let free = self.capacity - queue.len();
        if incoming.len() > free {
            return Err(IndexerError::QueueCapacityExceeded {
                requested: incoming.len(),
                free,
            });
        }
        queue.extend(incoming);
        Ok(())
    }

    pub fn take(&self) -> Option<BlockHeight> {
        self.inner.lock().pop_front()
    }

    /// Removes and returns up to `n` heights without waiting.
    pub fn take_many(&self, n: usize) -> Vec<BlockHeight> {
        let mut queue = self.inner.lock();
        let count = n.min(queue.len());
        queue.drain(..count).collect()
    }

    pub fn peek(&self) -> Option<BlockHeight> {
        self.inner.lock().front().copied()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn free_space(&self) -> usize {
        self.capacity - self.inner.lock().len()
    }

    /// Empties the queue.
    pub fn flush(&self) {
        self.inner.lock().clear();
    }
}
