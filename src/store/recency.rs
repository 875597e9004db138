use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;

use crate::types::EntityId;

struct RecencyEntry<V> {
    value: Option<V>,
    stamped_at: Instant,
}

/// Capacity-bounded map with recency eviction and a per-entry TTL that is
/// refreshed on access.
///
/// Stores `Some(value)` for confirmed rows and `None` as a negative marker
/// for ids confirmed absent in the database at fetch time.
pub struct RecencyMap<V> {
    entries: LruCache<EntityId, RecencyEntry<V>>,
    ttl: Duration,
}

impl<V: Clone> RecencyMap<V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity is nonzero");
        Self {
            entries: LruCache::new(capacity),
            ttl,
        }
    }

    /// Outer `None` means the id is not cached; `Some(None)` is the negative
    /// marker.
    pub fn get(&mut self, id: &str) -> Option<Option<V>> {
        let now = Instant::now();
        match self.entries.get_mut(id) {
            Some(entry) if now.duration_since(entry.stamped_at) <= self.ttl => {
                entry.stamped_at = now;
                Some(entry.value.clone())
            }
            Some(_) => {
                self.entries.pop(id);
                None
            }
            None => None,
        }
    }

    pub fn has(&mut self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn set(&mut self, id: EntityId, value: Option<V>) {
        self.entries.put(
            id,
            RecencyEntry {
                value,
                stamped_at: Instant::now(),
            },
        );
    }

    pub fn remove(&mut self, id: &str) {
        self.entries.pop(id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> Vec<EntityId> {
        self.entries.iter().map(|(id, _)| id.clone()).collect()
    }

    /// Visits live (non-expired) entries in recency order without refreshing
    /// their age.
    pub fn for_each(&self, mut visitor: impl FnMut(&EntityId, &Option<V>)) {
        let now = Instant::now();
        for (id, entry) in self.entries.iter() {
            if now.duration_since(entry.stamped_at) <= self.ttl {
                visitor(id, &entry.value);
            }
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
