//! Bounded FIFO cache for chunk contents.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use crate::chunk::ChunkId;

/// Insertion-ordered map from [`ChunkId`] to chunk bytes with a fixed entry
/// capacity. When full, `set` evicts the earliest-inserted entry. Reads take
/// a shared lock so concurrent `get` callers never serialise on each other.
pub struct FifoCache {
    inner: RwLock<Inner>,
    capacity: usize,
}

struct Inner {
    map: HashMap<ChunkId, Vec<u8>>,
    order: VecDeque<ChunkId>,
}

impl FifoCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                map: HashMap::with_capacity(capacity.min(1024)),
                order: VecDeque::new(),
            }),
            capacity,
        }
    }

    pub fn get(&self, id: &ChunkId) -> Option<Vec<u8>> {
        let inner = self.inner.read().expect("cache lock poisoned");
        inner.map.get(id).cloned()
    }

    pub fn set(&self, id: ChunkId, value: Vec<u8>) {
        if self.capacity == 0 {
            return;
        }
        let mut inner = self.inner.write().expect("cache lock poisoned");
        if inner.map.contains_key(&id) {
            inner.map.insert(id, value);
            return;
        }
        if inner.map.len() == self.capacity {
            if let Some(evicted) = inner.order.pop_front() {
                inner.map.remove(&evicted);
            }
        }
        inner.order.push_back(id);
        inner.map.insert(id, value);
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("cache lock poisoned").map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
