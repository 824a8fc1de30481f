//! In-process LRU tier.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::{CacheTier, CachedValue, TierStats};

/// Default number of entries the memory tier holds.
pub const DEFAULT_MEMORY_CAPACITY: usize = 500;

struct Entry {
    value: Arc<CachedValue>,
    tick: u64,
}

#[derive(Default)]
struct MemoryState {
    entries: HashMap<String, Entry>,
    /// Recency order: lowest tick is least recently used.
    order: BTreeMap<u64, String>,
    tick: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl MemoryState {
    fn touch(&mut self, key: &str) {
        self.tick += 1;
        let tick = self.tick;
        if let Some(entry) = self.entries.get_mut(key) {
            self.order.remove(&entry.tick);
            entry.tick = tick;
            self.order.insert(tick, key.to_string());
        }
    }

    fn evict_lru(&mut self) -> Option<String> {
        let (_, key) = self.order.pop_first()?;
        self.entries.remove(&key);
        self.evictions += 1;
        Some(key)
    }

    fn drop_entry(&mut self, key: &str) -> Option<Entry> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.tick);
        Some(entry)
    }
}

/// Fast tier: a strict LRU map of shared handles.
///
/// Values are handed out as `Arc<CachedValue>`. A holder that is done with a
/// value may call [`MemoryTier::release`]; if the cache is then the only
/// holder, its copy is dropped too.
pub struct MemoryTier {
    capacity: usize,
    state: Mutex<MemoryState>,
}

impl MemoryTier {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Drop the cached copy of `key` when no one outside the cache holds it.
    ///
    /// Returns true if the entry was removed.
    pub fn release(&self, key: &str) -> bool {
        let mut state = self.state.lock();
        let unreferenced = state
            .entries
            .get(key)
            .is_some_and(|entry| Arc::strong_count(&entry.value) == 1);
        if unreferenced {
            state.drop_entry(key);
            debug!(key, "released unreferenced cache entry");
        }
        unreferenced
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for MemoryTier {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_CAPACITY)
    }
}

impl CacheTier for MemoryTier {
    fn name(&self) -> &str {
        "memory"
    }

    fn get(&self, key: &str) -> Option<Arc<CachedValue>> {
        let mut state = self.state.lock();
        match state.entries.get(key).map(|entry| Arc::clone(&entry.value)) {
            Some(value) => {
                state.touch(key);
                state.hits += 1;
                Some(value)
            }
            None => {
                state.misses += 1;
                None
            }
        }
    }

    fn put(&self, key: &str, value: Arc<CachedValue>) {
        let mut state = self.state.lock();
        state.drop_entry(key);
        while state.entries.len() >= self.capacity {
            if let Some(evicted) = state.evict_lru() {
                debug!(key = %evicted, "evicted least recently used entry");
            } else {
                break;
            }
        }
        state.tick += 1;
        let tick = state.tick;
        state.order.insert(tick, key.to_string());
        state.entries.insert(key.to_string(), Entry { value, tick });
    }

    fn remove(&self, key: &str) -> bool {
        self.state.lock().drop_entry(key).is_some()
    }

    fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.order.clear();
    }

    fn keys(&self) -> Vec<String> {
        self.state.lock().entries.keys().cloned().collect()
    }

    fn stats(&self) -> TierStats {
        let state = self.state.lock();
        TierStats {
            name: self.name().to_string(),
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            size: state.entries.len(),
            capacity: self.capacity,
        }
    }

    fn maintain(&self) {
        let mut state = self.state.lock();
        while state.entries.len() > self.capacity {
            if state.evict_lru().is_none() {
                break;
            }
        }
        debug!(size = state.entries.len(), "memory tier maintenance");
    }
}
