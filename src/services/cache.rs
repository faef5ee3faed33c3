//! Cache service: bounded LRU store with single-flight recomputation.
//!
//! DESIGN
//! ======
//! Entries carry a monotonically increasing access tick; `order` maps tick to
//! key so the least-recently-accessed entry is always `order.first`. Eviction
//! only happens when a *new* key is inserted at capacity.
//!
//! `fetch_or_compute` is single-flight per key: the first caller for a missing
//! key registers a `Flight` and computes while holding only that flight's
//! lock. Later callers for the same key block on the flight and reuse its
//! value; callers for other keys never wait on the compute.
//!
//! TRADE-OFFS
//! ==========
//! `invalidate` and `clear` bump a generation counter. A compute that started
//! before the bump still hands its value to its own waiters, but the value is
//! not written back into the cache, so a reload never resurrects stale content.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    last_access: u64,
}

/// Result slot shared by every caller waiting on one computation.
struct Flight<V> {
    slot: Mutex<Option<V>>,
    generation: u64,
}

struct CacheInner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    order: BTreeMap<u64, String>,
    inflight: HashMap<String, Arc<Flight<V>>>,
    tick: u64,
    generation: u64,
}

/// Bounded key/value cache. Cheap to share behind an `Arc`.
pub struct CacheStore<V> {
    capacity: usize,
    inner: Mutex<CacheInner<V>>,
}

// =============================================================================
// CACHE
// =============================================================================

impl<V: Clone> CacheStore<V> {
    /// A capacity of zero disables storage; `fetch_or_compute` still works
    /// but always recomputes.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                order: BTreeMap::new(),
                inflight: HashMap::new(),
                tick: 0,
                generation: 0,
            }),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up a key, refreshing its access time on hit.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<V> {
        self.lock().touch(key)
    }

    /// Insert or overwrite a key.
    pub fn set(&self, key: &str, value: V) {
        let mut inner = self.lock();
        inner.insert(key, value, self.capacity);
    }

    /// Drop one key. Any in-flight computation for it will not be stored.
    pub fn invalidate(&self, key: &str) {
        let mut inner = self.lock();
        if let Some(entry) = inner.entries.remove(key) {
            inner.order.remove(&entry.last_access);
        }
        inner.inflight.remove(key);
        inner.generation += 1;
    }

    /// Drop everything.
    pub fn clear(&self) {
        let mut inner = self.lock();
        let dropped = inner.entries.len();
        inner.entries.clear();
        inner.order.clear();
        inner.inflight.clear();
        inner.generation += 1;
        debug!(dropped, "cache: cleared");
    }

    /// Return the cached value or compute it exactly once across concurrent
    /// callers for the same key.
    ///
    /// # Errors
    ///
    /// Propagates the compute error to the caller that ran it. Waiters on a
    /// failed flight retry the compute themselves.
    pub fn fetch_or_compute<F, E>(&self, key: &str, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        let flight = {
            let mut inner = self.lock();
            if let Some(value) = inner.touch(key) {
                return Ok(value);
            }
            let generation = inner.generation;
            Arc::clone(
                inner
                    .inflight
                    .entry(key.to_owned())
                    .or_insert_with(|| Arc::new(Flight { slot: Mutex::new(None), generation })),
            )
        };

        let mut slot = flight.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(value) = slot.as_ref() {
            return Ok(value.clone());
        }

        // EDGE: a failed flight leaves the slot empty; the next waiter may
        // find the value stored by a newer flight for the same key.
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        debug!(key, "cache: computing");
        let result = compute();

        let mut inner = self.lock();
        let ours = inner
            .inflight
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, &flight));
        if ours {
            inner.inflight.remove(key);
        }
        let value = result?;
        *slot = Some(value.clone());
        if inner.generation == flight.generation {
            inner.insert(key, value.clone(), self.capacity);
        } else {
            debug!(key, "cache: discarding value computed before invalidation");
        }
        Ok(value)
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner<V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<V: Clone> CacheInner<V> {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn touch(&mut self, key: &str) -> Option<V> {
        let tick = self.next_tick();
        let entry = self.entries.get_mut(key)?;
        self.order.remove(&entry.last_access);
        entry.last_access = tick;
        self.order.insert(tick, key.to_owned());
        Some(entry.value.clone())
    }

    fn insert(&mut self, key: &str, value: V, capacity: usize) {
        if capacity == 0 {
            return;
        }
        let tick = self.next_tick();
        if let Some(entry) = self.entries.get_mut(key) {
            self.order.remove(&entry.last_access);
            entry.value = value;
            entry.last_access = tick;
            self.order.insert(tick, key.to_owned());
            return;
        }

        while self.entries.len() >= capacity {
            let Some((_, oldest)) = self.order.pop_first() else {
                break;
            };
            self.entries.remove(&oldest);
            debug!(key = %oldest, "cache: evicted least recently used");
        }

        self.entries.insert(key.to_owned(), CacheEntry { value, last_access: tick });
        self.order.insert(tick, key.to_owned());
    }
}

#[cfg(test)]
#[path = "cache_test.rs"]
mod tests;
