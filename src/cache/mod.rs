//! # Reference-Counted Cache
//!
//! Generic cache shared by the page cache, the data-item layer and the MVCC
//! entry layer. Resources are keyed by `u64` and handed out as `Arc` clones
//! with an explicit reference count maintained by the cache itself:
//!
//! 1. `acquire(key, load)` returns the resource, loading it at most once per
//!    key at any moment (single-flight: concurrent acquirers of a key being
//!    loaded block on a condvar until the load settles).
//! 2. `release(key)` drops one reference. When the count reaches zero the
//!    resource is evicted and returned to the caller, which performs any
//!    write-back the resource type requires.
//! 3. `drain()` evicts everything (used at close; callers write back each
//!    returned resource).
//!
//! Capacity is a resource count; zero means unbounded. When the cache is
//! full and the key is absent, `acquire` fails with `CacheFull` rather than
//! evicting: eviction is purely reference-driven.

use std::sync::Arc;

use eyre::Result;
use hashbrown::{HashMap, HashSet};
use parking_lot::{Condvar, Mutex};

use crate::error::EngineError;

#[derive(Debug)]
struct Slot<T> {
    value: Arc<T>,
    refs: usize,
}

#[derive(Debug)]
struct CacheState<T> {
    slots: HashMap<u64, Slot<T>>,
    loading: HashSet<u64>,
}

#[derive(Debug)]
pub struct RefCache<T> {
    state: Mutex<CacheState<T>>,
    settled: Condvar,
    capacity: usize,
}

impl<T> RefCache<T> {
    /// Creates a cache bounded to `capacity` resources; 0 means unbounded.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(CacheState {
                slots: HashMap::new(),
                loading: HashSet::new(),
            }),
            settled: Condvar::new(),
            capacity,
        }
    }

    /// Returns the resource for `key`, incrementing its reference count.
    ///
    /// If the resource is absent it is produced by `load` with the cache
    /// lock released; a concurrent `acquire` of the same key waits for that
    /// load instead of starting a second one. A failed load leaves no trace.
    pub fn acquire<F>(&self, key: u64, load: F) -> Result<Arc<T>>
    where
        F: FnOnce() -> Result<T>,
    {
        let mut state = self.state.lock();
        loop {
            if state.loading.contains(&key) {
                self.settled.wait(&mut state);
                continue;
            }
            if let Some(slot) = state.slots.get_mut(&key) {
                slot.refs += 1;
                return Ok(Arc::clone(&slot.value));
            }
            if self.capacity > 0 && state.slots.len() + state.loading.len() >= self.capacity {
                return Err(EngineError::CacheFull.into());
            }
            state.loading.insert(key);
            break;
        }
        drop(state);

        let loaded = load();

        let mut state = self.state.lock();
        state.loading.remove(&key);
        self.settled.notify_all();
        match loaded {
            Ok(value) => {
                let value = Arc::new(value);
                state.slots.insert(
                    key,
                    Slot {
                        value: Arc::clone(&value),
                        refs: 1,
                    },
                );
                Ok(value)
            }
            Err(e) => Err(e),
        }
    }

    /// Drops one reference to `key`. Returns the resource when the count hit
    /// zero and the entry was evicted; the caller owns its write-back.
    pub fn release(&self, key: u64) -> Option<Arc<T>> {
        let mut state = self.state.lock();
        let slot = state.slots.get_mut(&key)?;
        slot.refs -= 1;
        if slot.refs == 0 {
            let slot = state.slots.remove(&key);
            return slot.map(|s| s.value);
        }
        None
    }

    /// Evicts every resident resource regardless of reference count and
    /// returns them for write-back. Used at close.
    pub fn drain(&self) -> Vec<Arc<T>> {
        let mut state = self.state.lock();
        state
            .slots
            .drain()
            .map(|(_, slot)| slot.value)
            .collect()
    }

    /// Number of resident resources.
    pub fn len(&self) -> usize {
        self.state.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
