//! Per-key non-blocking locks.
//!
//! Guards every "inspect orders → cancel → place" sequence for a position.
//! A second trigger for a held key is skipped, not queued: the next sweep
//! or account event re-evaluates the position and converges.
//!
//! Each acquisition carries a generation number so a forced [`LockTable::release`]
//! (position closed) followed by a new acquisition is never undone by the
//! stale guard being dropped later.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug)]
struct Held<K> {
    keys: HashMap<K, u64>,
    next_generation: u64,
}

/// Set of held keys
#[derive(Debug, Clone)]
pub struct LockTable<K> {
    inner: Arc<Mutex<Held<K>>>,
}

fn lock<K>(inner: &Mutex<Held<K>>) -> MutexGuard<'_, Held<K>> {
    inner.lock().unwrap_or_else(|p| p.into_inner())
}

impl<K: Eq + Hash + Clone + Debug> LockTable<K> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Held {
                keys: HashMap::new(),
                next_generation: 0,
            })),
        }
    }

    /// Take the key if free; `None` if another flow holds it
    pub fn try_acquire(&self, key: &K) -> Option<KeyLock<K>> {
        let mut held = lock(&self.inner);
        if held.keys.contains_key(key) {
            debug!(?key, "Key busy, skipping");
            return None;
        }
        held.next_generation += 1;
        let generation = held.next_generation;
        held.keys.insert(key.clone(), generation);
        Some(KeyLock {
            table: Arc::clone(&self.inner),
            key: key.clone(),
            generation,
        })
    }

    pub fn is_locked(&self, key: &K) -> bool {
        lock(&self.inner).keys.contains_key(key)
    }

    /// Drop a key regardless of who holds it; returns whether it was held
    pub fn release(&self, key: &K) -> bool {
        lock(&self.inner).keys.remove(key).is_some()
    }

    /// Currently held keys
    pub fn held(&self) -> Vec<K> {
        lock(&self.inner).keys.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Eq + Hash + Clone + Debug> Default for LockTable<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for one held key
#[derive(Debug)]
pub struct KeyLock<K: Eq + Hash> {
    table: Arc<Mutex<Held<K>>>,
    key: K,
    generation: u64,
}

impl<K: Eq + Hash> KeyLock<K> {
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K: Eq + Hash> Drop for KeyLock<K> {
    fn drop(&mut self) {
        let mut held = lock(&self.table);
        if held.keys.get(&self.key) == Some(&self.generation) {
            held.keys.remove(&self.key);
        }
    }
}
