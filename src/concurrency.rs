//! Per-key lock manager.
//!
//! Serializes read-modify-write sequences on a single key (for the ledger, one
//! account + resource balance) without blocking unrelated keys.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

/// Hands out one mutex per key. Locks for distinct keys never contend.
pub struct KeyLockManager<K> {
    locks: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> KeyLockManager<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Get (or create) the lock for a key.
    ///
    /// The registry mutex is only held while looking up the entry; callers lock
    /// the returned mutex themselves.
    pub fn get_lock(&self, key: &K) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(
            locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Number of keys that have been locked at least once
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop entries nobody currently holds a handle to
    pub fn prune_idle(&self) -> usize {
        let mut locks = self.locks.lock();
        let before = locks.len();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - locks.len()
    }
}

impl<K> Default for KeyLockManager<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
