//! Shard: one bucket of the sharded map (C2).
//!
//! Owns a map of effective key to `Entry`, a doubly linked LRU list, and a
//! byte counter. All three are mutated only under `data`'s lock, matching
//! §3 Invariant 5 (operations on a fixed key serialize through the shard).

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::model::Entry;

use super::lru::LruList;

pub(crate) struct ShardData {
    pub(crate) items: HashMap<Arc<str>, Entry>,
    pub(crate) lru: LruList<Arc<str>>,
}

/// One independent segment of the sharded map.
pub struct Shard {
    pub(crate) data: RwLock<ShardData>,
    bytes: AtomicI64,
}

fn entry_weight(key: &str, entry: &Entry) -> i64 {
    (key.len() + entry.payload_bytes()) as i64
}

impl Shard {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(ShardData {
                items: HashMap::new(),
                lru: LruList::new(),
            }),
            bytes: AtomicI64::new(0),
        }
    }

    pub fn bytes(&self) -> i64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.data.read().items.len()
    }

    /// Number of nodes tracked by the LRU list. Tracks `len()` exactly
    /// (every live entry has exactly one LRU node) but is reported
    /// separately since the two structures are maintained independently.
    pub fn lru_len(&self) -> usize {
        self.data.read().lru.len()
    }

    /// Inserts or replaces `key`. Returns the byte delta applied to the
    /// shard counter (positive on growth, negative on shrink).
    pub fn set(&self, key: Arc<str>, entry: Entry) -> i64 {
        let new_weight = entry_weight(&key, &entry);
        let mut data = self.data.write();

        let delta = if let Some(old) = data.items.get(&key) {
            let old_weight = entry_weight(&key, old);
            new_weight - old_weight
        } else {
            new_weight
        };

        data.items.insert(Arc::clone(&key), entry);
        data.lru.move_to_front(&key);
        self.bytes.fetch_add(delta, Ordering::Relaxed);
        delta
    }

    /// Reads a key and promotes it to MRU, recording the touch. Returns a
    /// decoded-ready reference snapshot through the supplied closure so the
    /// caller never needs to hold the lock beyond this call, plus any bytes
    /// freed by a lazy purge so the caller can reconcile the `Map` aggregate
    /// (the shard's own counter is already updated by `remove`).
    pub fn get_and_touch<R>(&self, key: &str, now_ms: i64, f: impl FnOnce(&Entry) -> R) -> (Option<R>, i64) {
        let data = self.data.upgradable_read();
        let entry = match data.items.get(key) {
            Some(entry) => entry,
            None => return (None, 0),
        };
        if entry.is_expired(now_ms) {
            // Lazy purge: drop the expired entry before returning a miss.
            drop(data);
            let freed = self.remove(key).unwrap_or(0);
            return (None, freed);
        }
        entry.record_touch(now_ms);
        let result = f(entry);
        let mut data = parking_lot::RwLockUpgradableReadGuard::upgrade(data);
        data.lru.move_to_front(&Arc::from(key));
        (Some(result), 0)
    }

    /// Reports whether `key` is present and unexpired, lazily purging it if
    /// it has expired (`exists?`, `replace`'s presence check). The second
    /// element is the bytes freed by a purge triggered in this call, for the
    /// caller to reconcile against the `Map` aggregate.
    pub fn is_live(&self, key: &str, now_ms: i64) -> (bool, i64) {
        let expired = {
            let data = self.data.read();
            match data.items.get(key) {
                Some(entry) => entry.is_expired(now_ms),
                None => return (false, 0),
            }
        };
        if expired {
            let freed = self.remove(key).unwrap_or(0);
            (false, freed)
        } else {
            (true, 0)
        }
    }

    pub fn with_entry<R>(&self, key: &str, f: impl FnOnce(&Entry) -> R) -> Option<R> {
        let data = self.data.read();
        data.items.get(key).map(f)
    }

    /// Removes every key for which `matches(key)` is true. Returns freed
    /// bytes. Used by `clear_namespace` (§4.5).
    pub fn remove_matching(&self, mut matches: impl FnMut(&str) -> bool) -> i64 {
        let mut data = self.data.write();
        let doomed: Vec<Arc<str>> = data
            .items
            .keys()
            .filter(|k| matches(k))
            .cloned()
            .collect();

        let mut freed = 0i64;
        for key in doomed {
            if let Some(entry) = data.items.remove(&key) {
                freed += entry_weight(&key, &entry);
                data.lru.remove(&key);
            }
        }
        self.bytes.fetch_sub(freed, Ordering::Relaxed);
        freed
    }

    /// Removes `key`. Returns the freed byte count if it was present.
    pub fn remove(&self, key: &str) -> Option<i64> {
        let mut data = self.data.write();
        let entry = data.items.remove(key)?;
        let freed = entry_weight(key, &entry);
        data.lru.remove(&Arc::from(key));
        self.bytes.fetch_sub(freed, Ordering::Relaxed);
        Some(freed)
    }

    /// Evicts the least-recently-used entry. Returns the freed bytes and
    /// the evicted key, if the shard was non-empty.
    pub fn evict_lru(&self) -> Option<(Arc<str>, i64)> {
        let mut data = self.data.write();
        let key = data.lru.pop_tail()?;
        let entry = data.items.remove(&key)?;
        let freed = entry_weight(&key, &entry);
        self.bytes.fetch_sub(freed, Ordering::Relaxed);
        Some((key, freed))
    }

    pub fn clear(&self) -> i64 {
        let mut data = self.data.write();
        let freed = self.bytes.swap(0, Ordering::Relaxed);
        data.items.clear();
        data.lru.clear();
        freed
    }

    /// Removes all expired entries (TTL sweep pass). Returns freed bytes.
    pub fn sweep_expired(&self, now_ms: i64) -> i64 {
        let mut data = self.data.write();
        let expired: Vec<Arc<str>> = data
            .items
            .iter()
            .filter(|(_, e)| e.is_expired(now_ms))
            .map(|(k, _)| Arc::clone(k))
            .collect();

        let mut freed = 0i64;
        for key in expired {
            if let Some(entry) = data.items.remove(&key) {
                freed += entry_weight(&key, &entry);
                data.lru.remove(&key);
            }
        }
        self.bytes.fetch_sub(freed, Ordering::Relaxed);
        freed
    }

    /// Read-only walk over all live entries, used for snapshot save and
    /// diagnostics (`all_keys`, `keys`, `least_touched`).
    pub fn walk(&self, mut f: impl FnMut(&str, &Entry)) {
        let data = self.data.read();
        for (k, v) in data.items.iter() {
            f(k, v);
        }
    }
}

impl Default for Shard {
    fn default() -> Self {
        Self::new()
    }
}
