//! Sharded map: aggregates per-shard byte counters and routes by key (C3+C4).

use std::sync::atomic::{AtomicI64, Ordering};

use crate::router;

use super::shard::Shard;

/// A sharded collection of independent `Shard`s with a running total byte
/// counter. `shard_count` is fixed for the map's lifetime; changing it
/// requires rebuilding a new `Map` (§4.3, §4.11).
pub struct Map {
    shards: Vec<Shard>,
    bytes: AtomicI64,
}

impl Map {
    pub fn new(shard_count: usize) -> Self {
        assert!(shard_count > 0, "shard_count must be > 0");
        let mut shards = Vec::with_capacity(shard_count);
        for _ in 0..shard_count {
            shards.push(Shard::new());
        }
        Self {
            shards,
            bytes: AtomicI64::new(0),
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn total_bytes(&self) -> i64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn shard_for(&self, effective_key: &str) -> &Shard {
        &self.shards[router::shard_index(effective_key, self.shards.len())]
    }

    pub fn shard_index_of(&self, effective_key: &str) -> usize {
        router::shard_index(effective_key, self.shards.len())
    }

    pub fn shard(&self, index: usize) -> &Shard {
        &self.shards[index]
    }

    pub fn shards(&self) -> &[Shard] {
        &self.shards
    }

    /// Records a byte delta produced by a shard-local mutation into the
    /// map-wide aggregate.
    pub fn add_bytes(&self, delta: i64) {
        if delta != 0 {
            self.bytes.fetch_add(delta, Ordering::Relaxed);
        }
    }

    pub fn sub_bytes(&self, amount: i64) {
        if amount != 0 {
            self.bytes.fetch_sub(amount, Ordering::Relaxed);
        }
    }

    pub fn clear(&self) {
        for shard in &self.shards {
            let freed = shard.clear();
            self.sub_bytes(freed);
        }
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(Shard::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_deterministically() {
        let map = Map::new(8);
        assert_eq!(map.shard_index_of("k"), map.shard_index_of("k"));
    }

    #[test]
    fn clear_zeroes_totals() {
        let map = Map::new(4);
        map.add_bytes(10);
        assert_eq!(map.total_bytes(), 10);
        map.clear();
        assert_eq!(map.total_bytes(), 0);
    }
}
