//! Fill-to-fit LRU eviction (§4.2, §4.4).

use super::map::Map;
use super::shard::Shard;

/// Per-shard byte threshold: `floor(threshold_bytes / shard_count)`, where
/// `threshold_bytes = floor(max_bytes * eviction_threshold)`.
pub fn per_shard_threshold(max_bytes: i64, eviction_threshold: f64, shard_count: usize) -> i64 {
    let threshold_bytes = (max_bytes as f64 * eviction_threshold) as i64;
    threshold_bytes / shard_count as i64
}

/// Evicts from `shard` while `shard.bytes() + incoming > limit` and the
/// shard is non-empty, reflecting each eviction into `map`'s aggregate.
/// Returns the number of entries evicted.
pub fn fill_to_fit(map: &Map, shard: &Shard, limit: i64, incoming: i64) -> u64 {
    let mut evicted = 0u64;
    while shard.bytes() + incoming > limit {
        match shard.evict_lru() {
            Some((_, freed)) => {
                map.sub_bytes(freed);
                evicted += 1;
            }
            None => break,
        }
    }
    evicted
}
