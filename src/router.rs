//! Deterministic key-to-shard routing (C3).

use xxhash_rust::xxh3::xxh3_64;

/// Hashes an effective key into a stable, non-cryptographic 64-bit digest.
///
/// Deterministic for identical bytes within one process run; distribution
/// uniformity (not cryptographic strength) is what callers rely on.
pub fn hash_key(effective_key: &str) -> u64 {
    xxh3_64(effective_key.as_bytes())
}

/// Selects the shard index for an effective key. `shard_count` must be > 0
/// and fixed for the lifetime of the map (changing it requires a reset).
pub fn shard_index(effective_key: &str, shard_count: usize) -> usize {
    (hash_key(effective_key) % shard_count as u64) as usize
}
