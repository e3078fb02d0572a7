//! Small helpers for building `Config` values in tests without going
//! through a YAML file, mirroring the teacher's `new_test_config` pattern.

use std::time::Duration;

use super::{Config, RawConfig};

/// A single-shard config with generous limits, useful as a baseline.
pub fn new_test_config() -> Config {
    Config::build(RawConfig::default()).expect("valid default test config")
}

pub fn with_shard_count(n: usize) -> Config {
    let mut raw = RawConfig::default();
    raw.shard_count = n;
    Config::build(raw).expect("valid test config")
}

/// Builds the S2 scenario config: single shard, small soft cap.
pub fn soft_cap_config(max_bytes: i64, eviction_threshold: f64, max_value_bytes: i64) -> Config {
    let mut raw = RawConfig::default();
    raw.shard_count = 1;
    raw.max_bytes = max_bytes;
    raw.eviction_threshold = eviction_threshold;
    raw.max_value_bytes = Some(max_value_bytes);
    Config::build(raw).expect("valid soft cap config")
}

/// Builds the S3 scenario config: single shard, hard cap enforced.
pub fn hard_cap_config(max_bytes: i64) -> Config {
    let mut raw = RawConfig::default();
    raw.shard_count = 1;
    raw.hard_memory_limit = true;
    raw.max_bytes = max_bytes;
    Config::build(raw).expect("valid hard cap config")
}

/// Builds the S5 scenario config: TTL clamp.
pub fn max_ttl_config(max_ttl: Duration) -> Config {
    let mut raw = RawConfig::default();
    raw.max_ttl = Some(max_ttl);
    Config::build(raw).expect("valid max ttl config")
}
