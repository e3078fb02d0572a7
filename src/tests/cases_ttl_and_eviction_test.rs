//! TTL expiry (lazily, via reads, and eagerly, via the background sweeper)
//! combined with soft- and hard-cap eviction under load.

use std::time::Duration;

use crate::cache::Cache;
use crate::config::test_config;
use crate::config::{Config, RawConfig};

#[tokio::test]
async fn expired_entries_are_invisible_to_read_and_exists() {
    let cache = Cache::new(test_config::new_test_config());
    cache.write("soon", &"v".to_string(), Some(Duration::from_millis(20)), None).unwrap();
    assert!(cache.exists("soon", None).unwrap());

    tokio::time::sleep(Duration::from_millis(60)).await;

    assert_eq!(cache.read::<String>("soon", None).unwrap(), None);
    assert!(!cache.exists("soon", None).unwrap());

    // Both lazy-purge paths above must reconcile the shard's freed bytes
    // against the map-level aggregate, not just the shard's own counter.
    assert_eq!(cache.metrics().total_memory, 0);
}

#[tokio::test]
async fn background_sweeper_reclaims_expired_entries_without_a_read() {
    let mut raw = RawConfig::default();
    raw.shard_count = 1;
    raw.sweep_interval = Duration::from_millis(10);
    let cfg = Config::build(raw).unwrap();
    let cache = Cache::new(cfg);

    cache.write("soon", &"v".to_string(), Some(Duration::from_millis(5)), None).unwrap();
    assert_eq!(cache.metrics().shards[0].len, 1);

    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(cache.metrics().shards[0].len, 0);
}

#[tokio::test]
async fn soft_cap_evicts_least_recently_touched_entries() {
    let cache = Cache::new(test_config::soft_cap_config(1024, 0.5, 256));

    for i in 0..40 {
        cache.write(&format!("k{i}"), &"x".repeat(20), None, None).unwrap();
    }

    let snapshot = cache.metrics();
    assert!(snapshot.global.evictions > 0, "expected soft-cap eviction to have triggered");
    assert!(snapshot.total_memory <= 1024, "soft cap should keep memory within max_bytes");

    // The most recently written keys should have survived eviction.
    assert!(cache.exists("k39", None).unwrap());
}

#[tokio::test]
async fn hard_cap_silently_rejects_oversized_writes() {
    let cache = Cache::new(test_config::hard_cap_config(200));

    for i in 0..20 {
        // Each write is individually accepted or silently rejected; never an Err.
        cache.write(&format!("key-{i}"), &"payload".repeat(5), None, None).unwrap();
    }

    let snapshot = cache.metrics();
    assert!(snapshot.total_memory <= 200);
    assert!(snapshot.global.rejected > 0, "hard cap should have rejected some writes");
}
