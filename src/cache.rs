//! The public cache facade (C9): read/write/update/delete/replace/fetch/
//! inspect and the diagnostic operations.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};

use crate::clock;
use crate::codec::{Codec, CodecError};
use crate::config::Config;
use crate::metrics::{Metrics, MetricsSnapshot, NamespaceMetrics, ShardStats, DEFAULT_LEAST_TOUCHED};
use crate::model::{Entry, EntryMeta};
use crate::namespace::{self, NamespaceError};
use crate::singleflight::{self, Role, SingleFlight};
use crate::storage::Map;
use crate::ttl::{self, Sweeper};

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error(transparent)]
    Namespace(#[from] NamespaceError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// An explicitly owned cache instance (§9: the historical singleton becomes
/// an owned value whose lifetime the host controls).
pub struct Cache {
    cfg: Config,
    map: Arc<Map>,
    codec: Codec,
    metrics: Metrics,
    singleflight: SingleFlight,
    sweeper: Arc<Sweeper>,
}

impl Cache {
    pub fn new(cfg: Config) -> Arc<Self> {
        let map = Arc::new(Map::new(cfg.shard_count));
        let codec = Codec::new(cfg.serializer, cfg.compress);
        let sweeper = Arc::new(Sweeper::new());
        sweeper.start(Arc::clone(&map), cfg.sweep_interval);

        Arc::new(Self {
            cfg,
            map,
            codec,
            metrics: Metrics::new(),
            singleflight: SingleFlight::new(),
            sweeper,
        })
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Stops the background sweeper. Does not touch persistence; callers
    /// that enabled persistence should call `snapshot::save` explicitly or
    /// rely on the installed at-exit hook (C10).
    pub fn shutdown(&self) {
        self.sweeper.stop();
    }

    fn effective_key(&self, key: &str, namespace: Option<&str>) -> Result<String, CacheError> {
        Ok(namespace::effective_key(key, namespace)?)
    }

    // ---- C9 operations ----------------------------------------------

    pub fn read<T: DeserializeOwned>(
        &self,
        key: &str,
        namespace: Option<&str>,
    ) -> Result<Option<T>, CacheError> {
        let eff_key = self.effective_key(key, namespace)?;
        let shard = self.map.shard_for(&eff_key);
        let now = clock::now_millis();

        let (result, purged) = shard.get_and_touch(&eff_key, now, |entry| self.codec.decode::<T>(&entry.payload));
        if purged > 0 {
            self.map.sub_bytes(purged);
        }

        match result {
            Some(Ok(value)) => {
                self.metrics.record_hit(namespace);
                Ok(Some(value))
            }
            Some(Err(e)) => {
                // Corruption is fatal: remove the entry and surface the error.
                if let Some(freed) = shard.remove(&eff_key) {
                    self.map.sub_bytes(freed);
                }
                Err(CacheError::Codec(e))
            }
            None => {
                self.metrics.record_miss(namespace);
                Ok(None)
            }
        }
    }

    pub fn write<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
        namespace: Option<&str>,
    ) -> Result<(), CacheError> {
        let eff_key = self.effective_key(key, namespace)?;
        let encoded = self.codec.encode(value)?;
        self.write_encoded(&eff_key, encoded, ttl, namespace);
        Ok(())
    }

    fn write_encoded(
        &self,
        eff_key: &str,
        encoded: Vec<u8>,
        ttl: Option<Duration>,
        namespace: Option<&str>,
    ) {
        if let Some(max_value) = self.cfg.max_value_bytes {
            if encoded.len() as i64 > max_value {
                return;
            }
        }

        let now = clock::now_millis();
        let effective_ttl = ttl::effective_ttl(ttl, self.cfg.default_ttl, self.cfg.max_ttl);
        let expires_at = ttl::expires_at(now, effective_ttl);
        self.insert_with_cap_check(eff_key, encoded, now, expires_at, namespace);
    }

    /// Applies the hard-cap rejection and `fill_to_fit` eviction shared by
    /// every insertion path (`write_encoded`, `update`, snapshot restore).
    /// Returns whether the entry was actually inserted (false means a
    /// silent capacity rejection, mirroring `write`'s contract).
    fn insert_with_cap_check(
        &self,
        eff_key: &str,
        encoded: Vec<u8>,
        created_at: i64,
        expires_at: Option<i64>,
        namespace: Option<&str>,
    ) -> bool {
        let shard = self.map.shard_for(eff_key);
        let existing_weight = shard
            .with_entry(eff_key, |e| (eff_key.len() + e.payload_bytes()) as i64)
            .unwrap_or(0);
        let new_weight = (eff_key.len() + encoded.len()) as i64;
        let prospective = self.map.total_bytes() - existing_weight + new_weight;

        if self.cfg.hard_memory_limit && prospective > self.cfg.max_bytes {
            self.metrics.record_rejected(namespace);
            return false;
        }

        let entry = Entry::new(encoded.into_boxed_slice(), created_at, expires_at);
        let delta = shard.set(Arc::from(eff_key), entry);
        self.map.add_bytes(delta);

        self.fill_to_fit(eff_key, namespace);
        true
    }

    /// Restores one snapshot record through the same capacity and eviction
    /// enforcement as a normal `write` (§4.10), preserving the original
    /// `created_at`/`expires_at` rather than recomputing a TTL. Returns
    /// whether the record was kept; `false` means it was dropped by the
    /// same rejection rules a live write would have hit.
    pub(crate) fn restore_encoded(&self, eff_key: &str, encoded: Vec<u8>, created_at: i64, expires_at: Option<i64>) -> bool {
        if let Some(max_value) = self.cfg.max_value_bytes {
            if encoded.len() as i64 > max_value {
                return false;
            }
        }
        self.insert_with_cap_check(eff_key, encoded, created_at, expires_at, None)
    }

    fn fill_to_fit(&self, eff_key: &str, namespace: Option<&str>) {
        let shard = self.map.shard_for(eff_key);
        let limit = crate::storage::eviction::per_shard_threshold(
            self.cfg.max_bytes,
            self.cfg.eviction_threshold,
            self.cfg.shard_count,
        );
        let evicted = crate::storage::eviction::fill_to_fit(&self.map, shard, limit, 0);
        for _ in 0..evicted {
            self.metrics.record_eviction(namespace);
        }
    }

    /// Reads the current value, runs `f` outside any lock, then writes the
    /// result back. No-op if the key was absent (update mutates, it does
    /// not create — creation happens via `write`/`fetch`).
    pub fn update<T, F>(&self, key: &str, namespace: Option<&str>, f: F) -> Result<(), CacheError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(T) -> T,
    {
        let eff_key = self.effective_key(key, namespace)?;
        let shard = self.map.shard_for(&eff_key);
        let now = clock::now_millis();

        let Some((current, original_ttl_ms, touches)) = shard.with_entry(&eff_key, |e| {
            if e.is_expired(now) {
                None
            } else {
                Some((
                    self.codec.decode::<T>(&e.payload),
                    e.original_ttl_ms(),
                    e.touches(),
                ))
            }
        }).flatten() else {
            return Ok(());
        };

        let current = current?;
        let next = f(current);
        let encoded = self.codec.encode(&next)?;

        if let Some(max_value) = self.cfg.max_value_bytes {
            if encoded.len() as i64 > max_value {
                return Ok(());
            }
        }

        let existing_weight = shard
            .with_entry(&eff_key, |e| (eff_key.len() + e.payload_bytes()) as i64)
            .unwrap_or(0);
        let new_weight = (eff_key.len() + encoded.len()) as i64;
        let prospective = self.map.total_bytes() - existing_weight + new_weight;

        if self.cfg.hard_memory_limit && prospective > self.cfg.max_bytes {
            self.metrics.record_rejected(namespace);
            return Ok(());
        }

        // Preserve the original TTL duration rather than re-applying
        // default_ttl (§9 Open Question 1), and preserve the touch count
        // (§9 Open Question 2).
        let expires_at = original_ttl_ms.map(|ms| now + ms);
        let entry = Entry::with_touches(encoded.into_boxed_slice(), now, expires_at, touches, now);

        let delta = shard.set(Arc::from(eff_key.as_str()), entry);
        self.map.add_bytes(delta);
        self.fill_to_fit(&eff_key, namespace);

        Ok(())
    }

    pub fn delete(&self, key: &str, namespace: Option<&str>) -> Result<(), CacheError> {
        let eff_key = self.effective_key(key, namespace)?;
        let shard = self.map.shard_for(&eff_key);
        if let Some(freed) = shard.remove(&eff_key) {
            self.map.sub_bytes(freed);
        }
        Ok(())
    }

    /// Alias for `delete`, matching the source's `clear(key)` naming (§4.9).
    pub fn clear(&self, key: &str, namespace: Option<&str>) -> Result<(), CacheError> {
        self.delete(key, namespace)
    }

    pub fn replace<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
        namespace: Option<&str>,
    ) -> Result<(), CacheError> {
        let eff_key = self.effective_key(key, namespace)?;
        let now = clock::now_millis();
        let (live, purged) = self.map.shard_for(&eff_key).is_live(&eff_key, now);
        if purged > 0 {
            self.map.sub_bytes(purged);
        }
        if !live {
            return Ok(());
        }
        let encoded = self.codec.encode(value)?;
        self.write_encoded(&eff_key, encoded, ttl, namespace);
        Ok(())
    }

    pub fn exists(&self, key: &str, namespace: Option<&str>) -> Result<bool, CacheError> {
        let eff_key = self.effective_key(key, namespace)?;
        let now = clock::now_millis();
        let (live, purged) = self.map.shard_for(&eff_key).is_live(&eff_key, now);
        if purged > 0 {
            self.map.sub_bytes(purged);
        }
        Ok(live)
    }

    /// Fetch-or-compute (§4.7). When `singleflight` is true, concurrent
    /// misses for the same key are de-duplicated: one caller runs `make`,
    /// the rest wait and then re-read the value it wrote.
    pub async fn fetch<T, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        force: bool,
        singleflight: bool,
        namespace: Option<&str>,
        make: impl FnOnce() -> Fut,
    ) -> Result<T, CacheError>
    where
        T: Serialize + DeserializeOwned,
        Fut: Future<Output = T>,
    {
        let eff_key = self.effective_key(key, namespace)?;

        if !force {
            if let Some(value) = self.read::<T>(key, namespace)? {
                return Ok(value);
            }
        }

        if !singleflight {
            let value = make().await;
            self.write(key, &value, ttl, namespace)?;
            return Ok(value);
        }

        match self.singleflight.join(&eff_key) {
            Role::Leader => {
                let value = make().await;
                self.write(key, &value, ttl, namespace)?;
                self.singleflight.finish(&eff_key);
                Ok(value)
            }
            Role::Follower(mut rx) => {
                singleflight::wait_for_leader(&mut rx).await;
                match self.read::<T>(key, namespace)? {
                    Some(value) => Ok(value),
                    None => {
                        // Leader's write was rejected (capacity); recompute.
                        let value = make().await;
                        self.write(key, &value, ttl, namespace)?;
                        Ok(value)
                    }
                }
            }
        }
    }

    pub fn inspect(&self, key: &str, namespace: Option<&str>) -> Result<Option<EntryMeta>, CacheError> {
        let eff_key = self.effective_key(key, namespace)?;
        let shard_index = self.map.shard_index_of(&eff_key);
        let shard = self.map.shard(shard_index);
        let now = clock::now_millis();

        Ok(shard.with_entry(&eff_key, |e| {
            if e.is_expired(now) {
                None
            } else {
                Some(EntryMeta {
                    key: key.to_string(),
                    shard_index,
                    expires_at: e.expires_at,
                    created_at: e.created_at,
                    size_bytes: e.payload_bytes(),
                    compressed: self.cfg.compress,
                })
            }
        }).flatten())
    }

    pub fn keys(&self, namespace: &str) -> Result<Vec<String>, CacheError> {
        if namespace.is_empty() {
            return Err(CacheError::Namespace(NamespaceError::Empty));
        }
        let now = clock::now_millis();
        let mut out = Vec::new();
        for shard in self.map.shards() {
            shard.walk(|eff_key, entry| {
                if entry.is_expired(now) {
                    return;
                }
                if let Some(raw) = namespace::strip_prefix(eff_key, namespace) {
                    out.push(raw.to_string());
                }
            });
        }
        Ok(out)
    }

    pub fn clear_namespace(&self, namespace: &str) -> Result<(), CacheError> {
        if namespace.is_empty() {
            return Err(CacheError::Namespace(NamespaceError::Empty));
        }
        let prefix = format!("{namespace}:");
        for shard in self.map.shards() {
            let freed = shard.remove_matching(|k| k.starts_with(&prefix));
            self.map.sub_bytes(freed);
        }
        Ok(())
    }

    pub fn least_touched(&self, n: usize) -> Vec<(String, u64)> {
        let mut all = Vec::new();
        let now = clock::now_millis();
        for shard in self.map.shards() {
            shard.walk(|k, e| {
                if !e.is_expired(now) {
                    all.push((k.to_string(), e.touches()));
                }
            });
        }
        all.sort_by_key(|(_, touches)| *touches);
        all.truncate(n);
        all
    }

    pub fn all_keys(&self) -> Vec<String> {
        let mut out = Vec::new();
        for shard in self.map.shards() {
            shard.walk(|k, _| out.push(k.to_string()));
        }
        out
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        let shards = self
            .map
            .shards()
            .iter()
            .enumerate()
            .map(|(index, shard)| ShardStats {
                index,
                len: shard.len(),
                bytes: shard.bytes(),
                lru_size: shard.lru_len(),
            })
            .collect();

        MetricsSnapshot {
            global: self.metrics.global_snapshot(),
            total_memory: self.map.total_bytes(),
            shards,
            least_touched: self.least_touched(DEFAULT_LEAST_TOUCHED),
        }
    }

    pub fn namespace_metrics(&self, namespace: &str) -> Option<NamespaceMetrics> {
        self.metrics.namespace_snapshot(namespace)
    }

    /// Stops the sweeper, rebuilds every shard empty, and zeroes all
    /// counters (§4.11). `all_keys()` is empty and every counter is zero
    /// immediately afterward (testable property 9).
    pub fn reset(&self) {
        self.sweeper.stop();
        self.map.clear();
        self.metrics.reset();
        self.sweeper.start(Arc::clone(&self.map), self.cfg.sweep_interval);
    }

    pub(crate) fn map(&self) -> &Arc<Map> {
        &self.map
    }

    pub(crate) fn codec(&self) -> &Codec {
        &self.codec
    }
}

impl Drop for Cache {
    fn drop(&mut self) {
        self.sweeper.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn s1_basic_write_read_delete() {
        let cache = Cache::new(test_config::new_test_config());
        cache.write("user:123", &"Alice".to_string(), Some(Duration::from_secs(600)), None).unwrap();
        let v: Option<String> = cache.read("user:123", None).unwrap();
        assert_eq!(v, Some("Alice".to_string()));
        assert!(cache.exists("user:123", None).unwrap());
        cache.delete("user:123", None).unwrap();
        let v: Option<String> = cache.read("user:123", None).unwrap();
        assert_eq!(v, None);
    }

    #[test]
    fn s2_lru_eviction_under_soft_cap() {
        let cfg = test_config::soft_cap_config(120, 0.5, 100);
        let cache = Cache::new(cfg);
        cache.write("a", &"a".repeat(50), None, None).unwrap();
        cache.write("b", &"b".repeat(50), None, None).unwrap();

        let a: Option<String> = cache.read("a", None).unwrap();
        let b: Option<String> = cache.read("b", None).unwrap();
        assert_eq!(a, None);
        assert_eq!(b, Some("b".repeat(50)));
        assert!(cache.metrics().global.evictions >= 1);
    }

    #[test]
    fn s3_hard_cap_rejection() {
        let cfg = test_config::hard_cap_config(100);
        let cache = Cache::new(cfg);
        cache.write("a", &"a".repeat(90), None, None).unwrap();
        cache.write("b", &"b".repeat(90), None, None).unwrap();

        let a: Option<String> = cache.read("a", None).unwrap();
        let b: Option<String> = cache.read("b", None).unwrap();
        assert_eq!(a, Some("a".repeat(90)));
        assert_eq!(b, None);
        assert!(cache.metrics().global.rejected >= 1);
    }

    #[test]
    fn s4_namespace_isolation() {
        let cache = Cache::new(test_config::new_test_config());
        {
            let _scope = namespace::with_namespace("test").unwrap();
            cache.write("foo", &"bar".to_string(), None, None).unwrap();
        }
        let scoped: Option<String> = cache.read("foo", Some("test")).unwrap();
        let unscoped: Option<String> = cache.read("foo", None).unwrap();
        assert_eq!(scoped, Some("bar".to_string()));
        assert_eq!(unscoped, None);

        cache.write("x", &1i32, None, Some("alpha")).unwrap();
        cache.write("x", &2i32, None, Some("beta")).unwrap();
        assert_eq!(cache.read::<i32>("x", Some("alpha")).unwrap(), Some(1));
        assert_eq!(cache.read::<i32>("x", Some("beta")).unwrap(), Some(2));
    }

    #[test]
    fn s5_ttl_clamp() {
        let cfg = test_config::max_ttl_config(Duration::from_secs(60));
        let cache = Cache::new(cfg);
        cache.write("k", &"v".to_string(), Some(Duration::from_secs(300)), None).unwrap();
        let meta = cache.inspect("k", None).unwrap().unwrap();
        let delta = meta.expires_at.unwrap() - meta.created_at;
        assert!(delta > 0 && delta <= 60_000);
    }

    #[tokio::test]
    async fn s6_single_flight_fetch() {
        let cache = Cache::new(test_config::new_test_config());
        cache.delete("sf", None).unwrap();

        let invocations = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..5 {
            let cache = Arc::clone(&cache);
            let invocations = Arc::clone(&invocations);
            handles.push(tokio::spawn(async move {
                cache
                    .fetch("sf", None, false, true, None, || {
                        let invocations = Arc::clone(&invocations);
                        async move {
                            invocations.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(30)).await;
                            "v".to_string()
                        }
                    })
                    .await
                    .unwrap()
            }));
        }

        let mut results = Vec::new();
        for h in handles {
            results.push(h.await.unwrap());
        }

        assert_eq!(invocations.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| r == "v"));
        assert_eq!(cache.read::<String>("sf", None).unwrap(), Some("v".to_string()));
    }

    #[test]
    fn clear_namespace_only_affects_named_namespace() {
        let cache = Cache::new(test_config::new_test_config());
        cache.write("a", &1i32, None, Some("ns1")).unwrap();
        cache.write("b", &2i32, None, Some("ns2")).unwrap();
        cache.clear_namespace("ns1").unwrap();
        assert_eq!(cache.keys("ns1").unwrap(), Vec::<String>::new());
        assert_eq!(cache.keys("ns2").unwrap(), vec!["b".to_string()]);
    }

    #[test]
    fn reset_zeroes_state() {
        let cache = Cache::new(test_config::new_test_config());
        cache.write("a", &1i32, None, None).unwrap();
        cache.read::<i32>("a", None).unwrap();
        cache.reset();
        assert!(cache.all_keys().is_empty());
        let m = cache.metrics();
        assert_eq!(m.global.hits, 0);
        assert_eq!(m.global.misses, 0);
    }

    #[test]
    fn least_touched_orders_ascending() {
        let cache = Cache::new(test_config::new_test_config());
        cache.write("a", &1i32, None, None).unwrap();
        cache.write("b", &2i32, None, None).unwrap();
        cache.read::<i32>("b", None).unwrap();
        cache.read::<i32>("b", None).unwrap();
        cache.read::<i32>("a", None).unwrap();
        let ranked = cache.least_touched(2);
        assert_eq!(ranked[0].0, "a");
        assert_eq!(ranked[1].0, "b");
    }

    #[test]
    fn update_preserves_ttl_and_touches() {
        let cache = Cache::new(test_config::new_test_config());
        cache.write("k", &1i32, Some(Duration::from_secs(100)), None).unwrap();
        cache.read::<i32>("k", None).unwrap();
        cache.update::<i32, _>("k", None, |v| v + 1).unwrap();
        let meta = cache.inspect("k", None).unwrap().unwrap();
        assert!(meta.expires_at.is_some());
        assert_eq!(cache.read::<i32>("k", None).unwrap(), Some(2));
    }

    #[test]
    fn update_on_absent_key_is_noop() {
        let cache = Cache::new(test_config::new_test_config());
        cache.update::<i32, _>("missing", None, |v| v + 1).unwrap();
        assert_eq!(cache.read::<i32>("missing", None).unwrap(), None);
    }

    #[test]
    fn value_over_max_value_bytes_is_dropped() {
        let mut raw = crate::config::RawConfig::default();
        raw.shard_count = 1;
        raw.max_value_bytes = Some(4);
        let cfg = crate::config::Config::build(raw).unwrap();
        let cache = Cache::new(cfg);

        cache.write("k", &"this value is definitely too long".to_string(), None, None).unwrap();
        assert!(!cache.exists("k", None).unwrap());
    }
}
