//! Global and per-namespace counters with a snapshot view (C8).

use std::collections::HashMap;

use parking_lot::Mutex;

/// The four tracked counters, mirrored globally and per namespace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub rejected: u64,
}

/// Diagnostic detail for one shard, part of `metrics()`'s snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardStats {
    pub index: usize,
    pub len: usize,
    pub bytes: i64,
    pub lru_size: usize,
}

/// Default length of the `least_touched` projection folded into
/// `metrics()` (§4.8). Callers wanting a different length use
/// `Cache::least_touched` directly.
pub const DEFAULT_LEAST_TOUCHED: usize = 10;

/// Full snapshot returned by `Cache::metrics()`.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    pub global: Counters,
    pub total_memory: i64,
    pub shards: Vec<ShardStats>,
    pub least_touched: Vec<(String, u64)>,
}

/// Counters scoped to one namespace, returned by `Cache::namespace_metrics`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamespaceMetrics {
    pub counters: Counters,
}

/// Mutex-protected counter registry. All increments and the snapshot read
/// go through the same lock, so a snapshot's counters are mutually
/// consistent at the read instant (§5).
#[derive(Default)]
pub struct Metrics {
    global: Mutex<Counters>,
    per_namespace: Mutex<HashMap<String, Counters>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self, namespace: Option<&str>) {
        self.global.lock().hits += 1;
        self.bump_namespace(namespace, |c| c.hits += 1);
    }

    pub fn record_miss(&self, namespace: Option<&str>) {
        self.global.lock().misses += 1;
        self.bump_namespace(namespace, |c| c.misses += 1);
    }

    pub fn record_eviction(&self, namespace: Option<&str>) {
        self.global.lock().evictions += 1;
        self.bump_namespace(namespace, |c| c.evictions += 1);
    }

    pub fn record_rejected(&self, namespace: Option<&str>) {
        self.global.lock().rejected += 1;
        self.bump_namespace(namespace, |c| c.rejected += 1);
    }

    fn bump_namespace(&self, namespace: Option<&str>, f: impl FnOnce(&mut Counters)) {
        if let Some(ns) = namespace {
            let mut map = self.per_namespace.lock();
            f(map.entry(ns.to_string()).or_default());
        }
    }

    pub fn global_snapshot(&self) -> Counters {
        *self.global.lock()
    }

    pub fn namespace_snapshot(&self, namespace: &str) -> Option<NamespaceMetrics> {
        self.per_namespace
            .lock()
            .get(namespace)
            .copied()
            .map(|counters| NamespaceMetrics { counters })
    }

    pub fn reset(&self) {
        *self.global.lock() = Counters::default();
        self.per_namespace.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_and_namespace_counters_agree() {
        let m = Metrics::new();
        m.record_hit(Some("ns"));
        m.record_miss(None);
        assert_eq!(m.global_snapshot(), Counters { hits: 1, misses: 1, evictions: 0, rejected: 0 });
        assert_eq!(
            m.namespace_snapshot("ns").unwrap().counters,
            Counters { hits: 1, misses: 0, evictions: 0, rejected: 0 }
        );
    }

    #[test]
    fn reset_zeroes_everything() {
        let m = Metrics::new();
        m.record_hit(Some("ns"));
        m.reset();
        assert_eq!(m.global_snapshot(), Counters::default());
        assert!(m.namespace_snapshot("ns").is_none());
    }
}
