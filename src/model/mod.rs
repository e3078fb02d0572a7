//! The cache's data model: the stored `Entry` and its diagnostic projection.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// One stored record for an effective key.
///
/// `payload` is opaque bytes already produced by the codec; the cache never
/// inspects its contents. `touches` is bumped on every successful `read`
/// only — writes and updates leave it at its prior value.
pub struct Entry {
    pub payload: Box<[u8]>,
    pub expires_at: Option<i64>,
    pub created_at: i64,
    touches: AtomicU64,
    touched_at: AtomicI64,
}

impl Entry {
    pub fn new(payload: Box<[u8]>, created_at: i64, expires_at: Option<i64>) -> Self {
        Self {
            payload,
            expires_at,
            created_at,
            touches: AtomicU64::new(0),
            touched_at: AtomicI64::new(created_at),
        }
    }

    /// Bytesize of the payload alone; the key's own bytesize is tracked by
    /// the caller (the shard knows the key it is storing under).
    pub fn payload_bytes(&self) -> usize {
        self.payload.len()
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        matches!(self.expires_at, Some(at) if at <= now_ms)
    }

    pub fn touches(&self) -> u64 {
        self.touches.load(Ordering::Relaxed)
    }

    pub fn touched_at(&self) -> i64 {
        self.touched_at.load(Ordering::Relaxed)
    }

    /// Records a successful read: bumps the touch counter and timestamp.
    /// Does not require the shard's write lock on its own, but callers hold
    /// it anyway while promoting the LRU position.
    pub fn record_touch(&self, now_ms: i64) {
        self.touches.fetch_add(1, Ordering::Relaxed);
        self.touched_at.store(now_ms, Ordering::Relaxed);
    }

    /// Original TTL duration in milliseconds, if the entry expires.
    pub fn original_ttl_ms(&self) -> Option<i64> {
        self.expires_at.map(|at| (at - self.created_at).max(0))
    }

    /// Builds an entry carrying a caller-supplied touch count, used by
    /// `update` to preserve the prior entry's popularity across a mutation.
    pub fn with_touches(
        payload: Box<[u8]>,
        created_at: i64,
        expires_at: Option<i64>,
        touches: u64,
        touched_at: i64,
    ) -> Self {
        Self {
            payload,
            expires_at,
            created_at,
            touches: AtomicU64::new(touches),
            touched_at: AtomicI64::new(touched_at),
        }
    }
}

/// Diagnostic snapshot returned by `Cache::inspect`.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryMeta {
    pub key: String,
    pub shard_index: usize,
    pub expires_at: Option<i64>,
    pub created_at: i64,
    pub size_bytes: usize,
    pub compressed: bool,
}
