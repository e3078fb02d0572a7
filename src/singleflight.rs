//! Single-flight coordinator (C7): de-duplicates concurrent misses on the
//! same effective key.
//!
//! The registry maps an effective key to a `watch` channel; the first
//! caller for a key becomes its leader and runs the caller-supplied block,
//! every other concurrent caller becomes a follower and waits for the
//! leader's completion signal, then reads the value back from the cache
//! itself (§4.7: "other concurrent callers ... observe the value the
//! winner produced by reading the cache after the winner writes"). The
//! registry mutex is held only for the map lookup/removal, never across
//! the block's execution (§5).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

/// Which role a caller was assigned when joining a key's single-flight
/// group.
pub enum Role {
    /// This caller must run the block and call `finish` when done.
    Leader,
    /// This caller must wait on the receiver, then re-read the cache.
    Follower(watch::Receiver<bool>),
}

/// Registry of in-flight single-flight groups, one dedicated mutex for the
/// whole registry (§5).
#[derive(Default)]
pub struct SingleFlight {
    registry: Mutex<HashMap<Arc<str>, watch::Sender<bool>>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Joins (or starts) the single-flight group for `key`.
    pub fn join(&self, key: &str) -> Role {
        let mut registry = self.registry.lock();
        if let Some(tx) = registry.get(key) {
            Role::Follower(tx.subscribe())
        } else {
            let (tx, _rx) = watch::channel(false);
            registry.insert(Arc::from(key), tx);
            Role::Leader
        }
    }

    /// Signals completion and removes the group so the registry does not
    /// grow without bound. Only the leader calls this.
    pub fn finish(&self, key: &str) {
        let mut registry = self.registry.lock();
        if let Some(tx) = registry.remove(key) {
            let _ = tx.send(true);
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.registry.lock().len()
    }
}

/// Waits until the leader signals completion.
pub async fn wait_for_leader(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
