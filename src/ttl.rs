//! TTL clamping/defaulting and the background sweep task (C6).

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::clock;
use crate::storage::Map;

/// Resolves the TTL to apply at write time, per §4.6:
/// 1. `requested` falls back to `default_ttl` when absent.
/// 2. The chosen TTL (if any) is clamped to `max_ttl`.
/// 3. `None` means "never expires".
pub fn effective_ttl(
    requested: Option<Duration>,
    default_ttl: Option<Duration>,
    max_ttl: Option<Duration>,
) -> Option<Duration> {
    let chosen = requested.or(default_ttl);
    match (chosen, max_ttl) {
        (Some(ttl), Some(max)) => Some(ttl.min(max)),
        (chosen, _) => chosen,
    }
}

pub fn expires_at(now_ms: i64, ttl: Option<Duration>) -> Option<i64> {
    ttl.map(|d| now_ms + d.as_millis() as i64)
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepState {
    Stopped = 0,
    Running = 1,
    Stopping = 2,
}

/// Background task that periodically sweeps every shard for expired
/// entries. Implements the {Stopped → Running → Stopping → Stopped} state
/// machine of §4.11: starting while already running is a no-op; stopping
/// sets a flag and the task observes it only at the sleep boundary, never
/// mid-pass (§5 "Cancellation and timeouts").
pub struct Sweeper {
    state: AtomicU8,
    token: parking_lot::Mutex<Option<CancellationToken>>,
}

impl Sweeper {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(SweepState::Stopped as u8),
            token: parking_lot::Mutex::new(None),
        }
    }

    pub fn state(&self) -> SweepState {
        match self.state.load(Ordering::Acquire) {
            1 => SweepState::Running,
            2 => SweepState::Stopping,
            _ => SweepState::Stopped,
        }
    }

    /// Starts the sweep loop. No-op if already running.
    pub fn start(self: &Arc<Self>, map: Arc<Map>, interval: Duration) {
        if self
            .state
            .compare_exchange(
                SweepState::Stopped as u8,
                SweepState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return;
        }

        let token = CancellationToken::new();
        *self.token.lock() = Some(token.clone());
        let this = Arc::clone(self);

        tokio::task::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if this.state.load(Ordering::Acquire) == SweepState::Stopping as u8 {
                            break;
                        }
                        this.sweep_pass(&map);
                    }
                    _ = token.cancelled() => break,
                }
            }

            this.state.store(SweepState::Stopped as u8, Ordering::Release);
            info!(component = "ttl-sweeper", event = "stopped", "sweep thread stopped");
        });

        info!(component = "ttl-sweeper", event = "started", interval_ms = interval.as_millis() as u64, "sweep thread started");
    }

    fn sweep_pass(&self, map: &Map) {
        let now_ms = clock::now_millis();
        for shard in map.shards() {
            let freed = shard.sweep_expired(now_ms);
            if freed > 0 {
                map.sub_bytes(freed);
            }
        }
    }

    /// Sets the stopping flag and cancels the sleep, joining the loop.
    pub fn stop(&self) {
        if self
            .state
            .compare_exchange(
                SweepState::Running as u8,
                SweepState::Stopping as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            warn!(component = "ttl-sweeper", event = "stop_noop", "sweep thread was not running");
            return;
        }
        if let Some(token) = self.token.lock().take() {
            token.cancel();
        }
    }
}

impl Default for Sweeper {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uses_default_when_requested_absent() {
        let d = Duration::from_secs(60);
        assert_eq!(effective_ttl(None, Some(d), None), Some(d));
    }

    #[test]
    fn clamps_to_max() {
        let requested = Duration::from_secs(300);
        let max = Duration::from_secs(60);
        assert_eq!(effective_ttl(Some(requested), None, Some(max)), Some(max));
    }

    #[test]
    fn none_means_no_expiry() {
        assert_eq!(effective_ttl(None, None, Some(Duration::from_secs(60))), None);
    }

    #[test]
    fn expires_at_adds_millis() {
        assert_eq!(expires_at(1000, Some(Duration::from_secs(1))), Some(2000));
        assert_eq!(expires_at(1000, None), None);
    }

    #[tokio::test]
    async fn start_is_idempotent_and_stop_transitions_back() {
        let sweeper = Arc::new(Sweeper::new());
        let map = Arc::new(Map::new(1));
        sweeper.start(Arc::clone(&map), Duration::from_millis(5));
        assert_eq!(sweeper.state(), SweepState::Running);
        sweeper.start(Arc::clone(&map), Duration::from_millis(5));
        assert_eq!(sweeper.state(), SweepState::Running);
        sweeper.stop();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sweeper.state(), SweepState::Stopped);
    }
}
