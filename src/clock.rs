//! Cached time to avoid syscalls on hot read paths.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;

static NOW_UNIX_MS: AtomicI64 = AtomicI64::new(0);

fn read_wall_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Starts the time-caching ticker at the given resolution.
/// Returns a token; cancelling it stops the background ticker.
pub fn start(resolution: Duration) -> CancellationToken {
    NOW_UNIX_MS.store(read_wall_ms(), Ordering::Relaxed);

    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::task::spawn(async move {
        let mut interval = tokio::time::interval(resolution);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    NOW_UNIX_MS.store(read_wall_ms(), Ordering::Relaxed);
                }
                _ = token_clone.cancelled() => break,
            }
        }
    });

    token
}

/// Returns the cached current time in Unix milliseconds.
pub fn now_millis() -> i64 {
    let cached = NOW_UNIX_MS.load(Ordering::Relaxed);
    if cached == 0 {
        // Ticker not started yet (e.g. in unit tests) — fall back to a direct read.
        return read_wall_ms();
    }
    cached
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_before_start() {
        assert!(now_millis() > 0);
    }

    #[tokio::test]
    async fn ticks_forward() {
        let token = start(Duration::from_millis(5));
        let first = now_millis();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let second = now_millis();
        token.cancel();
        assert!(second >= first);
    }
}
