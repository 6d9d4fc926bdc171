//! Cached wall-clock to avoid syscalls on hot scheduling paths.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;

static NOW_UNIX_MS: AtomicI64 = AtomicI64::new(0);

fn wall_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as i64
}

/// Starts the time caching ticker.
/// Updates the cached time value at the specified resolution.
/// Returns a token that can be cancelled to stop the ticker.
pub fn start(resolution: Duration) -> CancellationToken {
    NOW_UNIX_MS.store(wall_millis(), Ordering::Relaxed);

    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::task::spawn(async move {
        let mut interval = tokio::time::interval(resolution);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    NOW_UNIX_MS.store(wall_millis(), Ordering::Relaxed);
                }
                _ = token_clone.cancelled() => {
                    break;
                }
            }
        }
    });

    token
}

/// Returns the cached current time as Unix seconds.
/// Falls back to a direct clock read when the ticker has not started
/// (unit tests run without the app bootstrap).
pub fn unix() -> i64 {
    let ms = NOW_UNIX_MS.load(Ordering::Relaxed);
    if ms == 0 {
        return wall_millis() / 1000;
    }
    ms / 1000
}

/// Returns the cached current time as Unix milliseconds.
pub fn unix_millis() -> i64 {
    let ms = NOW_UNIX_MS.load(Ordering::Relaxed);
    if ms == 0 {
        return wall_millis();
    }
    ms
}

/// Returns the cached current time.
pub fn now() -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(unix_millis() as u64)
}

/// Returns the seconds elapsed since the given Unix timestamp.
/// A zero timestamp reads as "never", which maps to the maximum age.
pub fn age_seconds(since_unix: i64) -> i64 {
    if since_unix <= 0 {
        return i64::MAX;
    }
    (unix() - since_unix).max(0)
}
