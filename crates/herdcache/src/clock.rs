//! Process-wide approximate clock.
//!
//! Expiration checks run on every cache operation, so reading the wall
//! clock each time would dominate the hot path. Instead a single shared
//! timestamp is advanced in 100 ms steps by a background thread and
//! re-synchronized against the wall clock once per second, which bounds
//! the drift while keeping `now()` a single atomic load.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Once;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Step between increments of the shared timestamp.
const TICK: Duration = Duration::from_millis(100);

/// Number of increments between wall-clock recalibrations (~1 s).
const TICKS_PER_SYNC: u32 = 10;

static CLOCK: AtomicI64 = AtomicI64::new(0);
static STARTER: Once = Once::new();

/// Current time in nanoseconds since the Unix epoch, accurate to ~100 ms.
///
/// Non-blocking; safe for any number of concurrent readers. The updater
/// thread is started on the first call and runs for the process lifetime.
pub(crate) fn now() -> i64 {
    STARTER.call_once(start_updater);
    CLOCK.load(Ordering::Relaxed)
}

fn wall_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

fn start_updater() {
    // Seed before spawning so the first reader never sees zero.
    CLOCK.store(wall_nanos(), Ordering::Relaxed);

    let spawned = thread::Builder::new()
        .name("herdcache-clock".into())
        .spawn(|| loop {
            CLOCK.store(wall_nanos(), Ordering::Relaxed);

            for _ in 0..TICKS_PER_SYNC {
                thread::sleep(TICK);
                CLOCK.fetch_add(TICK.as_nanos() as i64, Ordering::Relaxed);
            }
        });

    if spawned.is_err() {
        // Readers fall back to the seeded value; expiry still works,
        // it just stops advancing.
        tracing::warn!("failed to spawn clock updater thread");
    }
}
