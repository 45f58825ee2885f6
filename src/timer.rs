//! Wall-clock time source with an optional movetime deadline.
//!
//! Both fields are atomics (microseconds relative to a process epoch) so the
//! search loop can poll the deadline without taking a lock.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Instant;

use once_cell::sync::Lazy;

static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

fn now_us() -> u64 {
    EPOCH.elapsed().as_micros() as u64
}

#[derive(Debug)]
pub struct Timer {
    start_us: AtomicU64,
    movetime_ms: AtomicI64,
}

impl Timer {
    pub fn new() -> Self {
        // Force the epoch so the first elapsed() call is not off by the
        // lazy-init cost.
        Lazy::force(&EPOCH);
        Self {
            start_us: AtomicU64::new(now_us()),
            movetime_ms: AtomicI64::new(-1),
        }
    }

    /// Set the deadline, in milliseconds from the last `reset`. A negative
    /// value clears the deadline.
    pub fn set_movetime(&self, movetime_ms: i64) {
        let value = if movetime_ms < 0 { -1 } else { movetime_ms };
        self.movetime_ms.store(value, Ordering::Relaxed);
    }

    /// Restart the clock.
    pub fn reset(&self) {
        self.start_us.store(now_us(), Ordering::Relaxed);
    }

    /// Whether a deadline is configured.
    pub fn is_set(&self) -> bool {
        self.movetime_ms.load(Ordering::Relaxed) != -1
    }

    /// Whether the deadline has passed.
    pub fn is_end(&self) -> bool {
        let movetime = self.movetime_ms.load(Ordering::Relaxed);
        movetime > 0 && self.raw_elapsed_ms() >= movetime as u64
    }

    /// Milliseconds since the last `reset`, never less than 1 so callers can
    /// divide by it.
    pub fn elapsed_ms(&self) -> u32 {
        self.raw_elapsed_ms().max(1).min(u32::MAX as u64) as u32
    }

    fn raw_elapsed_ms(&self) -> u64 {
        (now_us().saturating_sub(self.start_us.load(Ordering::Relaxed))) / 1000
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
