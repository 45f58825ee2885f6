//! Budget enforcement: decides when the search stops and why.
//!
//! The limiter derives a set of active bounds from [`Limits`] on `reset`,
//! answers `ok(size, depth, cycles)` in the worker hot loop using atomics
//! only, and records the final [`StopReason`] as a bitmask of every budget
//! that was exhausted at the last check.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::Limits;
use crate::timer::Timer;

/// Why the search stopped, as a set of reasons. Several bits may be set when
/// multiple budgets ran out on the same check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StopReason(u32);

impl StopReason {
    /// No reason recorded (search still running, or never ran).
    pub const NONE: StopReason = StopReason(0);
    /// Explicit stop or external cancellation.
    pub const INTERRUPT: StopReason = StopReason(1);
    /// The movetime deadline passed.
    pub const MOVETIME: StopReason = StopReason(2);
    /// The tree hit its node or byte-size cap.
    pub const MEMORY: StopReason = StopReason(4);
    /// The observed depth reached the depth limit.
    pub const DEPTH: StopReason = StopReason(8);
    /// The iteration budget ran out.
    pub const CYCLES: StopReason = StopReason(16);
    /// A domain contract violation aborted the search.
    pub const CONTRACT: StopReason = StopReason(32);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn from_bits(bits: u32) -> Self {
        StopReason(bits)
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: StopReason) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for StopReason {
    type Output = StopReason;

    fn bitor(self, rhs: StopReason) -> StopReason {
        StopReason(self.0 | rhs.0)
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            return f.write_str("None");
        }

        const NAMES: [(StopReason, &str); 6] = [
            (StopReason::INTERRUPT, "Interrupt"),
            (StopReason::MOVETIME, "Movetime"),
            (StopReason::MEMORY, "Memory"),
            (StopReason::DEPTH, "Depth"),
            (StopReason::CYCLES, "Cycles"),
            (StopReason::CONTRACT, "Contract"),
        ];

        let mut first = true;
        for (flag, name) in NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Cooperative cancellation handle, the lightweight stand-in for a full
/// cancellation context. Clone it, hand one clone to the tree via
/// `set_context`, and call [`CancelToken::cancel`] from anywhere to stop an
/// in-flight search.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Derived limiter state. All hot-path reads (`ok`, `expand`, the stop flag)
/// touch atomics only; the `Limits` record and the cancellation slot sit
/// behind mutexes that are locked only outside the search loop.
#[derive(Debug)]
pub struct Limiter {
    limits: Mutex<Limits>,
    timer: Timer,
    node_size: u32,
    max_size: AtomicU32,
    node_limit: AtomicU32,
    depth_limit: AtomicU32,
    cycle_limit: AtomicU32,
    infinite: AtomicBool,
    are_set: AtomicU32,
    expand: AtomicBool,
    stop: AtomicBool,
    reason: AtomicU32,
    cancel: Mutex<Option<CancelToken>>,
}

impl Limiter {
    /// `node_size` is the in-memory size of one tree node, used to convert
    /// the byte-size budget into a node cap.
    pub fn new(node_size: u32) -> Self {
        Self {
            limits: Mutex::new(Limits::default()),
            timer: Timer::new(),
            node_size: node_size.max(1),
            max_size: AtomicU32::new(u32::MAX),
            node_limit: AtomicU32::new(u32::MAX),
            depth_limit: AtomicU32::new(u32::MAX),
            cycle_limit: AtomicU32::new(u32::MAX),
            infinite: AtomicBool::new(true),
            are_set: AtomicU32::new(0),
            expand: AtomicBool::new(true),
            stop: AtomicBool::new(false),
            reason: AtomicU32::new(0),
            cancel: Mutex::new(None),
        }
    }

    pub fn set_limits(&self, limits: Limits) {
        *self.limits.lock().unwrap() = limits;
    }

    pub fn limits(&self) -> Limits {
        *self.limits.lock().unwrap()
    }

    /// Associate a cancellation token. `stop()` polls it, and each worker
    /// polls its own clone once per iteration; cancellation latches the stop
    /// flag. The token is sampled when a search launches.
    pub fn set_context(&self, token: CancelToken) {
        *self.cancel.lock().unwrap() = Some(token);
    }

    pub(crate) fn context(&self) -> Option<CancelToken> {
        self.cancel.lock().unwrap().clone()
    }

    /// Recompute the derived bounds from the current limits. Must be called
    /// before every search.
    pub fn reset(&self) {
        let limits = self.limits();

        self.timer.set_movetime(limits.movetime);
        self.timer.reset();
        self.stop.store(false, Ordering::Release);
        self.expand.store(true, Ordering::Release);
        self.reason.store(0, Ordering::Release);

        self.max_size.store(
            if limits.byte_size >= 0 {
                (limits.byte_size / self.node_size as i64).min(u32::MAX as i64) as u32
            } else {
                u32::MAX
            },
            Ordering::Relaxed,
        );
        self.node_limit.store(limits.nodes, Ordering::Relaxed);
        self.depth_limit.store(limits.depth, Ordering::Relaxed);
        self.cycle_limit.store(limits.cycles, Ordering::Relaxed);
        self.infinite.store(limits.infinite, Ordering::Relaxed);

        // Remember which budgets are actually configured; the composite rule
        // in ok_mask needs this to tell "unbounded" apart from "not yet hit".
        let mut are_set = 0;
        if self.timer.is_set() {
            are_set |= StopReason::MOVETIME.bits();
        }
        if limits.byte_size >= 0 {
            are_set |= StopReason::MEMORY.bits();
        }
        if limits.depth != u32::MAX {
            are_set |= StopReason::DEPTH.bits();
        }
        if limits.cycles != u32::MAX {
            are_set |= StopReason::CYCLES.bits();
        }
        self.are_set.store(are_set, Ordering::Relaxed);
    }

    /// Milliseconds since the search started, at least 1.
    pub fn elapsed_ms(&self) -> u32 {
        self.timer.elapsed_ms()
    }

    pub fn set_stop(&self, stop: bool) {
        self.stop.store(stop, Ordering::Release);
    }

    /// Read the stop flag, polling the cancellation token first. A cancelled
    /// token latches the flag.
    pub fn stop(&self) -> bool {
        if let Some(token) = self.cancel.lock().unwrap().as_ref() {
            if token.is_cancelled() {
                self.stop.store(true, Ordering::Release);
            }
        }
        self.stop_flag()
    }

    pub(crate) fn stop_flag(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Whether the tree may still grow. Latched to false when the byte-size
    /// budget runs out while a time or cycle budget is still active.
    pub fn expand(&self) -> bool {
        self.expand.load(Ordering::Acquire)
    }

    /// Record why the search stopped. Called once by the main worker when
    /// the loop exits; the result is the OR of every reason that holds.
    pub fn evaluate_stop_reason(&self, size: u32, depth: u32, cycles: u32) {
        self.reason
            .fetch_or(self.ok_mask(size, depth, cycles), Ordering::AcqRel);
    }

    /// Latch the fatal contract-violation bit.
    pub(crate) fn flag_contract(&self) {
        self.reason
            .fetch_or(StopReason::CONTRACT.bits(), Ordering::AcqRel);
    }

    pub fn stop_reason(&self) -> StopReason {
        StopReason::from_bits(self.reason.load(Ordering::Acquire))
    }

    fn masks(&self, size: u32, depth: u32, cycles: u32) -> (u32, bool, bool) {
        let stopped = if self.stop_flag() {
            StopReason::INTERRUPT.bits()
        } else {
            0
        };

        if self.infinite.load(Ordering::Relaxed) {
            return (stopped, false, false);
        }

        let bytes_hit = self.max_size.load(Ordering::Relaxed) <= size;
        let nodes_hit = self.node_limit.load(Ordering::Relaxed) <= size;

        let mut mask = stopped;
        if self.timer.is_end() {
            mask |= StopReason::MOVETIME.bits();
        }
        if bytes_hit || nodes_hit {
            mask |= StopReason::MEMORY.bits();
        }
        if self.depth_limit.load(Ordering::Relaxed) <= depth {
            mask |= StopReason::DEPTH.bits();
        }
        if self.cycle_limit.load(Ordering::Relaxed) <= cycles {
            mask |= StopReason::CYCLES.bits();
        }

        (mask, bytes_hit, nodes_hit)
    }

    /// Raw bitmask of every budget exceeded right now.
    pub fn limit_mask(&self, size: u32, depth: u32, cycles: u32) -> u32 {
        self.masks(size, depth, cycles).0
    }

    /// Like `limit_mask`, with the composite policy applied: when the
    /// byte-size budget is combined with a time or cycle budget, exhausting
    /// it freezes tree growth instead of ending the search, and the memory
    /// bit is dropped from the mask so the remaining budget decides.
    pub fn ok_mask(&self, size: u32, depth: u32, cycles: u32) -> u32 {
        let (mut mask, bytes_hit, nodes_hit) = self.masks(size, depth, cycles);

        let are_set = self.are_set.load(Ordering::Relaxed);
        let memory_and_more = are_set & StopReason::MEMORY.bits() != 0
            && are_set & (StopReason::MOVETIME.bits() | StopReason::CYCLES.bits()) != 0;

        if memory_and_more && bytes_hit {
            self.expand.store(false, Ordering::Release);
            if !nodes_hit {
                mask &= !StopReason::MEMORY.bits();
            }
        }

        mask
    }

    /// Whether the search may continue.
    pub fn ok(&self, size: u32, depth: u32, cycles: u32) -> bool {
        self.ok_mask(size, depth, cycles) == 0
    }
}
