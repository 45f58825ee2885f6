//! Search limits, library-wide policies and tunable defaults.

use std::fmt;
use std::sync::RwLock;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Virtual-loss increment applied to a node while a worker has it reserved
/// during selection, and released again during backpropagation.
pub const VIRTUAL_LOSS: i32 = 2;

/// Default exploration constant for the UCB1 formula. The theoretical value
/// is sqrt(2), but it has to be tuned per problem.
pub const DEFAULT_EXPLORATION: f64 = 0.75;

/// Default exploration constant for RAVE selection. Lower than UCB1's,
/// because the AMAF term already biases towards promising moves.
pub const DEFAULT_RAVE_EXPLORATION: f64 = 0.3;

/// How the search distributes work across worker threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MultithreadPolicy {
    /// All workers grow the same tree, coordinating through atomic node
    /// statistics and the expansion flag machine. Best approach for most
    /// cases.
    #[default]
    TreeParallel,

    /// Every worker past the first grows its own deep copy of the root;
    /// the copies are merged into the main tree when the search ends.
    /// Listener callbacks observe only the main tree until the merge
    /// completes.
    RootParallel,
}

/// Policy used to pick the best child when extracting moves and variations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BestChildPolicy {
    /// Pick the child with the most (real) visits. The go-to method.
    #[default]
    MostVisits,

    /// Pick the child with the best average outcome, among children with
    /// enough visits to be trusted.
    WinRate,
}

/// Composite search budget. All numeric limits are ignored while `infinite`
/// is set; the `with_*` setters for numeric budgets clear it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    /// Stop once the observed maximum depth reaches this value.
    pub depth: u32,
    /// Stop once the tree holds this many nodes.
    pub nodes: u32,
    /// Stop after this many search iterations.
    pub cycles: u32,
    /// Stop after this many milliseconds; negative disables the deadline.
    pub movetime: i64,
    /// Freeze tree growth once the tree occupies this many bytes; negative
    /// disables the bound. See `Limiter` for how this composes with the
    /// time and cycle budgets.
    pub byte_size: i64,
    /// Number of worker threads (at least 1).
    pub n_threads: usize,
    /// Number of principal variations returned by `multi_pv`.
    pub multi_pv: usize,
    /// Ignore every numeric limit; only an explicit stop or cancellation
    /// ends the search.
    pub infinite: bool,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            depth: u32::MAX,
            nodes: u32::MAX,
            cycles: u32::MAX,
            movetime: -1,
            byte_size: -1,
            n_threads: 1,
            multi_pv: 1,
            infinite: true,
        }
    }
}

impl Limits {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum depth of the search.
    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self.infinite = false;
        self
    }

    /// Maximum number of nodes the tree may hold.
    pub fn with_nodes(mut self, nodes: u32) -> Self {
        self.nodes = nodes;
        self.infinite = false;
        self
    }

    /// Number of backpropagation cycles to run.
    pub fn with_cycles(mut self, cycles: u32) -> Self {
        self.cycles = cycles;
        self.infinite = false;
        self
    }

    /// Maximum thinking time in milliseconds.
    pub fn with_movetime(mut self, movetime: i64) -> Self {
        self.movetime = movetime;
        self.infinite = false;
        self
    }

    /// Maximum tree footprint in bytes.
    pub fn with_byte_size(mut self, byte_size: i64) -> Self {
        self.byte_size = byte_size;
        self.infinite = false;
        self
    }

    /// Maximum tree footprint in mebibytes.
    pub fn with_mb_size(mut self, mb_size: i64) -> Self {
        self.with_byte_size(mb_size * (1 << 20))
    }

    /// Number of worker threads, clamped to at least 1.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.n_threads = threads.max(1);
        self
    }

    /// Number of PV lines returned by `multi_pv`, clamped to at least 1.
    pub fn with_multi_pv(mut self, multi_pv: usize) -> Self {
        self.multi_pv = multi_pv.max(1);
        self
    }

    pub fn with_infinite(mut self, infinite: bool) -> Self {
        self.infinite = infinite;
        self
    }
}

impl fmt::Display for Limits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

/// Source of seeds for the per-worker random number generators.
pub type SeedGenerator = fn() -> u64;

fn clock_seed() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

static SEED_GENERATOR: Lazy<RwLock<SeedGenerator>> = Lazy::new(|| RwLock::new(clock_seed));

/// Replace the process-wide seed generator. By default seeds come from the
/// nanosecond clock; tests install a constant generator to make searches
/// reproducible.
pub fn set_seed_generator(f: SeedGenerator) {
    *SEED_GENERATOR.write().unwrap() = f;
}

/// Draw one seed from the process-wide generator. Worker `i` derives its RNG
/// from `next_seed() ^ i`.
pub(crate) fn next_seed() -> u64 {
    (SEED_GENERATOR.read().unwrap())()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_limits_are_infinite() {
        let limits = Limits::default();
        assert!(limits.infinite);
        assert_eq!(limits.depth, u32::MAX);
        assert_eq!(limits.movetime, -1);
        assert_eq!(limits.byte_size, -1);
        assert_eq!(limits.n_threads, 1);
        assert_eq!(limits.multi_pv, 1);
    }

    #[test]
    fn numeric_setters_clear_infinite() {
        assert!(!Limits::default().with_cycles(100).infinite);
        assert!(!Limits::default().with_depth(5).infinite);
        assert!(!Limits::default().with_movetime(250).infinite);
        assert!(!Limits::default().with_byte_size(1 << 20).infinite);
        // Thread and pv counts are not budgets
        assert!(Limits::default().with_threads(4).with_multi_pv(3).infinite);
    }

    #[test]
    fn thread_and_pv_counts_are_clamped() {
        let limits = Limits::default().with_threads(0).with_multi_pv(0);
        assert_eq!(limits.n_threads, 1);
        assert_eq!(limits.multi_pv, 1);
    }

    #[test]
    fn mb_size_converts_to_bytes() {
        assert_eq!(Limits::default().with_mb_size(2).byte_size, 2 << 20);
    }

    #[test]
    fn limits_render_as_json() {
        let rendered = Limits::default().with_cycles(10).to_string();
        assert!(rendered.contains("\"cycles\":10"), "{rendered}");
    }
}
