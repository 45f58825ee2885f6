//! Per-node search statistics, updated with atomics only.
//!
//! Outcomes are accumulated as an integer sum scaled by 10^3, which keeps
//! additions wait-free at the cost of 10^-3 precision. With outcomes in
//! [0, 1] the 64-bit sum holds ~1.8e16 iterations before overflow.

use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};

/// Capability set every node-statistics type must provide. The search only
/// ever holds shared references to stats, so all mutators take `&self` and
/// must be safe under concurrent use.
pub trait Stats: Default + Send + Sync + 'static {
    /// Cumulated outcomes for this node.
    fn q(&self) -> f64;

    /// Raw cumulated outcome sum, scaled by 10^3.
    fn raw_q(&self) -> u64;

    /// Average outcome. Not a number until the node has been visited.
    fn avg_q(&self) -> f64 {
        self.q() / self.n() as f64
    }

    /// Fold one outcome in [0, 1] into the sum.
    fn add_q(&self, outcome: f64);

    /// Fold an already-scaled outcome sum into this one (used when merging
    /// trees, to avoid round-tripping through floats).
    fn add_raw_q(&self, raw: u64);

    /// Visit count, including visits currently reserved by virtual loss.
    fn n(&self) -> i32;

    /// Current virtual loss.
    fn virtual_loss(&self) -> i32;

    /// Read visits and virtual loss together, retrying until the pair is
    /// consistent (`vl <= n`).
    fn get_vvl(&self) -> (i32, i32);

    /// Add to the visit and virtual-loss counters. Selection applies
    /// `(+VL, +VL)`; backpropagation releases with `(1-VL, -VL)`.
    fn add_vvl(&self, visits: i32, virtual_loss: i32);

    /// Overwrite both counters. Panics if that would leave `vl > n`.
    fn set_vvl(&self, visits: i32, virtual_loss: i32);

    /// Visits minus virtual loss.
    fn real_visits(&self) -> i32 {
        let (visits, virtual_loss) = self.get_vvl();
        visits - virtual_loss
    }

    /// Copy the current values into a fresh, detached instance.
    fn snapshot(&self) -> Self;
}

/// Default statistics: outcome sum, visits and virtual loss.
#[derive(Debug, Default)]
pub struct NodeStats {
    q: AtomicU64,
    n: AtomicI32,
    virtual_loss: AtomicI32,
}

impl NodeStats {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Stats for NodeStats {
    fn q(&self) -> f64 {
        self.raw_q() as f64 / 1e3
    }

    fn raw_q(&self) -> u64 {
        self.q.load(Ordering::Relaxed)
    }

    fn add_q(&self, outcome: f64) {
        self.q.fetch_add((outcome * 1e3) as u64, Ordering::Relaxed);
    }

    fn add_raw_q(&self, raw: u64) {
        self.q.fetch_add(raw, Ordering::Relaxed);
    }

    fn n(&self) -> i32 {
        self.n.load(Ordering::Relaxed)
    }

    fn virtual_loss(&self) -> i32 {
        self.virtual_loss.load(Ordering::Relaxed)
    }

    fn get_vvl(&self) -> (i32, i32) {
        // The two counters are updated one after the other, so a reader can
        // observe vl > n in between; retry until the pair is consistent.
        loop {
            let visits = self.n.load(Ordering::Relaxed);
            let virtual_loss = self.virtual_loss.load(Ordering::Relaxed);
            if virtual_loss <= visits {
                return (visits, virtual_loss);
            }
            std::hint::spin_loop();
        }
    }

    fn add_vvl(&self, visits: i32, virtual_loss: i32) {
        self.virtual_loss.fetch_add(virtual_loss, Ordering::Relaxed);
        self.n.fetch_add(visits, Ordering::Relaxed);
    }

    fn set_vvl(&self, visits: i32, virtual_loss: i32) {
        self.virtual_loss.store(virtual_loss, Ordering::Relaxed);
        self.n.store(visits, Ordering::Relaxed);

        assert!(
            virtual_loss <= visits,
            "virtual loss ({virtual_loss}) cannot be greater than visits ({visits})"
        );
    }

    fn snapshot(&self) -> Self {
        Self {
            q: AtomicU64::new(self.raw_q()),
            n: AtomicI32::new(self.n()),
            virtual_loss: AtomicI32::new(self.virtual_loss()),
        }
    }
}
