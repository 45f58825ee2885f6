//! Rapid Action Value Estimation (RAVE), the all-moves-as-first heuristic.
//!
//! RAVE shares rollout credit across sibling moves: whenever a move shows up
//! anywhere in a playout, every sibling node carrying that move gets its
//! AMAF counters bumped. Use it for games with a high branching factor and
//! transposable states, where the same moves played in a different order
//! reach the same position (Go, chess, tic-tac-toe variants).

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use crate::config::{DEFAULT_RAVE_EXPLORATION, VIRTUAL_LOSS};
use crate::node::{Move, Node};
use crate::ops::{GameOps, RolloutValue};
use crate::stats::{NodeStats, Stats};
use crate::strategy::Strategy;

/// Statistics extended with AMAF counters: outcomes and playouts that
/// contained this node's move anywhere below the parent.
pub trait AmafStats: Stats {
    /// AMAF outcome sum.
    fn q_rave(&self) -> f64;

    /// Raw AMAF outcome sum, scaled by 10^3.
    fn raw_q_rave(&self) -> i32;

    /// Number of playouts containing this node's move.
    fn n_rave(&self) -> i32;

    fn add_q_rave(&self, outcome: f64);

    fn add_n_rave(&self, playouts: i32);
}

/// [`NodeStats`] plus the two AMAF counters, with the same 10^-3 scaled
/// integer encoding.
#[derive(Debug, Default)]
pub struct RaveStats {
    base: NodeStats,
    q_rave: AtomicI32,
    n_rave: AtomicI32,
}

impl RaveStats {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Stats for RaveStats {
    fn q(&self) -> f64 {
        self.base.q()
    }

    fn raw_q(&self) -> u64 {
        self.base.raw_q()
    }

    fn add_q(&self, outcome: f64) {
        self.base.add_q(outcome);
    }

    fn add_raw_q(&self, raw: u64) {
        self.base.add_raw_q(raw);
    }

    fn n(&self) -> i32 {
        self.base.n()
    }

    fn virtual_loss(&self) -> i32 {
        self.base.virtual_loss()
    }

    fn get_vvl(&self) -> (i32, i32) {
        self.base.get_vvl()
    }

    fn add_vvl(&self, visits: i32, virtual_loss: i32) {
        self.base.add_vvl(visits, virtual_loss);
    }

    fn set_vvl(&self, visits: i32, virtual_loss: i32) {
        self.base.set_vvl(visits, virtual_loss);
    }

    fn snapshot(&self) -> Self {
        Self {
            base: self.base.snapshot(),
            q_rave: AtomicI32::new(self.raw_q_rave()),
            n_rave: AtomicI32::new(self.n_rave()),
        }
    }
}

impl AmafStats for RaveStats {
    fn q_rave(&self) -> f64 {
        self.raw_q_rave() as f64 / 1e3
    }

    fn raw_q_rave(&self) -> i32 {
        self.q_rave.load(Ordering::Relaxed)
    }

    fn n_rave(&self) -> i32 {
        self.n_rave.load(Ordering::Relaxed)
    }

    fn add_q_rave(&self, outcome: f64) {
        self.q_rave.fetch_add((outcome * 1e3) as i32, Ordering::Relaxed);
    }

    fn add_n_rave(&self, playouts: i32) {
        self.n_rave.fetch_add(playouts, Ordering::Relaxed);
    }
}

/// Rollout outcome carrying the moves each side played, so backpropagation
/// can credit AMAF statistics to matching siblings.
pub trait RaveRollout<M: Move>: RolloutValue {
    /// Moves played by the side currently being credited.
    fn moves(&self) -> &[M];

    /// Record a tree move for the current side; called while ascending so
    /// ancestors observe the moves of the selected path below them.
    fn append(&mut self, mv: M);

    /// Toggle the side being credited; called once per ascent step.
    fn switch_turn(&mut self);
}

/// Ready-made [`RaveRollout`] carrier: a value and the per-side move lists.
/// Start it at the leaf (side 0 is the side to move there), `append` each
/// simulated move for the side that played it via `append`/`switch_turn`, or
/// fill the lists directly with [`SidedRollout::record`].
#[derive(Debug, Clone, Default)]
pub struct SidedRollout<M> {
    value: f64,
    sides: [Vec<M>; 2],
    turn: usize,
}

impl<M: Move> SidedRollout<M> {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            sides: [Vec::new(), Vec::new()],
            turn: 0,
        }
    }

    /// Outcome in [0, 1] from the leaf side's perspective.
    pub fn set_value(&mut self, value: f64) {
        self.value = value;
    }

    /// Record a playout move for `side` (0 = the side to move at the leaf).
    pub fn record(&mut self, side: usize, mv: M) {
        self.sides[side & 1].push(mv);
    }
}

impl<M: Move> RolloutValue for SidedRollout<M> {
    fn value(&self) -> f64 {
        self.value
    }
}

impl<M: Move> RaveRollout<M> for SidedRollout<M> {
    fn moves(&self) -> &[M] {
        &self.sides[self.turn]
    }

    fn append(&mut self, mv: M) {
        self.sides[self.turn].push(mv);
    }

    fn switch_turn(&mut self) {
        self.turn ^= 1;
    }
}

/// Beta schedule: how much weight the AMAF estimate gets, as a function of
/// the node's real visits and AMAF playouts. Should approach 1 for small `n`
/// and 0 for large `n`.
pub type RaveBetaFn = Arc<dyn Fn(i32, i32) -> f64 + Send + Sync>;

/// D. Silver's beta schedule with b = 0.1:
/// `beta(n, n_rave) = n / (n + n_rave + 4 b^2 n n_rave)`.
pub fn d_silver_beta(n: i32, n_rave: i32) -> f64 {
    const B: f64 = 0.1;
    const FACTOR: f64 = 4.0 * B * B;
    n as f64 / ((n + n_rave) as f64 + FACTOR * (n as f64) * (n_rave as f64))
}

/// RAVE strategy: UCB1-style selection with the exploitation term blended
/// between the node's own average and its AMAF average,
/// `score = (1-beta) * q/n + beta * q_rave/n_rave + c * sqrt(ln(n_parent)/n)`.
///
/// Note: root-parallel merging folds only the plain visit/outcome counters;
/// AMAF counters stay per-tree.
#[derive(Clone)]
pub struct Rave {
    exploration: f64,
    beta: RaveBetaFn,
}

impl Rave {
    pub fn new() -> Self {
        Self {
            exploration: DEFAULT_RAVE_EXPLORATION,
            beta: Arc::new(d_silver_beta),
        }
    }

    pub fn set_exploration(&mut self, exploration: f64) {
        self.exploration = exploration.max(0.0);
    }

    pub fn exploration(&self) -> f64 {
        self.exploration
    }

    /// Use D. Silver's schedule with a custom `b`.
    pub fn set_beta_param(&mut self, b: f64) {
        let factor = 4.0 * b * b;
        self.beta = Arc::new(move |n, n_rave| {
            n as f64 / ((n + n_rave) as f64 + factor * (n as f64) * (n_rave as f64))
        });
    }

    /// Replace the beta schedule entirely.
    pub fn set_beta_fn(&mut self, beta: impl Fn(i32, i32) -> f64 + Send + Sync + 'static) {
        self.beta = Arc::new(beta);
    }
}

impl Default for Rave {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Rave {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rave")
            .field("exploration", &self.exploration)
            .finish_non_exhaustive()
    }
}

impl<M, S, O> Strategy<M, S, O> for Rave
where
    M: Move,
    S: AmafStats,
    O: GameOps<M, S>,
    O::Rollout: RaveRollout<M>,
{
    fn select<'t>(&self, parent: &'t Node<M, S>, _root: &'t Node<M, S>) -> &'t Node<M, S> {
        // A terminal node has no children anyway; the rollout will exit
        // early on the terminated position.
        if parent.terminal() {
            return parent;
        }

        let children = parent.children();
        if children.is_empty() {
            return parent;
        }

        let ln_parent_visits = (parent.stats().n() as f64).ln();
        let mut best = f64::MIN;
        let mut index = 0;

        for (i, child) in children.iter().enumerate() {
            let (visits, virtual_loss) = child.stats().get_vvl();
            let real_visits = visits - virtual_loss;

            if real_visits == 0 {
                return child;
            }

            let q = child.stats().q() / visits as f64;
            let mut beta = 0.0;
            let mut amaf_q = 0.0;
            let n_rave = child.stats().n_rave();
            if n_rave > 0 {
                beta = (self.beta)(real_visits, n_rave);
                amaf_q = child.stats().q_rave() / n_rave as f64;
            }

            let score = (1.0 - beta) * q
                + beta * amaf_q
                + self.exploration * (ln_parent_visits / visits as f64).sqrt();

            if score > best {
                best = score;
                index = i;
            }
        }

        &children[index]
    }

    fn backpropagate(&self, ops: &mut O, leaf: &Node<M, S>, mut outcome: O::Rollout) {
        let mut result = outcome.value();
        let mut node = Some(leaf);

        while let Some(current) = node {
            result = 1.0 - result;
            current.stats().add_q(result);

            if let Some(parent) = current.parent() {
                current.stats().add_vvl(1 - VIRTUAL_LOSS, -VIRTUAL_LOSS);

                // Credit every sibling whose move the current side played
                // anywhere in this playout.
                let moves = outcome.moves();
                for sibling in parent.children() {
                    if moves.contains(&sibling.mv()) {
                        sibling.stats().add_q_rave(result);
                        sibling.stats().add_n_rave(1);
                    }
                }

                // The path move itself becomes visible to the grandparent's
                // siblings on the next step.
                outcome.append(current.mv());
            } else {
                current.stats().add_vvl(1, 0);
            }

            outcome.switch_turn();
            node = current.parent();
            ops.back_traverse();
        }
    }
}
