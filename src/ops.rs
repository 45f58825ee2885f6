//! The contract between the search and the host's game implementation.

use rand_chacha::ChaCha20Rng;

use crate::node::{Move, Node};
use crate::stats::Stats;

/// Scalar view of a rollout outcome, in [0, 1] from the perspective of the
/// side to move at the leaf the rollout started from: 0 is a loss, 1 a win,
/// 0.5 a draw.
pub trait RolloutValue {
    fn value(&self) -> f64;
}

impl RolloutValue for f64 {
    fn value(&self) -> f64 {
        *self
    }
}

/// Domain operations supplied by the host. One instance is cloned per
/// worker, so implementations may keep mutable position state without any
/// synchronization.
///
/// The search drives the position like a cursor: `traverse` is called for
/// every edge walked downwards during selection, and `back_traverse` undoes
/// one move at a time during backpropagation. Backpropagation walks once per
/// ancestor *including the root step*, so `back_traverse` is invoked one
/// more time than `traverse` per iteration; implementations must treat an
/// undo at the root position as a no-op.
pub trait GameOps<M: Move, S: Stats>: Send + Sized + 'static {
    /// Outcome type produced by `rollout`. Plain `f64` for UCB1-style
    /// searches; a [`crate::RaveRollout`] carrier when RAVE statistics are
    /// in play.
    type Rollout;

    /// Enumerate the legal moves of the current position and install them as
    /// children on `parent` via [`Node::install_children`], returning how
    /// many were added. Must be pure: the same position yields the same
    /// children in the same order on every call (root-parallel merging
    /// depends on it).
    fn expand_node(&mut self, parent: &Node<M, S>) -> u32;

    /// Play `mv` on the internal position.
    fn traverse(&mut self, mv: M);

    /// Undo the most recent move. A no-op at the root position.
    fn back_traverse(&mut self);

    /// Play out the current position to a terminal state and report the
    /// outcome from the perspective of the side to move when the rollout
    /// started. The position must be restored before returning.
    fn rollout(&mut self) -> Self::Rollout;

    /// Forget accumulated traversal state and re-anchor on the current
    /// position; called when the tree is reset.
    fn reset(&mut self);

    /// Deep copy with no shared mutable state; invoked once per worker.
    fn clone_ops(&self) -> Self;

    /// Receive the per-worker random number generator. Implementations with
    /// randomized rollouts should store it; the default does nothing.
    fn set_rand(&mut self, rng: ChaCha20Rng) {
        let _ = rng;
    }
}
