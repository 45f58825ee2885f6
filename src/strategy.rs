//! Selection/backpropagation strategy contract.

use crate::node::{Move, Node};
use crate::ops::GameOps;
use crate::stats::Stats;

/// A search strategy pairs a selection policy (which child to descend into)
/// with a backpropagation rule (how to fold a rollout outcome back into the
/// path). Strategies are cloned into every worker and must not carry shared
/// mutable state.
pub trait Strategy<M: Move, S: Stats, O: GameOps<M, S>>: Clone + Send + 'static {
    /// Pick the most promising child of `parent`. Called only on expanded
    /// nodes; a terminal parent is returned unchanged.
    fn select<'t>(&self, parent: &'t Node<M, S>, root: &'t Node<M, S>) -> &'t Node<M, S>;

    /// Walk from `leaf` back to the root, releasing virtual loss, crediting
    /// the (side-alternating) outcome and undoing the domain state one move
    /// per step.
    fn backpropagate(&self, ops: &mut O, leaf: &Node<M, S>, outcome: O::Rollout);
}
