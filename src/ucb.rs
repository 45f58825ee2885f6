//! UCB1 selection with the default zero-sum backpropagation.

use crate::config::{DEFAULT_EXPLORATION, VIRTUAL_LOSS};
use crate::node::{Move, Node};
use crate::ops::{GameOps, RolloutValue};
use crate::stats::Stats;
use crate::strategy::Strategy;

/// Upper Confidence Bound (variant 1) strategy:
/// `ucb = q/n + c * sqrt(ln(n_parent) / n_child)`.
#[derive(Debug, Clone, Copy)]
pub struct Ucb1 {
    exploration: f64,
}

impl Ucb1 {
    pub fn new(exploration: f64) -> Self {
        Self {
            exploration: exploration.max(0.0),
        }
    }

    /// Exploration constant `c`; higher values explore more, lower values
    /// exploit more. Clamped to be non-negative.
    pub fn set_exploration(&mut self, exploration: f64) {
        self.exploration = exploration.max(0.0);
    }

    pub fn exploration(&self) -> f64 {
        self.exploration
    }
}

impl Default for Ucb1 {
    fn default() -> Self {
        Self::new(DEFAULT_EXPLORATION)
    }
}

impl<M, S, O> Strategy<M, S, O> for Ucb1
where
    M: Move,
    S: Stats,
    O: GameOps<M, S>,
    O::Rollout: RolloutValue,
{
    fn select<'t>(&self, parent: &'t Node<M, S>, _root: &'t Node<M, S>) -> &'t Node<M, S> {
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

            // An unvisited child always wins; ties break to the first one.
            if visits - virtual_loss == 0 {
                return child;
            }

            let exploitation = child.stats().q() / visits as f64;
            let exploration = self.exploration * (ln_parent_visits / visits as f64).sqrt();

            let ucb = exploitation + exploration;
            if ucb > best {
                best = ucb;
                index = i;
            }
        }

        &children[index]
    }

    // The game is assumed to be two-player and zero-sum: an outcome `v` for
    // the side that just moved is `1 - v` for the opponent, so the value is
    // flipped before it is credited to each ancestor.
    fn backpropagate(&self, ops: &mut O, leaf: &Node<M, S>, outcome: O::Rollout) {
        let mut result = outcome.value();
        let mut node = Some(leaf);

        while let Some(current) = node {
            // Release the virtual loss reserved during selection; the root
            // never had one applied.
            if current.parent().is_some() {
                current.stats().add_vvl(1 - VIRTUAL_LOSS, -VIRTUAL_LOSS);
            } else {
                current.stats().add_vvl(1, 0);
            }

            result = 1.0 - result;
            current.stats().add_q(result);

            node = current.parent();
            ops.back_traverse();
        }
    }
}
