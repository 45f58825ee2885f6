//! Generic, embeddable Monte-Carlo Tree Search for two-player, zero-sum,
//! turn-based games.
//!
//! The host supplies the domain through [`GameOps`] (move generation,
//! make/undo, terminality, rollouts); the library supplies the search loop,
//! its concurrency, its resource governance and its introspection.
//!
//! # Overview
//!
//! Each search iteration runs four phases:
//!
//! 1. **Selection**: descend from the root with the configured strategy
//!    ([`Ucb1`] or [`Rave`]), reserving each visited node with a virtual
//!    loss so parallel workers spread out
//! 2. **Expansion**: the first worker to reach a visited leaf claims it via
//!    an atomic flag machine and asks the domain for its children
//! 3. **Rollout**: the domain plays the position out and reports an outcome
//!    in [0, 1]
//! 4. **Backpropagation**: walk back to the root, releasing virtual loss
//!    and crediting the side-alternating outcome
//!
//! Workers either share one tree and coordinate through atomics
//! (tree-parallel) or grow independent copies of the root that are merged
//! when the search completes (root-parallel); see [`MultithreadPolicy`].
//! Budgets (time, iterations, tree size, memory, depth) are enforced by a
//! limiter that records why the search stopped, and listener callbacks
//! deliver live statistics from the main worker.
//!
//! # Usage
//!
//! ```rust,ignore
//! use mcts::{Limits, Mcts, MultithreadPolicy, NodeStats, Ucb1};
//!
//! let mut tree = Mcts::new(
//!     Ucb1::default(),
//!     MyGameOps::new(position),
//!     MultithreadPolicy::TreeParallel,
//!     NodeStats::new(),
//! );
//! tree.set_limits(Limits::default().with_movetime(1000).with_threads(4));
//! tree.search_multi()?;
//! tree.synchronize();
//!
//! if let Some(best) = tree.best_move() {
//!     println!("best {best:?} score {:.2}", tree.root_score());
//! }
//! ```

pub mod config;
pub mod limiter;
pub mod listener;
pub mod node;
pub mod ops;
pub mod rave;
pub mod search;
pub mod stats;
pub mod strategy;
pub mod timer;
pub mod tree;
pub mod ucb;

// Re-export main types
pub use config::{
    set_seed_generator, BestChildPolicy, Limits, MultithreadPolicy, SeedGenerator,
    DEFAULT_EXPLORATION, DEFAULT_RAVE_EXPLORATION, VIRTUAL_LOSS,
};
pub use limiter::{CancelToken, Limiter, StopReason};
pub use listener::{ListenerStats, PvLine, StatsListener};
pub use node::{Move, Node};
pub use ops::{GameOps, RolloutValue};
pub use rave::{d_silver_beta, AmafStats, Rave, RaveRollout, RaveStats, SidedRollout};
pub use search::SearchError;
pub use stats::{NodeStats, Stats};
pub use strategy::Strategy;
pub use timer::Timer;
pub use tree::Mcts;
pub use ucb::Ucb1;

/// Test fixtures (internal use only)
#[cfg(test)]
pub(crate) mod test_support;
