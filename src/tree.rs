//! The tree facade: ownership, bookkeeping, move extraction.

use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::config::{next_seed, BestChildPolicy, Limits, MultithreadPolicy};
use crate::limiter::{CancelToken, Limiter, StopReason};
use crate::listener::{ListenerStats, PvLine, StatsListener};
use crate::node::{Move, Node};
use crate::ops::GameOps;
use crate::stats::Stats;
use crate::strategy::Strategy;

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

/// Shared search counters, updated by all workers with atomics.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub cycles: AtomicU32,
    pub cps: AtomicU32,
    pub maxdepth: AtomicU32,
    pub collisions: AtomicI32,
    pub merged: AtomicBool,
    pub size: AtomicU32,
    pub expand_failures: AtomicU32,
    /// Workers still running; worker 0 waits on this before merging.
    pub active: AtomicUsize,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }
}

/// The Monte-Carlo search tree.
///
/// Owns the root node, the limiter, the counters, the strategy and a handle
/// to the domain operations. `M` is the host's move token, `S` the node
/// statistics ([`crate::NodeStats`] or [`crate::RaveStats`]), `O` the domain
/// operations and `A` the selection/backpropagation strategy.
pub struct Mcts<M: Move, S: Stats, O: GameOps<M, S>, A: Strategy<M, S, O>> {
    pub(crate) root: Box<Node<M, S>>,
    pub(crate) limiter: Arc<Limiter>,
    pub(crate) counters: Arc<Counters>,
    pub(crate) listener: Arc<StatsListener<M>>,
    pub(crate) strategy: A,
    pub(crate) ops: O,
    pub(crate) policy: MultithreadPolicy,
    pub(crate) handles: Vec<JoinHandle<()>>,
    /// Deep-cloned roots owned by root-parallel workers, drained by the
    /// merge when the search completes.
    pub(crate) worker_roots: Arc<Mutex<Vec<Box<Node<M, S>>>>>,
}

impl<M: Move, S: Stats, O: GameOps<M, S>, A: Strategy<M, S, O>> Mcts<M, S, O, A> {
    /// Create a tree over the domain's current position and expand the root.
    pub fn new(strategy: A, mut ops: O, policy: MultithreadPolicy, default_stats: S) -> Self {
        ops.set_rand(ChaCha20Rng::seed_from_u64(next_seed()));

        let root = Box::new(Node::new_root(false, default_stats));
        let counters = Counters::new();
        let mut size = 1u32;
        if root.try_claim_expansion() {
            let added = ops.expand_node(&root);
            if added > 0 {
                root.finish_expansion();
                size += added;
            } else {
                root.revert_expansion();
            }
        }
        counters.size.store(size, Ordering::Relaxed);

        let limiter = Limiter::new(mem::size_of::<Node<M, S>>() as u32);
        // Not searching yet
        limiter.set_stop(true);

        Self {
            root,
            limiter: Arc::new(limiter),
            counters: Arc::new(counters),
            listener: Arc::new(StatsListener::new()),
            strategy,
            ops,
            policy,
            handles: Vec::new(),
            worker_roots: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn root(&self) -> &Node<M, S> {
        &self.root
    }

    pub fn ops(&self) -> &O {
        &self.ops
    }

    pub fn strategy(&self) -> &A {
        &self.strategy
    }

    pub fn strategy_mut(&mut self) -> &mut A {
        &mut self.strategy
    }

    pub fn multithread_policy(&self) -> MultithreadPolicy {
        self.policy
    }

    pub fn set_multithread_policy(&mut self, policy: MultithreadPolicy) {
        self.policy = policy;
    }

    pub fn set_limits(&self, limits: Limits) {
        self.limiter.set_limits(limits);
    }

    pub fn limits(&self) -> Limits {
        self.limiter.limits()
    }

    /// Attach a cancellation token; cancelling it stops an in-flight search.
    /// The token is sampled when a search launches.
    pub fn set_context(&self, token: CancelToken) {
        self.limiter.set_context(token);
    }

    pub fn is_searching(&self) -> bool {
        !self.limiter.stop()
    }

    /// Ask a running search to stop. Workers observe the flag at their next
    /// loop check; call [`Mcts::synchronize`] to wait for them.
    pub fn stop(&self) {
        self.limiter.set_stop(true);
    }

    /// Tree size as tracked by the expansion counter.
    pub fn size(&self) -> u32 {
        self.counters.size.load(Ordering::Relaxed)
    }

    /// Tree size obtained by actually counting nodes.
    pub fn count(&self) -> usize {
        self.root.count_nodes()
    }

    /// Approximate memory footprint of the tree structure, in bytes.
    pub fn memory_usage(&self) -> usize {
        self.size() as usize * mem::size_of::<Node<M, S>>() + mem::size_of::<Self>()
    }

    /// Iterations completed so far.
    pub fn cycles(&self) -> u32 {
        self.counters.cycles.load(Ordering::Relaxed)
    }

    /// Cycles-per-second gauge; best effort, not exactly monotonic.
    pub fn cps(&self) -> u32 {
        self.counters.cps.load(Ordering::Relaxed)
    }

    /// Maximum depth observed during the search. Usually differs from the
    /// PV length.
    pub fn max_depth(&self) -> u32 {
        self.counters.maxdepth.load(Ordering::Relaxed)
    }

    /// How many times a worker picked a node that another worker was busy
    /// expanding and had to wait.
    pub fn collision_count(&self) -> i32 {
        self.counters.collisions.load(Ordering::Relaxed)
    }

    /// Collisions per iteration.
    pub fn collision_factor(&self) -> f64 {
        self.collision_count() as f64 / self.cycles() as f64
    }

    /// Whether a root-parallel merge has completed for the last search.
    pub fn merged(&self) -> bool {
        self.counters.merged.load(Ordering::Acquire)
    }

    /// Why the last search stopped. Valid after `synchronize`.
    pub fn stop_reason(&self) -> StopReason {
        self.limiter.stop_reason()
    }

    pub fn listener(&self) -> &StatsListener<M> {
        &self.listener
    }

    /// Replace the whole listener.
    pub fn set_listener(&mut self, listener: StatsListener<M>) {
        self.listener = Arc::new(listener);
    }

    /// Drop all listener callbacks.
    pub fn reset_listener(&mut self) {
        Arc::make_mut(&mut self.listener).clear();
    }

    /// Called whenever the observed maximum depth increases (main worker
    /// only).
    pub fn on_depth(&mut self, f: impl Fn(&ListenerStats<M>) + Send + Sync + 'static) {
        Arc::make_mut(&mut self.listener).on_depth(f);
    }

    /// Called every `cycle_interval` iterations (main worker only). Each
    /// call re-extracts the principal variations; keep the interval coarse.
    pub fn on_cycle(&mut self, f: impl Fn(&ListenerStats<M>) + Send + Sync + 'static) {
        Arc::make_mut(&mut self.listener).on_cycle(f);
    }

    /// Called exactly once when the search stops.
    pub fn on_stop(&mut self, f: impl Fn(&ListenerStats<M>) + Send + Sync + 'static) {
        Arc::make_mut(&mut self.listener).on_stop(f);
    }

    pub fn set_cycle_interval(&mut self, interval: u32) {
        Arc::make_mut(&mut self.listener).set_cycle_interval(interval);
    }

    /// The best move in the position, by visit count.
    pub fn best_move(&self) -> Option<M> {
        self.best_child(&self.root, BestChildPolicy::MostVisits)
            .map(Node::mv)
    }

    /// Current evaluation of the position: the best child's average outcome.
    /// Not a number before any search ran.
    pub fn root_score(&self) -> f64 {
        match self.best_child(&self.root, BestChildPolicy::MostVisits) {
            Some(child) => child.stats().q() / child.stats().n() as f64,
            None => f64::NAN,
        }
    }

    /// Best child of `node` under the given policy.
    pub fn best_child<'t>(
        &self,
        node: &'t Node<M, S>,
        policy: BestChildPolicy,
    ) -> Option<&'t Node<M, S>> {
        best_child_in(node, policy)
    }

    /// The principal variation starting at `from`, as nodes. The second
    /// value is true when the line ends in a terminal node.
    pub fn pv_nodes<'t>(
        &self,
        from: &'t Node<M, S>,
        policy: BestChildPolicy,
        include_root: bool,
    ) -> (Vec<&'t Node<M, S>>, bool) {
        pv_nodes_in(from, policy, include_root, self.max_depth())
    }

    /// The principal variation starting at `from`, as moves. Returns
    /// `(moves, mate, draw)`.
    pub fn pv(
        &self,
        from: &Node<M, S>,
        policy: BestChildPolicy,
        include_root: bool,
    ) -> (Vec<M>, bool, bool) {
        pv_in(from, policy, include_root, self.max_depth())
    }

    /// Up to `Limits.multi_pv` best lines, ranked by root-child visits.
    pub fn multi_pv(&self, policy: BestChildPolicy) -> Vec<PvLine<M>> {
        multi_pv_in(
            &self.root,
            self.limits().multi_pv,
            policy,
            self.max_depth(),
        )
    }

    /// Promote the child reached by `mv` to be the new root, dropping its
    /// former siblings, and play the move on the domain state. Returns false
    /// (and changes nothing) when no child carries `mv`. Stops and joins a
    /// running search first.
    pub fn make_move(&mut self, mv: M) -> bool {
        if self.is_searching() {
            self.stop();
        }
        self.synchronize();

        let index = match self.root.children().iter().position(|c| c.mv() == mv) {
            Some(index) => index,
            None => return false,
        };

        let mut children = self.root.take_children();
        let new_root = children.swap_remove(index);
        let mut new_root = Box::new(new_root);
        // Sever the upward link before the old root (and the remaining
        // siblings it owns) is dropped, and fix the children whose parent
        // pointers still refer to the node's previous location.
        new_root.set_parent(ptr::null());
        new_root.reparent_children();
        self.root = new_root;
        drop(children);

        self.counters
            .size
            .store(self.root.count_nodes() as u32, Ordering::Relaxed);
        let depth = self.counters.maxdepth.load(Ordering::Relaxed);
        self.counters
            .maxdepth
            .store(depth.saturating_sub(1), Ordering::Relaxed);

        self.ops.traverse(mv);
        true
    }

    /// Discard the tree, re-anchor the domain state and start over with a
    /// fresh root. Stops and joins a running search first.
    pub fn reset(&mut self, is_terminated: bool, default_stats: S) {
        if self.is_searching() {
            self.stop();
        }
        self.synchronize();

        self.ops.reset();
        self.root = Box::new(Node::new_root(is_terminated, default_stats));

        self.counters.cycles.store(0, Ordering::Relaxed);
        self.counters.cps.store(0, Ordering::Relaxed);
        self.counters.maxdepth.store(0, Ordering::Relaxed);
        self.counters.collisions.store(0, Ordering::Relaxed);
        self.counters.merged.store(false, Ordering::Relaxed);

        let mut size = 1u32;
        if !is_terminated && self.root.try_claim_expansion() {
            let added = self.ops.expand_node(&self.root);
            if added > 0 {
                self.root.finish_expansion();
                size += added;
            } else {
                self.root.revert_expansion();
            }
        }
        self.counters.size.store(size, Ordering::Relaxed);
    }
}

impl<M: Move, S: Stats, O: GameOps<M, S>, A: Strategy<M, S, O>> Drop for Mcts<M, S, O, A> {
    /// Workers borrow the boxed roots, so they must be stopped and joined
    /// before the tree goes away. Panics are swallowed here; `synchronize`
    /// is the place to observe them.
    fn drop(&mut self) {
        self.limiter.set_stop(true);
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl<M: Move, S: Stats, O: GameOps<M, S>, A: Strategy<M, S, O>> Clone for Mcts<M, S, O, A> {
    /// Deep copy: the tree (atomic stat snapshots included), the domain
    /// handle and the counters. The clone gets its own limiter (with the
    /// same limits) and an empty listener.
    fn clone(&self) -> Self {
        let limiter = Limiter::new(mem::size_of::<Node<M, S>>() as u32);
        limiter.set_limits(self.limits());
        limiter.set_stop(true);

        let counters = Counters::new();
        counters
            .cycles
            .store(self.cycles(), Ordering::Relaxed);
        counters.cps.store(self.cps(), Ordering::Relaxed);
        counters
            .maxdepth
            .store(self.max_depth(), Ordering::Relaxed);
        counters
            .collisions
            .store(self.collision_count(), Ordering::Relaxed);
        counters.merged.store(self.merged(), Ordering::Relaxed);
        counters.size.store(self.size(), Ordering::Relaxed);

        Self {
            root: self.root.deep_clone(),
            limiter: Arc::new(limiter),
            counters: Arc::new(counters),
            listener: Arc::new(StatsListener::new()),
            strategy: self.strategy.clone(),
            ops: self.ops.clone_ops(),
            policy: self.policy,
            handles: Vec::new(),
            worker_roots: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<M: Move, S: Stats, O: GameOps<M, S>, A: Strategy<M, S, O>> std::fmt::Debug
    for Mcts<M, S, O, A>
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mcts")
            .field("size", &self.size())
            .field("cycles", &self.cycles())
            .field("max_depth", &self.max_depth())
            .field("cps", &self.cps())
            .field("searching", &!self.limiter.stop_flag())
            .field("root", &*self.root)
            .finish()
    }
}

/// Best child under `policy`, or `None` when `node` has no suitable child.
pub(crate) fn best_child_in<M: Move, S: Stats>(
    node: &Node<M, S>,
    policy: BestChildPolicy,
) -> Option<&Node<M, S>> {
    let children = node.children();

    match policy {
        BestChildPolicy::MostVisits => {
            let mut best: Option<&Node<M, S>> = None;
            let mut max_visits = 0;
            for child in children {
                let real = child.stats().real_visits();
                if real > max_visits {
                    max_visits = real;
                    best = Some(child);
                }
            }
            best
        }
        BestChildPolicy::WinRate => {
            // Trust a win rate only once the child has enough visits, both
            // in absolute terms and relative to its most-visited sibling.
            const MIN_VISITS: i32 = 10;
            const MIN_VISITS_FRACTION: f64 = 0.0;

            let max_visits = children
                .iter()
                .map(|c| c.stats().n())
                .max()
                .unwrap_or(0);
            let visit_floor = (MIN_VISITS_FRACTION * max_visits as f64) as i32;

            let mut best: Option<&Node<M, S>> = None;
            let mut best_win_rate = -1.0;
            for child in children {
                let real = child.stats().real_visits();
                if real > MIN_VISITS && real > visit_floor {
                    let win_rate = child.stats().q() / child.stats().n() as f64;
                    if win_rate > best_win_rate {
                        best_win_rate = win_rate;
                        best = Some(child);
                    }
                }
            }
            best
        }
    }
}

pub(crate) fn pv_nodes_in<M: Move, S: Stats>(
    from: &Node<M, S>,
    policy: BestChildPolicy,
    include_root: bool,
    max_depth: u32,
) -> (Vec<&Node<M, S>>, bool) {
    let mut pv = Vec::with_capacity(max_depth as usize + 1);
    if include_root {
        pv.push(from);
    }

    if from.children().is_empty() {
        return (pv, from.terminal());
    }

    let mut node = from;
    let mut mate = false;
    while !node.children().is_empty() {
        node = match best_child_in(node, policy) {
            Some(child) => child,
            None => break,
        };
        pv.push(node);

        if node.terminal() {
            mate = true;
            break;
        }
    }

    (pv, mate)
}

pub(crate) fn pv_in<M: Move, S: Stats>(
    from: &Node<M, S>,
    policy: BestChildPolicy,
    include_root: bool,
    max_depth: u32,
) -> (Vec<M>, bool, bool) {
    let (nodes, mate) = pv_nodes_in(from, policy, include_root, max_depth);
    let moves = nodes.iter().map(|n| n.mv()).collect();

    // A mate line whose final node averages exactly one half is a forced
    // draw; compare the scaled integers so no float rounding sneaks in.
    let draw = mate
        && nodes.last().is_some_and(|last| {
            2 * last.stats().raw_q() == 1000 * last.stats().n() as u64
        });

    (moves, mate, draw)
}

pub(crate) fn multi_pv_in<M: Move, S: Stats>(
    root: &Node<M, S>,
    count: usize,
    policy: BestChildPolicy,
    max_depth: u32,
) -> Vec<PvLine<M>> {
    let mut ranked: Vec<&Node<M, S>> = root.children().iter().collect();
    ranked.sort_by(|a, b| b.stats().n().cmp(&a.stats().n()));
    ranked.truncate(count.max(1));

    ranked
        .into_iter()
        .map(|child| {
            let (moves, terminal, draw) = pv_in(child, policy, true, max_depth);
            let visits = child.stats().n();
            PvLine {
                best_move: child.mv(),
                moves,
                eval: if visits > 0 { child.stats().avg_q() } else { 0.5 },
                visits,
                terminal,
                draw,
            }
        })
        .collect()
}

/// Build the snapshot handed to listener callbacks.
pub(crate) fn snapshot_stats<M: Move, S: Stats>(
    root: &Node<M, S>,
    multi_pv: usize,
    limiter: &Limiter,
    counters: &Counters,
) -> ListenerStats<M> {
    let max_depth = counters.maxdepth.load(Ordering::Relaxed);
    ListenerStats {
        lines: multi_pv_in(root, multi_pv, BestChildPolicy::MostVisits, max_depth),
        max_depth,
        cycles: counters.cycles.load(Ordering::Relaxed),
        time_ms: limiter.elapsed_ms(),
        cps: counters.cps.load(Ordering::Relaxed),
        stop_reason: limiter.stop_reason(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::NodeStats;

    fn expand_with(node: &Node<u32, NodeStats>, moves: &[u32], terminal: bool) {
        assert!(node.try_claim_expansion());
        let children = moves
            .iter()
            .map(|&m| Node::new_child(node, m, terminal, NodeStats::new()))
            .collect();
        node.install_children(children);
        node.finish_expansion();
    }

    fn credit(node: &Node<u32, NodeStats>, visits: i32, q: f64) {
        node.stats().add_vvl(visits, 0);
        node.stats().add_q(q);
    }

    #[test]
    fn most_visits_picks_the_heaviest_child() {
        let root: Node<u32, NodeStats> = Node::new_root(false, NodeStats::new());
        expand_with(&root, &[0, 1, 2], false);
        credit(&root.children()[0], 5, 2.0);
        credit(&root.children()[1], 9, 2.0);
        credit(&root.children()[2], 3, 3.0);

        let best = best_child_in(&root, BestChildPolicy::MostVisits).unwrap();
        assert_eq!(best.mv(), 1);
    }

    #[test]
    fn most_visits_ignores_unvisited_children() {
        let root: Node<u32, NodeStats> = Node::new_root(false, NodeStats::new());
        expand_with(&root, &[0, 1], false);

        assert!(best_child_in(&root, BestChildPolicy::MostVisits).is_none());
    }

    #[test]
    fn win_rate_requires_a_visit_floor() {
        let root: Node<u32, NodeStats> = Node::new_root(false, NodeStats::new());
        expand_with(&root, &[0, 1], false);
        // Perfect score but too few visits to trust
        credit(&root.children()[0], 5, 5.0);
        credit(&root.children()[1], 50, 30.0);

        let best = best_child_in(&root, BestChildPolicy::WinRate).unwrap();
        assert_eq!(best.mv(), 1);
    }

    #[test]
    fn pv_follows_best_children_to_a_leaf() {
        let root: Node<u32, NodeStats> = Node::new_root(false, NodeStats::new());
        expand_with(&root, &[0, 1], false);
        credit(&root.children()[1], 10, 5.0);
        expand_with(&root.children()[1], &[2, 3], false);
        credit(&root.children()[1].children()[0], 7, 3.0);

        let (moves, mate, draw) = pv_in(&root, BestChildPolicy::MostVisits, false, 4);
        assert_eq!(moves, vec![1, 2]);
        assert!(!mate);
        assert!(!draw);
    }

    #[test]
    fn pv_reports_mate_and_draw() {
        let root: Node<u32, NodeStats> = Node::new_root(false, NodeStats::new());
        expand_with(&root, &[0], true);
        let child = &root.children()[0];
        // Two visits, outcome sum 1.0: average exactly one half
        credit(child, 2, 1.0);

        let (moves, mate, draw) = pv_in(&root, BestChildPolicy::MostVisits, false, 4);
        assert_eq!(moves, vec![0]);
        assert!(mate);
        assert!(draw);

        // A decisive terminal line is a mate but not a draw
        let root2: Node<u32, NodeStats> = Node::new_root(false, NodeStats::new());
        expand_with(&root2, &[7], true);
        credit(&root2.children()[0], 2, 2.0);
        let (_, mate, draw) = pv_in(&root2, BestChildPolicy::MostVisits, false, 4);
        assert!(mate);
        assert!(!draw);
    }

    #[test]
    fn multi_pv_ranks_by_visits() {
        let root: Node<u32, NodeStats> = Node::new_root(false, NodeStats::new());
        expand_with(&root, &[0, 1, 2], false);
        credit(&root.children()[0], 3, 1.0);
        credit(&root.children()[1], 9, 5.0);
        credit(&root.children()[2], 6, 2.0);

        let lines = multi_pv_in(&root, 2, BestChildPolicy::MostVisits, 4);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].best_move, 1);
        assert_eq!(lines[1].best_move, 2);
        assert_eq!(lines[0].visits, 9);
        assert!(lines[0].moves.starts_with(&[1]));
    }
}
