//! The search driver: worker threads, selection, root-parallel merge.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::thread;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{next_seed, MultithreadPolicy, VIRTUAL_LOSS};
use crate::limiter::{CancelToken, Limiter};
use crate::listener::{ListenerFn, StatsListener};
use crate::node::{Move, Node};
use crate::ops::GameOps;
use crate::stats::Stats;
use crate::strategy::Strategy;
use crate::tree::{snapshot_stats, Counters, Mcts};

/// Errors surfaced by the search entry points.
#[derive(Debug, Error)]
pub enum SearchError {
    /// The domain's `expand_node` produced no children for a non-terminal
    /// root, which violates the expansion contract.
    #[error("expansion produced no children for a non-terminal root")]
    EmptyRootExpansion,
}

/// Shareable pointer to a pinned tree root. The boxed roots outlive the
/// workers: `Mcts` joins every worker before dropping or replacing a root,
/// and the merge runs on worker 0 after all other workers have exited.
struct RootHandle<M, S>(*const Node<M, S>);

unsafe impl<M: Move, S: Stats> Send for RootHandle<M, S> {}

impl<M: Move, S: Stats, O: GameOps<M, S>, A: Strategy<M, S, O>> Mcts<M, S, O, A> {
    /// Launch the search with `Limits.n_threads` workers and return
    /// immediately; use [`Mcts::synchronize`] to wait for completion. A
    /// search that is already running is stopped and joined first.
    ///
    /// Returns an error only on a root-level domain contract violation; a
    /// budget running out is the normal outcome, readable via
    /// [`Mcts::stop_reason`].
    pub fn search_multi(&mut self) -> Result<(), SearchError> {
        if self.is_searching() {
            self.stop();
        }
        self.synchronize();

        self.limiter.reset();
        self.counters.cycles.store(0, Ordering::Relaxed);
        self.counters.cps.store(0, Ordering::Relaxed);
        self.counters.maxdepth.store(0, Ordering::Relaxed);
        self.counters.collisions.store(0, Ordering::Relaxed);
        self.counters.expand_failures.store(0, Ordering::Relaxed);
        self.counters.merged.store(false, Ordering::Relaxed);

        let limits = self.limits();
        let multi_pv = limits.multi_pv.max(1);

        // A finished game: report and return without launching workers.
        if self.root.terminal() {
            self.limiter.set_stop(true);
            if let Some(on_stop) = self.listener.on_stop.clone() {
                on_stop(&snapshot_stats(
                    &self.root,
                    multi_pv,
                    &self.limiter,
                    &self.counters,
                ));
            }
            return Ok(());
        }

        // The root is normally expanded at construction, but a make_move may
        // have promoted an unexpanded leaf.
        if !self.root.expanded() && self.root.try_claim_expansion() {
            let added = self.ops.expand_node(&self.root);
            if added == 0 {
                self.root.revert_expansion();
                self.limiter.flag_contract();
                self.limiter.set_stop(true);
                warn!("root expansion produced no children on a non-terminal position");
                if let Some(on_stop) = self.listener.on_stop.clone() {
                    on_stop(&snapshot_stats(
                        &self.root,
                        multi_pv,
                        &self.limiter,
                        &self.counters,
                    ));
                }
                return Err(SearchError::EmptyRootExpansion);
            }
            self.root.finish_expansion();
            self.counters.size.fetch_add(added, Ordering::Relaxed);
        }

        let threads = limits.n_threads.max(1);
        let base_seed = next_seed();
        let token = self.limiter.context();
        debug!(
            threads,
            policy = ?self.policy,
            limits = %limits,
            "starting search"
        );

        // Per-worker roots: everyone shares the main root in tree-parallel
        // mode; in root-parallel mode each extra worker gets a deep clone.
        let root_parallel = self.policy == MultithreadPolicy::RootParallel && threads > 1;
        let mut root_ptrs: Vec<RootHandle<M, S>> = Vec::with_capacity(threads);
        root_ptrs.push(RootHandle(&*self.root));
        if root_parallel {
            let mut clones = Vec::with_capacity(threads - 1);
            for _ in 1..threads {
                let clone = self.root.deep_clone();
                root_ptrs.push(RootHandle(&*clone));
                clones.push(clone);
            }
            *self.worker_roots.lock().unwrap() = clones;
        } else {
            for _ in 1..threads {
                root_ptrs.push(RootHandle(&*self.root));
            }
        }

        self.counters.active.store(threads, Ordering::Release);

        for (id, root) in root_ptrs.into_iter().enumerate() {
            let worker = Worker {
                id,
                root,
                limiter: Arc::clone(&self.limiter),
                counters: Arc::clone(&self.counters),
                listener: Arc::clone(&self.listener),
                strategy: self.strategy.clone(),
                ops: self.ops.clone_ops(),
                rng: ChaCha20Rng::seed_from_u64(base_seed ^ id as u64),
                token: token.clone(),
                multi_pv,
                merge_roots: if root_parallel && id == 0 {
                    Some(Arc::clone(&self.worker_roots))
                } else {
                    None
                },
            };

            let handle = thread::Builder::new()
                .name(format!("mcts-worker-{id}"))
                .spawn(move || worker.run())
                .expect("failed to spawn search worker");
            self.handles.push(handle);
        }

        Ok(())
    }

    /// Block until every worker has exited and, in root-parallel mode, the
    /// merge has completed. A worker that aborted on a contract violation
    /// re-raises its panic here. No-op when no search was started.
    pub fn synchronize(&mut self) {
        for handle in self.handles.drain(..) {
            if let Err(panic) = handle.join() {
                std::panic::resume_unwind(panic);
            }
        }
    }
}

struct Worker<M: Move, S: Stats, O: GameOps<M, S>, A: Strategy<M, S, O>> {
    id: usize,
    root: RootHandle<M, S>,
    limiter: Arc<Limiter>,
    counters: Arc<Counters>,
    listener: Arc<StatsListener<M>>,
    strategy: A,
    ops: O,
    rng: ChaCha20Rng,
    token: Option<CancelToken>,
    multi_pv: usize,
    /// Worker 0 in root-parallel mode drains this at merge time.
    merge_roots: Option<Arc<Mutex<Vec<Box<Node<M, S>>>>>>,
}

/// Decrements the active-worker count even if the worker unwinds, so worker
/// 0 never waits on a dead thread.
struct ActiveGuard<'c>(&'c Counters);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::AcqRel);
    }
}

impl<M: Move, S: Stats, O: GameOps<M, S>, A: Strategy<M, S, O>> Worker<M, S, O, A> {
    fn run(mut self) {
        // SAFETY: the boxed root this handle points at outlives the worker;
        // see RootHandle.
        let root: &Node<M, S> = unsafe { &*self.root.0 };
        let guard = ActiveGuard(&self.counters);

        let ops_seed = self.rng.gen::<u64>();
        self.ops.set_rand(ChaCha20Rng::seed_from_u64(ops_seed));

        loop {
            // Poll cancellation without taking any lock; a cancelled token
            // latches the limiter's stop flag for every worker.
            if let Some(token) = &self.token {
                if token.is_cancelled() {
                    self.limiter.set_stop(true);
                }
            }

            let size = self.counters.size.load(Ordering::Relaxed);
            let depth = self.counters.maxdepth.load(Ordering::Relaxed);
            let cycles = self.counters.cycles.load(Ordering::Relaxed);
            if !self.limiter.ok(size, depth, cycles) {
                break;
            }

            let leaf = selection(
                &self.strategy,
                &mut self.ops,
                &mut self.rng,
                &self.limiter,
                &self.counters,
                &self.listener,
                self.multi_pv,
                self.id,
                root,
            );

            let outcome = self.ops.rollout();
            self.strategy.backpropagate(&mut self.ops, leaf, outcome);

            let done = self.counters.cycles.fetch_add(1, Ordering::Relaxed) + 1;
            let cps = (done as u64 * 1000) / self.limiter.elapsed_ms() as u64;
            self.counters
                .cps
                .store(cps.min(u32::MAX as u64) as u32, Ordering::Relaxed);

            if self.id == 0 {
                if let Some(on_cycle) = &self.listener.on_cycle {
                    if done % self.listener.cycle_interval() == 0 {
                        self.fire(on_cycle, root);
                    }
                }
            }
        }

        if self.id == 0 {
            self.limiter.evaluate_stop_reason(
                self.counters.size.load(Ordering::Relaxed),
                self.counters.maxdepth.load(Ordering::Relaxed),
                self.counters.cycles.load(Ordering::Relaxed),
            );
            // Every worker observes the same shared counters, so whatever
            // ended this loop ends theirs too; the flag marks the search as
            // stopped for the caller. Evaluate first, or an exhausted budget
            // would also read as an interrupt.
            self.limiter.set_stop(true);

            // Wait for the rest, merge if needed, then report the stop;
            // the snapshot must see the merged statistics.
            while self.counters.active.load(Ordering::Acquire) > 1 {
                thread::yield_now();
            }

            if let Some(pool) = &self.merge_roots {
                let others = std::mem::take(&mut *pool.lock().unwrap());
                debug!(trees = others.len() + 1, "merging root-parallel results");
                for mut other in others {
                    merge_node(root, &mut other);
                }
                self.counters.merged.store(true, Ordering::Release);
            }

            debug!(
                cycles = self.counters.cycles.load(Ordering::Relaxed),
                size = self.counters.size.load(Ordering::Relaxed),
                reason = %self.limiter.stop_reason(),
                "search finished"
            );
            if let Some(on_stop) = &self.listener.on_stop {
                self.fire(on_stop, root);
            }
        }

        drop(guard);
    }

    fn fire(&self, callback: &ListenerFn<M>, root: &Node<M, S>) {
        callback(&snapshot_stats(
            root,
            self.multi_pv,
            &self.limiter,
            &self.counters,
        ));
    }
}

/// Descend from `root` to the node this iteration will roll out from,
/// applying virtual loss along the way and expanding the reached leaf when
/// it qualifies.
#[allow(clippy::too_many_arguments)]
fn selection<'t, M, S, O, A>(
    strategy: &A,
    ops: &mut O,
    rng: &mut ChaCha20Rng,
    limiter: &Limiter,
    counters: &Counters,
    listener: &StatsListener<M>,
    multi_pv: usize,
    worker_id: usize,
    root: &'t Node<M, S>,
) -> &'t Node<M, S>
where
    M: Move,
    S: Stats,
    O: GameOps<M, S>,
    A: Strategy<M, S, O>,
{
    let mut node = root;
    let mut depth = 0u32;

    while node.expanded() {
        node = strategy.select(node, root);
        ops.traverse(node.mv());
        depth += 1;
        node.stats().add_vvl(VIRTUAL_LOSS, VIRTUAL_LOSS);
    }

    // A visited, non-terminal leaf grows the tree before the rollout.
    if node.stats().real_visits() > 0 && !node.terminal() {
        if limiter.expand() && node.try_claim_expansion() {
            let added = ops.expand_node(node);
            if added == 0 {
                // Contract violation: a non-terminal position must have
                // moves. Revert so the next selection retries; a recurrence
                // aborts the search.
                node.revert_expansion();
                let failures = counters.expand_failures.fetch_add(1, Ordering::Relaxed);
                warn!(failures = failures + 1, "expansion produced no children");
                if failures >= 1 {
                    limiter.flag_contract();
                    limiter.set_stop(true);
                }
            } else {
                node.finish_expansion();
                counters.size.fetch_add(added, Ordering::Relaxed);
            }
        }

        // Another worker holds the expansion claim: wait it out, counting
        // the collision once per waiting worker per expansion event.
        let mut first = true;
        while node.expanding() {
            if first {
                counters.collisions.fetch_add(1, Ordering::Relaxed);
                first = false;
            }
            thread::yield_now();
        }

        if node.expanded() {
            let children = node.children();
            node = &children[rng.gen_range(0..children.len())];
            ops.traverse(node.mv());
            depth += 1;
            node.stats().add_vvl(VIRTUAL_LOSS, VIRTUAL_LOSS);
        }
    }

    let previous = counters.maxdepth.fetch_max(depth, Ordering::Relaxed);
    if worker_id == 0 && depth >= 2 && depth > previous {
        if let Some(on_depth) = &listener.on_depth {
            on_depth(&snapshot_stats(root, multi_pv, limiter, counters));
        }
    }

    node
}

/// Fold `other`'s statistics into the canonical tree.
///
/// Preconditions: both trees were grown by the same pure expansion function,
/// so matching nodes list their children in the same order. A move-identity
/// mismatch at equal child counts means the domain broke that contract and
/// aborts the search. Shape mismatches near the leaves (one tree expanded a
/// node the other did not) are expected; the canonical side adopts the
/// other's subtree when it has none of its own, and skips it otherwise.
pub(crate) fn merge_node<M: Move, S: Stats>(canonical: &Node<M, S>, other: &mut Node<M, S>) {
    let (visits, virtual_loss) = other.stats().get_vvl();
    canonical.stats().add_vvl(visits, virtual_loss);
    canonical.stats().add_raw_q(other.stats().raw_q());

    let canonical_len = canonical.children().len();
    let other_len = other.children_mut().len();

    if canonical_len != other_len {
        if canonical_len == 0 && other_len != 0 && canonical.try_claim_expansion() {
            // Adopt the whole subtree; its internal parent links stay valid
            // because moving the vector does not move its elements.
            let children = other.take_children();
            canonical.install_children(children);
            canonical.finish_expansion();
        }
        return;
    }

    for (canonical_child, other_child) in canonical
        .children()
        .iter()
        .zip(other.children_mut().iter_mut())
    {
        assert!(
            canonical_child.mv() == other_child.mv(),
            "root-parallel merge found mismatched children; \
             GameOps::expand_node must return children in the same order for the same state"
        );
        merge_node(canonical_child, other_child);
    }
}
