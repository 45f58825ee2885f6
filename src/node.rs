//! Tree nodes and the expansion flag machine.
//!
//! A node owns its children as one contiguous vector, created exactly once
//! by whichever worker wins the `CanExpand -> Expanding` CAS and published
//! with a release store of the `Expanded` flag. Readers load the flag with
//! acquire ordering and never touch the child vector before seeing
//! `Expanded`, so the vector itself needs no lock. The parent link is a raw
//! back-pointer used only to walk upwards during backpropagation; ownership
//! flows strictly downwards.

use std::cell::{Cell, UnsafeCell};
use std::fmt;
use std::hash::Hash;
use std::ptr;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::stats::Stats;

/// Capability bound for move tokens. The library stores moves verbatim and
/// only ever compares them; `Default` supplies the placeholder value carried
/// by root nodes.
pub trait Move: Copy + Eq + Hash + Default + fmt::Debug + Send + Sync + 'static {}

impl<T> Move for T where T: Copy + Eq + Hash + Default + fmt::Debug + Send + Sync + 'static {}

const EXPANDING: u32 = 1;
const EXPANDED: u32 = 2;
const TERMINAL: u32 = 4;

/// A single search-tree node: the move that led here, its statistics, the
/// expansion state and the child vector.
pub struct Node<M, S> {
    mv: M,
    stats: S,
    flags: AtomicU32,
    parent: Cell<*const Node<M, S>>,
    children: UnsafeCell<Vec<Node<M, S>>>,
}

// SAFETY: all shared mutation goes through atomics (`flags`, the stats) or
// through the child vector, which is written only by the unique worker that
// holds the Expanding claim and read only after the Expanded flag has been
// published with release/acquire ordering. The parent cell is written only
// while the writer has exclusive structural access (construction, cloning,
// root promotion, merge adoption).
unsafe impl<M: Move, S: Stats> Send for Node<M, S> {}
unsafe impl<M: Move, S: Stats> Sync for Node<M, S> {}

impl<M: Move, S: Stats> Node<M, S> {
    pub(crate) fn new_root(terminated: bool, stats: S) -> Self {
        Self {
            mv: M::default(),
            stats,
            flags: AtomicU32::new(if terminated { TERMINAL } else { 0 }),
            parent: Cell::new(ptr::null()),
            children: UnsafeCell::new(Vec::new()),
        }
    }

    /// Create a child of `parent`. Domain operations call this from
    /// `expand_node` for every legal move.
    pub fn new_child(parent: &Node<M, S>, mv: M, terminated: bool, stats: S) -> Self {
        Self {
            mv,
            stats,
            flags: AtomicU32::new(if terminated { TERMINAL } else { 0 }),
            parent: Cell::new(parent as *const _),
            children: UnsafeCell::new(Vec::new()),
        }
    }

    /// The move that was played to reach this node from its parent.
    /// Meaningless on root nodes.
    pub fn mv(&self) -> M {
        self.mv
    }

    pub fn stats(&self) -> &S {
        &self.stats
    }

    /// Walk one step towards the root. `None` at the root.
    pub fn parent(&self) -> Option<&Node<M, S>> {
        let parent = self.parent.get();
        if parent.is_null() {
            None
        } else {
            // SAFETY: a non-null parent pointer always refers to the node
            // that owns this one (directly or via the boxed root), which by
            // the downward-ownership invariant outlives it.
            unsafe { Some(&*parent) }
        }
    }

    pub(crate) fn set_parent(&self, parent: *const Node<M, S>) {
        self.parent.set(parent);
    }

    /// The node's children. Empty until the node has been expanded; the
    /// slice's length and move identities never change once published.
    pub fn children(&self) -> &[Node<M, S>] {
        if self.flags.load(Ordering::Acquire) & EXPANDED != 0 {
            // SAFETY: Expanded is published with release ordering after the
            // vector was installed, and the vector is never written again.
            unsafe { &*self.children.get() }
        } else {
            &[]
        }
    }

    pub(crate) fn children_mut(&mut self) -> &mut Vec<Node<M, S>> {
        self.children.get_mut()
    }

    pub(crate) fn take_children(&mut self) -> Vec<Node<M, S>> {
        std::mem::take(self.children.get_mut())
    }

    pub fn terminal(&self) -> bool {
        self.flags.load(Ordering::Acquire) & TERMINAL != 0
    }

    pub fn expanded(&self) -> bool {
        self.flags.load(Ordering::Acquire) & EXPANDED != 0
    }

    pub fn expanding(&self) -> bool {
        self.flags.load(Ordering::Acquire) & EXPANDING != 0
    }

    /// Try to claim the exclusive right to expand this node. Fails if the
    /// node is terminal, already expanded, or claimed by another worker.
    pub(crate) fn try_claim_expansion(&self) -> bool {
        self.flags
            .compare_exchange(0, EXPANDING, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Publish the installed children. Only valid after a successful
    /// `try_claim_expansion` and a non-empty `install_children`.
    pub(crate) fn finish_expansion(&self) {
        self.flags.store(EXPANDED, Ordering::Release);
    }

    /// Give up a claimed expansion (the domain produced no children); the
    /// node becomes expandable again.
    pub(crate) fn revert_expansion(&self) {
        self.flags.store(0, Ordering::Release);
    }

    /// Install the child vector on a node whose expansion claim the caller
    /// holds. Rewrites each child's parent link to this node and returns the
    /// number of children installed. Domain `expand_node` implementations
    /// must call this exactly once per successful expansion.
    pub fn install_children(&self, mut children: Vec<Node<M, S>>) -> u32 {
        debug_assert!(
            self.expanding(),
            "install_children requires the expansion claim"
        );

        for child in &mut children {
            child.parent.set(self as *const _);
        }

        let count = children.len() as u32;
        // SAFETY: the caller holds the Expanding claim, so no other thread
        // writes the vector, and readers do not touch it until Expanded is
        // published by finish_expansion.
        unsafe {
            *self.children.get() = children;
        }
        count
    }

    /// Number of nodes in this subtree, this node included.
    pub fn count_nodes(&self) -> usize {
        1 + self
            .children()
            .iter()
            .map(Node::count_nodes)
            .sum::<usize>()
    }

    fn clone_shallow(&self) -> Self {
        Self {
            mv: self.mv,
            stats: self.stats.snapshot(),
            flags: AtomicU32::new(self.flags.load(Ordering::Acquire)),
            parent: Cell::new(ptr::null()),
            children: UnsafeCell::new(Vec::new()),
        }
    }

    /// Deep-copy this subtree into an independent boxed tree. Statistics are
    /// copied as atomic snapshots and every cloned child's parent link points
    /// at its cloned parent, never back into the original tree.
    pub(crate) fn deep_clone(&self) -> Box<Node<M, S>> {
        let mut clone = Box::new(self.clone_shallow());
        clone_children_into(self, &mut clone);
        clone
    }

    /// Point each direct child's parent link at this node again. Needed
    /// after the node struct itself has been moved (its child vector's heap
    /// buffer, and therefore every deeper link, stays put).
    pub(crate) fn reparent_children(&mut self) {
        let parent = self as *const Node<M, S>;
        for child in self.children.get_mut() {
            child.parent.set(parent);
        }
    }
}

fn clone_children_into<M: Move, S: Stats>(src: &Node<M, S>, dst: &mut Node<M, S>) {
    let children: Vec<Node<M, S>> = src.children().iter().map(Node::clone_shallow).collect();
    *dst.children.get_mut() = children;

    let dst_ptr = dst as *const Node<M, S>;
    for (src_child, dst_child) in src.children().iter().zip(dst.children.get_mut()) {
        dst_child.parent.set(dst_ptr);
        clone_children_into(src_child, dst_child);
    }
}

impl<M: Move, S: Stats> fmt::Debug for Node<M, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (visits, virtual_loss) = self.stats.get_vvl();
        f.debug_struct("Node")
            .field("mv", &self.mv)
            .field("n", &visits)
            .field("vl", &virtual_loss)
            .field("q", &self.stats.q())
            .field("terminal", &self.terminal())
            .field("children", &self.children().len())
            .finish()
    }
}
