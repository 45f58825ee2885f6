//! Shared test domains (internal use only).

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::config::next_seed;
use crate::node::Node;
use crate::ops::GameOps;
use crate::rave::{RaveStats, SidedRollout};
use crate::stats::NodeStats;

pub(crate) const BRANCH_FACTOR: usize = 20;

/// Wide synthetic game: every expansion adds `BRANCH_FACTOR` children,
/// positions deeper than eight plies are terminal, rollouts are random
/// win/draw/loss.
pub(crate) struct DummyOps {
    depth: i32,
    rng: ChaCha20Rng,
}

impl DummyOps {
    pub fn new() -> Self {
        Self {
            depth: 0,
            rng: ChaCha20Rng::seed_from_u64(next_seed()),
        }
    }
}

impl GameOps<u32, NodeStats> for DummyOps {
    type Rollout = f64;

    fn expand_node(&mut self, parent: &Node<u32, NodeStats>) -> u32 {
        let children = (0..BRANCH_FACTOR as u32)
            .map(|m| Node::new_child(parent, m, self.depth >= 8, NodeStats::new()))
            .collect();
        parent.install_children(children)
    }

    fn traverse(&mut self, _mv: u32) {
        self.depth += 1;
    }

    fn back_traverse(&mut self) {
        if self.depth > 0 {
            self.depth -= 1;
        }
    }

    fn rollout(&mut self) -> f64 {
        match self.rng.gen_range(0..3) {
            0 => 0.5,
            1 => 1.0,
            _ => 0.0,
        }
    }

    fn reset(&mut self) {
        self.depth = 0;
    }

    fn clone_ops(&self) -> Self {
        Self {
            depth: self.depth,
            rng: ChaCha20Rng::seed_from_u64(0),
        }
    }

    fn set_rand(&mut self, rng: ChaCha20Rng) {
        self.rng = rng;
    }
}

/// Contention fixture: infinitely wide-and-deep game whose rollouts always
/// score one half, so any accounting error shows up in the averages.
pub(crate) struct FlatOps;

impl FlatOps {
    pub fn new() -> Self {
        Self
    }
}

impl GameOps<u32, NodeStats> for FlatOps {
    type Rollout = f64;

    fn expand_node(&mut self, parent: &Node<u32, NodeStats>) -> u32 {
        let children = (0..BRANCH_FACTOR as u32)
            .map(|m| Node::new_child(parent, m, false, NodeStats::new()))
            .collect();
        parent.install_children(children)
    }

    fn traverse(&mut self, _mv: u32) {}

    fn back_traverse(&mut self) {}

    fn rollout(&mut self) -> f64 {
        0.5
    }

    fn reset(&mut self) {}

    fn clone_ops(&self) -> Self {
        Self
    }
}

/// Inert ops for exercising strategies directly; counts undo calls.
#[derive(Default)]
pub(crate) struct NoopOps {
    back_traversals: u32,
}

impl NoopOps {
    pub fn back_traversals(&self) -> u32 {
        self.back_traversals
    }
}

impl GameOps<u32, NodeStats> for NoopOps {
    type Rollout = f64;

    fn expand_node(&mut self, _parent: &Node<u32, NodeStats>) -> u32 {
        0
    }

    fn traverse(&mut self, _mv: u32) {}

    fn back_traverse(&mut self) {
        self.back_traversals += 1;
    }

    fn rollout(&mut self) -> f64 {
        0.5
    }

    fn reset(&mut self) {}

    fn clone_ops(&self) -> Self {
        Self::default()
    }
}

/// Inert ops against RAVE statistics.
#[derive(Default)]
pub(crate) struct NoopRaveOps;

impl GameOps<u32, RaveStats> for NoopRaveOps {
    type Rollout = SidedRollout<u32>;

    fn expand_node(&mut self, _parent: &Node<u32, RaveStats>) -> u32 {
        0
    }

    fn traverse(&mut self, _mv: u32) {}

    fn back_traverse(&mut self) {}

    fn rollout(&mut self) -> SidedRollout<u32> {
        SidedRollout::new(0.5)
    }

    fn reset(&mut self) {}

    fn clone_ops(&self) -> Self {
        Self
    }
}

/// Tic-tac-toe against RAVE statistics: playouts record which side played
/// which square so backpropagation can spread AMAF credit.
pub(crate) struct RaveTttOps {
    inner: TttOps,
}

impl RaveTttOps {
    pub fn from_position(board: [u8; 9], turn: u8) -> Self {
        Self {
            inner: TttOps::from_position(board, turn),
        }
    }
}

impl GameOps<u8, RaveStats> for RaveTttOps {
    type Rollout = SidedRollout<u8>;

    fn expand_node(&mut self, parent: &Node<u8, RaveStats>) -> u32 {
        let mut children = Vec::new();
        for mv in self.inner.open_squares() {
            self.inner.traverse(mv);
            let terminal = winner(&self.inner.board) != 0;
            self.inner.back_traverse();
            children.push(Node::new_child(parent, mv, terminal, RaveStats::new()));
        }
        parent.install_children(children)
    }

    fn traverse(&mut self, mv: u8) {
        self.inner.traverse(mv);
    }

    fn back_traverse(&mut self) {
        self.inner.back_traverse();
    }

    fn rollout(&mut self) -> SidedRollout<u8> {
        let leaf_turn = self.inner.turn;
        let mut outcome = SidedRollout::new(0.5);
        let mut played = 0;

        while winner(&self.inner.board) == 0 {
            let open = self.inner.open_squares();
            let mv = open[self.inner.rng.gen_range(0..open.len())];
            outcome.record(usize::from(self.inner.turn != leaf_turn), mv);
            self.inner.traverse(mv);
            played += 1;
        }

        outcome.set_value(match winner(&self.inner.board) {
            w if w == leaf_turn => 1.0,
            3 => 0.5,
            _ => 0.0,
        });

        for _ in 0..played {
            self.inner.back_traverse();
        }
        outcome
    }

    fn reset(&mut self) {
        self.inner.reset();
    }

    fn clone_ops(&self) -> Self {
        Self {
            inner: self.inner.clone_ops(),
        }
    }

    fn set_rand(&mut self, rng: ChaCha20Rng) {
        self.inner.set_rand(rng);
    }
}

/// Plain tic-tac-toe with light (random) playouts. Cells hold 0 (empty),
/// 1 (X) or 2 (O); the winner code 3 means a draw.
pub(crate) struct TttOps {
    board: [u8; 9],
    turn: u8,
    history: Vec<u8>,
    rng: ChaCha20Rng,
}

const LINES: [[usize; 3]; 8] = [
    [0, 1, 2],
    [3, 4, 5],
    [6, 7, 8], // rows
    [0, 3, 6],
    [1, 4, 7],
    [2, 5, 8], // columns
    [0, 4, 8],
    [2, 4, 6], // diagonals
];

fn winner(board: &[u8; 9]) -> u8 {
    for line in &LINES {
        let [a, b, c] = *line;
        if board[a] != 0 && board[a] == board[b] && board[b] == board[c] {
            return board[a];
        }
    }
    if board.iter().all(|&cell| cell != 0) {
        return 3;
    }
    0
}

impl TttOps {
    /// Anchor the game on an arbitrary position; `turn` is the side to move
    /// (1 = X, 2 = O).
    pub fn from_position(board: [u8; 9], turn: u8) -> Self {
        Self {
            board,
            turn,
            history: Vec::new(),
            rng: ChaCha20Rng::seed_from_u64(next_seed()),
        }
    }

    fn open_squares(&self) -> Vec<u8> {
        (0..9u8)
            .filter(|&m| self.board[m as usize] == 0)
            .collect()
    }
}

impl GameOps<u8, NodeStats> for TttOps {
    type Rollout = f64;

    fn expand_node(&mut self, parent: &Node<u8, NodeStats>) -> u32 {
        let mut children = Vec::new();
        for mv in self.open_squares() {
            self.traverse(mv);
            let terminal = winner(&self.board) != 0;
            self.back_traverse();
            children.push(Node::new_child(parent, mv, terminal, NodeStats::new()));
        }
        parent.install_children(children)
    }

    fn traverse(&mut self, mv: u8) {
        self.board[mv as usize] = self.turn;
        self.turn = 3 - self.turn;
        self.history.push(mv);
    }

    fn back_traverse(&mut self) {
        if let Some(mv) = self.history.pop() {
            self.turn = 3 - self.turn;
            self.board[mv as usize] = 0;
        }
    }

    fn rollout(&mut self) -> f64 {
        let leaf_turn = self.turn;
        let mut played = 0;

        while winner(&self.board) == 0 {
            let open = self.open_squares();
            let mv = open[self.rng.gen_range(0..open.len())];
            self.traverse(mv);
            played += 1;
        }

        let result = match winner(&self.board) {
            w if w == leaf_turn => 1.0,
            3 => 0.5,
            _ => 0.0,
        };

        for _ in 0..played {
            self.back_traverse();
        }
        result
    }

    fn reset(&mut self) {
        self.history.clear();
    }

    fn clone_ops(&self) -> Self {
        Self {
            board: self.board,
            turn: self.turn,
            history: self.history.clone(),
            rng: ChaCha20Rng::seed_from_u64(0),
        }
    }

    fn set_rand(&mut self, rng: ChaCha20Rng) {
        self.rng = rng;
    }
}
