//! Live search introspection: callbacks and the snapshots they receive.

use std::fmt;
use std::sync::Arc;

use crate::limiter::StopReason;
use crate::node::Move;

/// One principal variation, extracted from a root child.
#[derive(Debug, Clone)]
pub struct PvLine<M> {
    /// The root child's move, which is also the first move of the line.
    pub best_move: M,
    /// The whole line, `best_move` included.
    pub moves: Vec<M>,
    /// Average outcome of the line's first node; 0.5 when unvisited.
    pub eval: f64,
    /// Visit count of the line's first node.
    pub visits: i32,
    /// The line ends in a terminal node.
    pub terminal: bool,
    /// The line ends in a terminal node with a drawn score.
    pub draw: bool,
}

/// Search state delivered to listener callbacks. A detached snapshot: it
/// holds no references into the tree and stays valid after the search moves
/// on.
#[derive(Debug, Clone)]
pub struct ListenerStats<M> {
    /// Best lines, ranked by visit count.
    pub lines: Vec<PvLine<M>>,
    pub max_depth: u32,
    pub cycles: u32,
    pub time_ms: u32,
    pub cps: u32,
    pub stop_reason: StopReason,
}

pub type ListenerFn<M> = Arc<dyn Fn(&ListenerStats<M>) + Send + Sync>;

/// Optional search-progress callbacks, all invoked on the main worker only,
/// so they need no synchronization of their own. Building a snapshot walks
/// the principal variations, which is not free; a tight `on_cycle` interval
/// will slow the search down noticeably.
#[derive(Clone, Default)]
pub struct StatsListener<M> {
    pub(crate) on_depth: Option<ListenerFn<M>>,
    pub(crate) on_cycle: Option<ListenerFn<M>>,
    pub(crate) on_stop: Option<ListenerFn<M>>,
    cycle_interval: u32,
}

impl<M: Move> StatsListener<M> {
    pub fn new() -> Self {
        Self {
            on_depth: None,
            on_cycle: None,
            on_stop: None,
            cycle_interval: 0,
        }
    }

    /// Called whenever the observed maximum depth increases.
    pub fn on_depth(&mut self, f: impl Fn(&ListenerStats<M>) + Send + Sync + 'static) -> &mut Self {
        self.on_depth = Some(Arc::new(f));
        self
    }

    /// Called every `cycle_interval` iterations.
    pub fn on_cycle(&mut self, f: impl Fn(&ListenerStats<M>) + Send + Sync + 'static) -> &mut Self {
        self.on_cycle = Some(Arc::new(f));
        self
    }

    /// Called exactly once when the search stops; the snapshot carries the
    /// final stop reason.
    pub fn on_stop(&mut self, f: impl Fn(&ListenerStats<M>) + Send + Sync + 'static) -> &mut Self {
        self.on_stop = Some(Arc::new(f));
        self
    }

    /// How many iterations between `on_cycle` calls, at least 1.
    pub fn set_cycle_interval(&mut self, interval: u32) -> &mut Self {
        self.cycle_interval = interval.max(1);
        self
    }

    pub fn cycle_interval(&self) -> u32 {
        self.cycle_interval.max(1)
    }

    /// Drop all callbacks.
    pub fn clear(&mut self) {
        self.on_depth = None;
        self.on_cycle = None;
        self.on_stop = None;
    }
}

impl<M> fmt::Debug for StatsListener<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatsListener")
            .field("on_depth", &self.on_depth.is_some())
            .field("on_cycle", &self.on_cycle.is_some())
            .field("on_stop", &self.on_stop.is_some())
            .field("cycle_interval", &self.cycle_interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_is_clamped() {
        let mut listener: StatsListener<u32> = StatsListener::new();
        assert_eq!(listener.cycle_interval(), 1);
        listener.set_cycle_interval(0);
        assert_eq!(listener.cycle_interval(), 1);
        listener.set_cycle_interval(500);
        assert_eq!(listener.cycle_interval(), 500);
    }

    #[test]
    fn clear_drops_callbacks() {
        let mut listener: StatsListener<u32> = StatsListener::new();
        listener
            .on_depth(|_| {})
            .on_cycle(|_| {})
            .on_stop(|_| {});
        assert!(listener.on_depth.is_some());

        listener.clear();
        assert!(listener.on_depth.is_none());
        assert!(listener.on_cycle.is_none());
        assert!(listener.on_stop.is_none());
    }
}
