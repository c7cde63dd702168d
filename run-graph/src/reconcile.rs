//! Position-freezing reconciliation of successive render graphs.
//!
//! The first non-empty graph is adopted as is. After that, nodes keep their
//! position and every other rendering field; only their `data` payload is
//! replaced. Nodes that show up later are not added and nodes that disappear
//! are not removed until [`Reconciler::reset`].
//!
//! Computations are ticketed with [`SnapshotSeq`]. A result is applied only if
//! its ticket is newer than the last applied one, so a slow layout for an old
//! snapshot can never overwrite a newer view.

use shared_types::RenderGraph;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapshotSeq(u64);

impl SnapshotSeq {
    pub fn value(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// First graph taken wholesale; `fit_view` asks the renderer to frame it.
    Adopted { fit_view: bool },
    /// Payloads refreshed in place.
    Refreshed {
        updated: usize,
        missing: usize,
        ignored_new: usize,
    },
    /// Result belongs to a superseded snapshot and was dropped.
    Stale,
    /// Nothing to show yet; still uninitialized.
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
enum RenderState {
    Uninitialized,
    Initialized(RenderGraph),
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    state: RenderState,
    next_seq: u64,
    last_applied: Option<SnapshotSeq>,
    in_flight: Option<SnapshotSeq>,
    fit_view_sent: bool,
    last_error: Option<String>,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reconciler {
    pub fn new() -> Self {
        Self {
            state: RenderState::Uninitialized,
            next_seq: 0,
            last_applied: None,
            in_flight: None,
            fit_view_sent: false,
            last_error: None,
        }
    }

    /// Ticket for a computation about to start.
    pub fn begin(&mut self) -> SnapshotSeq {
        self.next_seq += 1;
        let seq = SnapshotSeq(self.next_seq);
        self.in_flight = Some(seq);
        seq
    }

    pub fn apply(&mut self, seq: SnapshotSeq, graph: RenderGraph) -> Reconciliation {
        if self.is_stale(seq) {
            tracing::debug!(
                seq = seq.value(),
                last_applied = self.last_applied.map(|s| s.value()),
                "Dropping result of superseded snapshot"
            );
            return Reconciliation::Stale;
        }
        self.settle(seq);
        self.last_applied = Some(seq);
        self.last_error = None;

        if let RenderState::Initialized(current) = &mut self.state {
            return refresh(current, graph);
        }
        if graph.is_empty() {
            return Reconciliation::Empty;
        }

        let fit_view = !self.fit_view_sent;
        self.fit_view_sent = true;
        tracing::info!(
            run_id = %graph.run_id,
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            "Adopted initial render graph"
        );
        self.state = RenderState::Initialized(graph);
        Reconciliation::Adopted { fit_view }
    }

    /// Record a failed computation. The rendered graph is left untouched.
    pub fn fail(&mut self, seq: SnapshotSeq, error: &impl std::fmt::Display) {
        if self.is_stale(seq) {
            return;
        }
        self.settle(seq);
        tracing::warn!(seq = seq.value(), error = %error, "Render computation failed");
        self.last_error = Some(error.to_string());
    }

    /// True only while nothing is rendered and a computation is pending.
    /// Refreshes of an existing graph never report loading.
    pub fn is_loading(&self) -> bool {
        matches!(self.state, RenderState::Uninitialized) && self.in_flight.is_some()
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self.state, RenderState::Initialized(_))
    }

    pub fn graph(&self) -> Option<&RenderGraph> {
        match &self.state {
            RenderState::Initialized(graph) => Some(graph),
            RenderState::Uninitialized => None,
        }
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Back to uninitialized; the next non-empty graph is adopted and framed
    /// again. Tickets keep increasing so results begun before the reset are
    /// still recognized as stale.
    pub fn reset(&mut self) {
        self.state = RenderState::Uninitialized;
        self.fit_view_sent = false;
        self.last_error = None;
        self.last_applied = self.in_flight.or(self.last_applied);
        self.in_flight = None;
    }

    fn is_stale(&self, seq: SnapshotSeq) -> bool {
        self.last_applied.is_some_and(|last| seq <= last)
    }

    fn settle(&mut self, seq: SnapshotSeq) {
        if self.in_flight.is_some_and(|pending| pending <= seq) {
            self.in_flight = None;
        }
    }
}

fn refresh(current: &mut RenderGraph, next: RenderGraph) -> Reconciliation {
    let current_ids: HashSet<&str> = current.nodes.iter().map(|n| n.id.as_str()).collect();
    let ignored_new = next
        .nodes
        .iter()
        .filter(|n| !current_ids.contains(n.id.as_str()))
        .count();

    let mut incoming: HashMap<String, shared_types::NodeData> = next
        .nodes
        .into_iter()
        .map(|n| (n.id, n.data))
        .collect();
    let mut updated = 0;
    let mut missing = 0;
    for node in &mut current.nodes {
        match incoming.remove(&node.id) {
            Some(data) => {
                node.data = data;
                updated += 1;
            }
            None => missing += 1,
        }
    }
    current.status = next.status;
    current.statistics = next.statistics;

    if ignored_new > 0 {
        tracing::info!(
            run_id = %current.run_id,
            ignored_new,
            "New nodes appeared after initial layout; not shown until remount"
        );
    }
    Reconciliation::Refreshed {
        updated,
        missing,
        ignored_new,
    }
}
