//! Replay dependency graph
//!
//! Ownership of a range moves between sites by appending ledger rows; each row
//! names the rows it supersedes. The `Dag` links the rows relevant to a set of
//! target ranges along those predecessor edges and hands out digests in an
//! order where every ancestor row is exhausted before any descendant row.
//!
//! ## Layout
//!
//! Nodes live in a flat arena (`Vec<DagNode>`); edges are arena indices. The
//! graph is cheap to throw away and rebuild whenever the ledger may have moved.
//!
//! ## Ordering
//!
//! Nodes are visited in topological order. Among nodes that are ready at the
//! same time, the one listed first by the ledger wins, then the smaller
//! partition index, so the order is deterministic for a given ledger listing.

use mdbc_core::ledger::{AppliedMark, LedgerRow, TxDigestId};
use mdbc_core::types::{MriReference, Range};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use tracing::warn;

/// Index of a node in the graph arena
pub type NodeId = usize;

/// One ledger row plus its per-range replay cursors
#[derive(Debug, Clone)]
pub struct DagNode {
    row: LedgerRow,
    /// Position in the ledger listing the graph was built from
    position: usize,
    /// Target range -> index of the next digest not yet handed out
    cursors: BTreeMap<Range, usize>,
}

impl DagNode {
    fn new(row: LedgerRow, position: usize, targets: &[Range]) -> Self {
        let cursors = row
            .ranges
            .iter()
            .filter(|r| targets.iter().any(|t| t.overlaps(r)))
            .map(|r| (r.clone(), 0))
            .collect();
        Self {
            row,
            position,
            cursors,
        }
    }

    /// The ledger row behind this node
    pub fn row(&self) -> &LedgerRow {
        &self.row
    }

    fn pending<'a>(&'a self, ranges: &'a [Range]) -> impl Iterator<Item = (&'a Range, usize)> + 'a {
        let len = self.row.digests.len();
        self.cursors
            .iter()
            .filter(move |(r, _)| ranges.iter().any(|t| t.overlaps(r)))
            .filter(move |(_, next)| **next < len)
            .map(|(r, next)| (r, *next))
    }

    /// True if some range in `ranges` still has digests to replay here
    pub fn has_pending(&self, ranges: &[Range]) -> bool {
        self.pending(ranges).next().is_some()
    }

    /// Next digest not yet applied for any of `ranges`, with the ranges it affects
    ///
    /// Returns the lowest pending digest index over the requested ranges and
    /// advances the cursor of every range that was waiting on it. Ranges whose
    /// cursor is already past that index are not included. Returns None when
    /// the node is exhausted for all requested ranges.
    pub fn next_not_applied_transaction(
        &mut self,
        ranges: &[Range],
    ) -> Option<(TxDigestId, Vec<Range>)> {
        let index = self.pending(ranges).map(|(_, next)| next).min()?;
        let affected: Vec<Range> = self
            .pending(ranges)
            .filter(|(_, next)| *next == index)
            .map(|(r, _)| r.clone())
            .collect();
        for range in &affected {
            self.cursors.insert(range.clone(), index + 1);
        }
        Some((self.row.digests[index], affected))
    }

    fn mark_applied_through(&mut self, range: &Range, index: usize) {
        if let Some(next) = self.cursors.get_mut(range) {
            *next = (*next).max(index.saturating_add(1));
        }
    }

    fn mark_exhausted(&mut self, range: &Range) {
        let len = self.row.digests.len();
        if let Some(next) = self.cursors.get_mut(range) {
            *next = (*next).max(len);
        }
    }
}

/// Dependency graph over the ledger rows relevant to a set of ranges
#[derive(Debug, Clone, Default)]
pub struct Dag {
    nodes: Vec<DagNode>,
    predecessors: Vec<Vec<NodeId>>,
    successors: Vec<Vec<NodeId>>,
    /// Topological visiting order
    order: Vec<NodeId>,
    by_mri: HashMap<MriReference, NodeId>,
    ranges: Vec<Range>,
}

impl Dag {
    /// Build the graph for `ranges` from a ledger listing
    ///
    /// Rows whose snapshot overlaps none of `ranges` are ignored. A row is
    /// linked after each of its predecessors that is part of the graph and
    /// shares a range with it.
    pub fn build(rows: &[LedgerRow], ranges: &[Range]) -> Self {
        let mut dag = Dag {
            ranges: ranges.to_vec(),
            ..Dag::default()
        };

        for (position, row) in rows.iter().enumerate() {
            if !row.overlaps_any(ranges) {
                continue;
            }
            let id = dag.nodes.len();
            dag.by_mri.insert(row.partition_index, id);
            dag.nodes.push(DagNode::new(row.clone(), position, ranges));
        }
        dag.predecessors = vec![Vec::new(); dag.nodes.len()];
        dag.successors = vec![Vec::new(); dag.nodes.len()];

        for id in 0..dag.nodes.len() {
            for pred_mri in dag.nodes[id].row.predecessors.clone() {
                let Some(&pred) = dag.by_mri.get(&pred_mri) else {
                    continue;
                };
                let shares_range = dag.nodes[id]
                    .row
                    .ranges
                    .iter()
                    .any(|r| dag.nodes[pred].row.covers(r));
                if pred != id && shares_range && !dag.predecessors[id].contains(&pred) {
                    dag.predecessors[id].push(pred);
                    dag.successors[pred].push(id);
                }
            }
        }

        dag.order = dag.topological_order();
        dag
    }

    fn sort_key(&self, id: NodeId) -> (usize, MriReference) {
        (self.nodes[id].position, self.nodes[id].row.partition_index)
    }

    fn topological_order(&self) -> Vec<NodeId> {
        let mut indegree: Vec<usize> = self.predecessors.iter().map(Vec::len).collect();
        let mut ready: BTreeSet<((usize, MriReference), NodeId)> = (0..self.nodes.len())
            .filter(|id| indegree[*id] == 0)
            .map(|id| (self.sort_key(id), id))
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some((_, id)) = ready.pop_first() {
            order.push(id);
            for &succ in &self.successors[id] {
                indegree[succ] -= 1;
                if indegree[succ] == 0 {
                    ready.insert((self.sort_key(succ), succ));
                }
            }
        }

        if order.len() < self.nodes.len() {
            let mut rest: Vec<NodeId> = (0..self.nodes.len())
                .filter(|id| !order.contains(id))
                .collect();
            warn!(
                target: "mdbc::dag",
                rows = rest.len(),
                "Ledger rows form a predecessor cycle, replaying them in ledger order"
            );
            rest.sort_by_key(|id| self.sort_key(*id));
            order.extend(rest);
        }
        order
    }

    /// Seed replay cursors from low-water-marks
    ///
    /// For each range in `ranges` with a mark `(row, index)`, digests up to
    /// `index` on `row`, and every digest on the rows it descends from, are
    /// skipped. Marks pointing at rows outside the graph are ignored.
    pub fn set_already_applied(
        &mut self,
        already_applied: &BTreeMap<Range, AppliedMark>,
        ranges: &[Range],
    ) {
        for range in ranges {
            let Some(mark) = already_applied.get(range) else {
                continue;
            };
            let Some(&start) = self.by_mri.get(&mark.mri) else {
                warn!(
                    target: "mdbc::dag",
                    range = %range,
                    row = %mark.mri,
                    "Applied mark points at a row outside the replay graph"
                );
                continue;
            };
            self.nodes[start].mark_applied_through(range, mark.index);

            let mut queue: VecDeque<NodeId> = self.predecessors[start].iter().copied().collect();
            let mut seen: BTreeSet<NodeId> = BTreeSet::from([start]);
            while let Some(id) = queue.pop_front() {
                if !seen.insert(id) {
                    continue;
                }
                self.nodes[id].mark_exhausted(range);
                queue.extend(self.predecessors[id].iter().copied());
            }
        }
    }

    /// Earliest node with digests still to replay for `ranges`
    pub fn next_to_apply(&self, ranges: &[Range]) -> Option<NodeId> {
        self.order
            .iter()
            .copied()
            .find(|id| self.nodes[*id].has_pending(ranges))
    }

    /// True once no node has digests left for the ranges the graph was built for
    pub fn applied(&self) -> bool {
        self.next_to_apply(&self.ranges).is_none()
    }

    /// Node by id
    pub fn node(&self, id: NodeId) -> &DagNode {
        &self.nodes[id]
    }

    /// Mutable node by id
    pub fn node_mut(&mut self, id: NodeId) -> &mut DagNode {
        &mut self.nodes[id]
    }

    /// Node for a ledger row, if the row is part of the graph
    pub fn node_for(&self, mri: &MriReference) -> Option<NodeId> {
        self.by_mri.get(mri).copied()
    }

    /// Nodes in visiting order
    pub fn nodes(&self) -> impl Iterator<Item = &DagNode> {
        self.order.iter().map(move |id| &self.nodes[*id])
    }

    /// Ranges the graph was built for
    pub fn ranges(&self) -> &[Range] {
        &self.ranges
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True if no ledger row overlapped the target ranges
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
