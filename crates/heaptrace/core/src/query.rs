// Heaptrace
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Read-only query interface used by the reachability analysis.
//!
//! Every call holds the graph's read lock for its whole duration, so it sees
//! one consistent prefix of the sequence order even while the builder keeps
//! appending.

use parking_lot::RwLock;
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;

use crate::error::{TraceError, TraceResult};
use crate::event::{ClassId, FieldHolder, FieldId, NodeId, ObjectId, SequenceNo, TraceEvent};
use crate::graph::{CausalEdge, CausalGraph, CausalNode, GraphStats, SequenceGap};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Completeness {
    Complete,
    /// The log has gaps at or before the end of the chain; a dropped event
    /// could have supplied a shorter or different explanation.
    PossiblyIncomplete { gaps: Vec<SequenceGap> },
}

/// Answer to [`CausalityQuery::explain`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Explanation {
    pub target: NodeId,
    /// Edges from a root to `target`, in causal order. Empty when `target`
    /// is itself a root.
    pub chain: Vec<CausalEdge>,
    pub completeness: Completeness,
}

impl Explanation {
    pub fn is_complete(&self) -> bool {
        self.completeness == Completeness::Complete
    }

    /// `target` needs no explanation: it is a root.
    pub fn is_root(&self) -> bool {
        self.chain.is_empty() && self.is_complete()
    }

    /// Strict form: a possibly incomplete answer becomes `IncompleteChain`.
    pub fn into_result(self) -> TraceResult<Vec<CausalEdge>> {
        match self.completeness {
            Completeness::Complete => Ok(self.chain),
            Completeness::PossiblyIncomplete { gaps } => Err(TraceError::IncompleteChain { chain: self.chain, gaps }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct ChainCost {
    edges: usize,
    seq_sum: u128,
    last_seq: u64,
}

impl ChainCost {
    const ROOT: ChainCost = ChainCost { edges: 0, seq_sum: 0, last_seq: 0 };

    fn extend(self, seq: SequenceNo) -> ChainCost {
        ChainCost {
            edges: self.edges + 1,
            seq_sum: self.seq_sum + u128::from(seq.0),
            last_seq: seq.0,
        }
    }
}

/// Cheap, cloneable handle onto a session's graph.
#[derive(Debug, Clone)]
pub struct CausalityQuery {
    graph: Arc<RwLock<CausalGraph>>,
}

impl CausalityQuery {
    pub fn new(graph: Arc<RwLock<CausalGraph>>) -> Self {
        Self { graph }
    }

    /// Query handle over a finished graph, e.g. one replayed from disk.
    pub fn from_graph(graph: CausalGraph) -> Self {
        Self::new(Arc::new(RwLock::new(graph)))
    }

    /// Runs `f` against one consistent snapshot of the graph.
    pub fn with_graph<R>(&self, f: impl FnOnce(&CausalGraph) -> R) -> R {
        f(&self.graph.read())
    }

    /// Shortest causal chain from any root to `node`.
    ///
    /// Chains follow causes: an edge extends the chain of the node that
    /// caused it. Fewest edges wins, then the smallest sum of sequence
    /// numbers, then the earliest final edge.
    ///
    /// The first edge's source need not be a root: chains follow causes, not
    /// containers. A root thread writing into an object seen nowhere else
    /// yields a one-edge chain starting at that object.
    pub fn explain(&self, node: NodeId) -> TraceResult<Explanation> {
        let graph = self.graph.read();
        let Some(target) = graph.node(&node).copied() else {
            return Err(TraceError::NodeNotFound(node));
        };

        let Some(chain) = shortest_chain(&graph, node) else {
            // Observed but not anchored at any root
            return Ok(Explanation {
                target: node,
                chain: Vec::new(),
                completeness: Completeness::PossiblyIncomplete { gaps: graph.gaps().to_vec() },
            });
        };

        let horizon = chain.last().map(CausalEdge::sequence_no).unwrap_or(target.first_seen);
        let gaps: Vec<SequenceGap> = graph.gaps().iter().map_while(|gap| gap.clipped_to(horizon)).collect();
        let completeness = if gaps.is_empty() {
            Completeness::Complete
        } else {
            Completeness::PossiblyIncomplete { gaps }
        };

        Ok(Explanation {
            target: node,
            chain,
            completeness,
        })
    }

    /// Every write into `container[index]`, oldest first. Overwrites are not
    /// collapsed.
    pub fn all_writers(&self, container_id: ObjectId, index: u32) -> Vec<TraceEvent> {
        self.graph.read().slot_history(container_id, index).map(|edge| edge.event).collect()
    }

    /// Class whose initializer first stored `object` anywhere.
    pub fn responsible_class(&self, object: ObjectId) -> Option<ClassId> {
        let graph = self.graph.read();
        graph.incoming(&NodeId::Object(object)).min_by_key(|edge| edge.sequence_no()).and_then(|edge| edge.cause.as_class())
    }

    /// Class whose initializer performed the latest write of `value` into
    /// `container[index]`.
    pub fn class_responsible_for_array_write(&self, container_id: ObjectId, index: u32, value: ObjectId) -> Option<ClassId> {
        let graph = self.graph.read();
        graph
            .slot_history(container_id, index)
            .rev()
            .find(|edge| edge.target == NodeId::Object(value))
            .and_then(|edge| edge.cause.as_class())
    }

    /// Every write into `holder.field`, oldest first.
    pub fn all_field_writers(&self, holder: FieldHolder, field_id: FieldId) -> Vec<TraceEvent> {
        self.graph.read().field_history(holder, field_id).map(|edge| edge.event).collect()
    }

    /// Class whose initializer performed the latest store of `value` into the
    /// static field `field_id` of `class_id`.
    pub fn class_responsible_for_static_field_write(&self, class_id: ClassId, field_id: FieldId, value: ObjectId) -> Option<ClassId> {
        self.latest_field_write_cause(FieldHolder::Class(class_id), field_id, value)
    }

    /// Class whose initializer performed the latest store of `value` into the
    /// instance field `field_id` of `object`.
    pub fn class_responsible_for_nonstatic_field_write(&self, object: ObjectId, field_id: FieldId, value: ObjectId) -> Option<ClassId> {
        self.latest_field_write_cause(FieldHolder::Object(object), field_id, value)
    }

    fn latest_field_write_cause(&self, holder: FieldHolder, field_id: FieldId, value: ObjectId) -> Option<ClassId> {
        let graph = self.graph.read();
        graph
            .field_history(holder, field_id)
            .rev()
            .find(|edge| edge.target == NodeId::Object(value))
            .and_then(|edge| edge.cause.as_class())
    }

    /// Initializer that was running when `class_id` started initializing.
    pub fn class_responsible_for_class_init(&self, class_id: ClassId) -> Option<ClassId> {
        self.graph.read().clinit_cause(class_id)
    }

    pub fn node(&self, id: NodeId) -> Option<CausalNode> {
        self.graph.read().node(&id).copied()
    }

    pub fn roots(&self) -> Vec<NodeId> {
        self.graph.read().roots().collect()
    }

    pub fn stats(&self) -> GraphStats {
        self.graph.read().stats()
    }

    pub fn to_dot(&self) -> String {
        self.graph.read().to_dot()
    }
}

/// Dijkstra over the cause relation, seeded with every root. `None` when
/// `target` cannot be reached from any root.
fn shortest_chain(graph: &CausalGraph, target: NodeId) -> Option<Vec<CausalEdge>> {
    let mut best: HashMap<NodeId, (ChainCost, Option<usize>)> = HashMap::new();
    let mut settled: HashSet<NodeId> = HashSet::new();
    let mut heap = BinaryHeap::new();

    for root in graph.roots() {
        best.insert(root, (ChainCost::ROOT, None));
        heap.push(Reverse((ChainCost::ROOT, root)));
    }

    while let Some(Reverse((cost, node))) = heap.pop() {
        if !settled.insert(node) {
            continue;
        }
        if node == target {
            break;
        }

        for &index in graph.caused_by(&node) {
            let Some(edge) = graph.edge(index) else { continue };
            if settled.contains(&edge.target) {
                continue;
            }
            let candidate = cost.extend(edge.sequence_no());
            if best.get(&edge.target).is_none_or(|(current, _)| candidate < *current) {
                best.insert(edge.target, (candidate, Some(index)));
                heap.push(Reverse((candidate, edge.target)));
            }
        }
    }

    if !settled.contains(&target) {
        return None;
    }

    let mut chain = Vec::new();
    let mut cursor = target;
    while let Some((_, Some(index))) = best.get(&cursor) {
        let edge = graph.edge(*index)?;
        chain.push(*edge);
        cursor = edge.cause;
    }
    chain.reverse();
    Some(chain)
}
