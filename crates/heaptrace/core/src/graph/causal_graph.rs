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

//! Append-only causality multigraph of one trace session.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

use crate::event::{ClassId, FieldHolder, FieldId, NodeId, NodeKind, ObjectId, SequenceNo, ThreadId, TraceEvent};
use crate::graph::edge::CausalEdge;
use crate::graph::gap::{SequenceGap, missing_count};
use crate::graph::node::CausalNode;

/// Summary counters of a graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    pub objects: usize,
    pub classes: usize,
    pub threads: usize,
    pub edges: usize,
    pub events_applied: usize,
    /// Sequence numbers known to be missing
    pub gaps: u64,
    /// Contiguous runs those numbers form
    pub gap_ranges: usize,
    pub last_applied: Option<SequenceNo>,
}

impl GraphStats {
    pub fn nodes(&self) -> usize {
        self.objects + self.classes + self.threads
    }
}

/// Nodes, edges and the ordered event log of one session.
///
/// Only [`crate::graph::GraphBuilder`] mutates a graph, and only by
/// appending: nodes and edges are never removed or rewritten. Repeated writes
/// into the same slot stay distinct edges.
#[derive(Debug, Default)]
pub struct CausalGraph {
    nodes: BTreeMap<NodeId, CausalNode>,
    edges: Vec<CausalEdge>,
    incoming: HashMap<NodeId, Vec<usize>>,
    caused: HashMap<NodeId, Vec<usize>>,
    slots: HashMap<(ObjectId, u32), Vec<usize>>,
    fields: HashMap<(FieldHolder, FieldId), Vec<usize>>,
    log: Vec<TraceEvent>,
    // Sorted, disjoint and non-adjacent
    gaps: Vec<SequenceGap>,
    last_applied: Option<SequenceNo>,
    // Running class initializers per thread, innermost last
    clinit_stacks: HashMap<ThreadId, Vec<ClassId>>,
    clinit_causes: HashMap<ClassId, ClassId>,
}

impl CausalGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one event. Events must arrive in strictly increasing sequence
    /// order; anything at or below the last applied number is ignored and
    /// reported as `false`.
    pub fn apply(&mut self, event: TraceEvent) -> bool {
        let seq = event.sequence_no();
        if self.last_applied.is_some_and(|last| seq <= last) {
            warn!("Ignoring event {} at or below last applied {:?}", seq, self.last_applied);
            return false;
        }

        match event {
            TraceEvent::ArrayWrite {
                container_id,
                index,
                value_id,
                thread_id,
                ..
            } => {
                let source = self.touch(NodeId::Object(container_id), seq);
                let target = self.touch(NodeId::Object(value_id), seq);
                self.touch(NodeId::Thread(thread_id), seq);
                let cause = self.current_cause(thread_id);
                let edge = self.push_edge(CausalEdge { source, target, cause, event });
                self.slots.entry((container_id, index)).or_default().push(edge);
            }
            TraceEvent::FieldWrite {
                holder,
                field_id,
                value_id,
                thread_id,
                ..
            } => {
                let source = self.touch(holder.into(), seq);
                let target = self.touch(NodeId::Object(value_id), seq);
                self.touch(NodeId::Thread(thread_id), seq);
                let cause = self.current_cause(thread_id);
                let edge = self.push_edge(CausalEdge { source, target, cause, event });
                self.fields.entry((holder, field_id)).or_default().push(edge);
            }
            TraceEvent::ClassInitStart { class_id, thread_id, .. } => {
                let source = self.touch(NodeId::Thread(thread_id), seq);
                let target = self.touch(NodeId::Class(class_id), seq);
                let cause = self.current_cause(thread_id);
                if let NodeId::Class(outer) = cause {
                    self.clinit_causes.entry(class_id).or_insert(outer);
                }
                self.push_edge(CausalEdge { source, target, cause, event });
                self.clinit_stacks.entry(thread_id).or_default().push(class_id);
            }
            TraceEvent::ClassInitEnd { class_id, thread_id, .. } => {
                self.touch(NodeId::Thread(thread_id), seq);
                self.touch(NodeId::Class(class_id), seq);
                self.pop_clinit(thread_id, class_id);
            }
            TraceEvent::ThreadStart {
                parent_thread_id,
                new_thread_id,
                ..
            } => {
                let source = self.touch(NodeId::Thread(parent_thread_id), seq);
                let target = self.touch(NodeId::Thread(new_thread_id), seq);
                let cause = self.current_cause(parent_thread_id);
                self.push_edge(CausalEdge { source, target, cause, event });
            }
        }

        self.log.push(event);
        self.last_applied = Some(seq);
        true
    }

    /// Records that every number in `gap` will never be applied. Overlapping
    /// and adjacent ranges are merged.
    pub fn mark_gap(&mut self, gap: SequenceGap) {
        let mut pos = self.gaps.partition_point(|g| g.first < gap.first);
        self.gaps.insert(pos, gap);
        if pos > 0 && self.gaps[pos - 1].touches(&self.gaps[pos]) {
            pos -= 1;
        }
        while pos + 1 < self.gaps.len() && self.gaps[pos].touches(&self.gaps[pos + 1]) {
            let next = self.gaps.remove(pos + 1);
            self.gaps[pos].last = self.gaps[pos].last.max(next.last);
        }
    }

    fn touch(&mut self, id: NodeId, seq: SequenceNo) -> NodeId {
        self.nodes.entry(id).or_insert_with(|| CausalNode::new(id, seq));
        id
    }

    fn push_edge(&mut self, edge: CausalEdge) -> usize {
        let index = self.edges.len();
        self.incoming.entry(edge.target).or_default().push(index);
        self.caused.entry(edge.cause).or_default().push(index);
        self.edges.push(edge);
        index
    }

    fn current_cause(&self, thread_id: ThreadId) -> NodeId {
        self.clinit_stacks
            .get(&thread_id)
            .and_then(|stack| stack.last())
            .map(|class_id| NodeId::Class(*class_id))
            .unwrap_or(NodeId::Thread(thread_id))
    }

    fn pop_clinit(&mut self, thread_id: ThreadId, class_id: ClassId) {
        let Some(stack) = self.clinit_stacks.get_mut(&thread_id) else {
            debug!("Initializer end for class:{} on thread:{} without a start", class_id.0, thread_id.0);
            return;
        };

        // An initializer unwinding by exception may skip the ends of the
        // initializers it triggered; drop those along with it.
        match stack.iter().rposition(|running| *running == class_id) {
            Some(pos) => {
                if pos + 1 != stack.len() {
                    warn!("Initializer end for class:{} on thread:{} closes {} nested initializers", class_id.0, thread_id.0, stack.len() - pos - 1);
                }
                stack.truncate(pos);
            }
            None => debug!("Initializer end for class:{} on thread:{} without a start", class_id.0, thread_id.0),
        }
    }

    pub fn node(&self, id: &NodeId) -> Option<&CausalNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Nodes in identity order.
    pub fn nodes(&self) -> impl Iterator<Item = &CausalNode> {
        self.nodes.values()
    }

    /// Edges in sequence order.
    pub fn edges(&self) -> &[CausalEdge] {
        &self.edges
    }

    pub fn edge(&self, index: usize) -> Option<&CausalEdge> {
        self.edges.get(index)
    }

    /// A root has no incoming edge: an entry thread or a static root.
    pub fn is_root(&self, id: &NodeId) -> bool {
        self.contains(id) && !self.incoming.contains_key(id)
    }

    pub fn roots(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied().filter(|id| !self.incoming.contains_key(id))
    }

    pub fn incoming(&self, id: &NodeId) -> impl Iterator<Item = &CausalEdge> {
        self.incoming.get(id).into_iter().flatten().map(|&i| &self.edges[i])
    }

    /// Edge indices whose cause is `id`, in sequence order.
    pub fn caused_by(&self, id: &NodeId) -> &[usize] {
        self.caused.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Write edges into one array slot, in sequence order.
    pub fn slot_history(&self, container_id: ObjectId, index: u32) -> impl DoubleEndedIterator<Item = &CausalEdge> {
        self.slots.get(&(container_id, index)).into_iter().flatten().map(|&i| &self.edges[i])
    }

    /// Write edges into one field, in sequence order.
    pub fn field_history(&self, holder: FieldHolder, field_id: FieldId) -> impl DoubleEndedIterator<Item = &CausalEdge> {
        self.fields.get(&(holder, field_id)).into_iter().flatten().map(|&i| &self.edges[i])
    }

    /// The initializer that was running when `class_id` started initializing.
    pub fn clinit_cause(&self, class_id: ClassId) -> Option<ClassId> {
        self.clinit_causes.get(&class_id).copied()
    }

    /// Applied events in sequence order.
    pub fn log(&self) -> &[TraceEvent] {
        &self.log
    }

    /// Missing sequence ranges in ascending order.
    pub fn gaps(&self) -> &[SequenceGap] {
        &self.gaps
    }

    pub fn last_applied(&self) -> Option<SequenceNo> {
        self.last_applied
    }

    pub fn stats(&self) -> GraphStats {
        let mut stats = GraphStats {
            edges: self.edges.len(),
            events_applied: self.log.len(),
            gaps: missing_count(&self.gaps),
            gap_ranges: self.gaps.len(),
            last_applied: self.last_applied,
            ..GraphStats::default()
        };
        for node in self.nodes.values() {
            match node.kind() {
                NodeKind::Object => stats.objects += 1,
                NodeKind::Class => stats.classes += 1,
                NodeKind::Thread => stats.threads += 1,
            }
        }
        stats
    }

    /// Graphviz DOT rendering. Edge labels carry the sequence number.
    pub fn to_dot(&self) -> String {
        let mut dot = String::from("digraph causality {\n");
        for node in self.nodes.values() {
            let shape = match node.kind() {
                NodeKind::Object => "box",
                NodeKind::Class => "ellipse",
                NodeKind::Thread => "diamond",
            };
            dot.push_str(&format!("  \"{}\" [shape={}];\n", node.id, shape));
        }
        for edge in &self.edges {
            let label = match edge.event {
                TraceEvent::ArrayWrite { index, .. } => format!("[{index}] {}", edge.sequence_no()),
                TraceEvent::FieldWrite { field_id, .. } => format!(".field:{} {}", field_id.0, edge.sequence_no()),
                _ => edge.sequence_no().to_string(),
            };
            dot.push_str(&format!("  \"{}\" -> \"{}\" [label=\"{}\"];\n", edge.source, edge.target, label));
        }
        dot.push_str("}\n");
        dot
    }
}
