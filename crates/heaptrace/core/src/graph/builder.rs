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

//! Single-consumer graph construction.
//!
//! Producers claim sequence numbers and push into the queue independently,
//! so the queue order is only roughly the sequence order. The builder holds
//! early arrivals in a pending buffer and applies events strictly in sequence
//! order. A number is skipped, and recorded as a gap, when the queue reports
//! it dropped, when the buffer outgrows the reorder window while waiting for
//! it, or when the session finishes with it still missing.
//!
//! Answers derived from a graph with gaps are possibly incomplete; the query
//! layer reports that alongside the answer.

use metrics::counter;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::event::{SequenceNo, TraceEvent};
use crate::graph::causal_graph::CausalGraph;
use crate::graph::gap::SequenceGap;
use crate::recorder::EventQueue;

pub struct GraphBuilder {
    graph: Arc<RwLock<CausalGraph>>,
    pending: BTreeMap<SequenceNo, TraceEvent>,
    dropped: BTreeSet<SequenceNo>,
    next_expected: SequenceNo,
    reorder_window: usize,
    event_buf: Vec<TraceEvent>,
    dropped_buf: Vec<SequenceNo>,
}

impl GraphBuilder {
    pub fn new(graph: Arc<RwLock<CausalGraph>>, reorder_window: usize) -> Self {
        Self {
            graph,
            pending: BTreeMap::new(),
            dropped: BTreeSet::new(),
            next_expected: SequenceNo::FIRST,
            reorder_window: reorder_window.max(1),
            event_buf: Vec::new(),
            dropped_buf: Vec::new(),
        }
    }

    pub fn graph(&self) -> &Arc<RwLock<CausalGraph>> {
        &self.graph
    }

    /// Events received but not yet applicable.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drains `queue` and applies whatever is contiguous. Returns the number
    /// of events applied.
    pub fn pump(&mut self, queue: &EventQueue) -> usize {
        self.pull(queue);
        self.advance(false, true)
    }

    /// Like [`GraphBuilder::pump`], but never waits for the graph: while a
    /// reader holds it, drained events stay pending for the next call.
    pub fn try_pump(&mut self, queue: &EventQueue) -> usize {
        self.pull(queue);
        self.advance(false, false)
    }

    /// Drains `queue` and applies everything pending, marking any remaining
    /// holes as gaps. Used when no producer can still deliver.
    pub fn finish(&mut self, queue: &EventQueue) -> usize {
        self.pull(queue);
        self.advance(true, true)
    }

    /// Feeds events that did not come through a queue, e.g. a persisted log.
    pub fn ingest(&mut self, events: impl IntoIterator<Item = TraceEvent>, dropped: impl IntoIterator<Item = SequenceNo>) -> usize {
        self.accept(events, dropped);
        self.advance(false, true)
    }

    pub fn flush(&mut self) -> usize {
        self.advance(true, true)
    }

    fn pull(&mut self, queue: &EventQueue) {
        let mut events = std::mem::take(&mut self.event_buf);
        let mut dropped = std::mem::take(&mut self.dropped_buf);
        queue.drain_into(&mut events, &mut dropped);
        self.accept(events.drain(..), dropped.drain(..));
        self.event_buf = events;
        self.dropped_buf = dropped;
    }

    fn accept(&mut self, events: impl IntoIterator<Item = TraceEvent>, dropped: impl IntoIterator<Item = SequenceNo>) {
        for event in events {
            let seq = event.sequence_no();
            if seq < self.next_expected {
                warn!("Discarding late event {} (next expected {})", seq, self.next_expected);
                continue;
            }
            if self.pending.insert(seq, event).is_some() {
                warn!("Duplicate event {} replaced in pending buffer", seq);
            }
        }
        for seq in dropped {
            if seq >= self.next_expected {
                self.dropped.insert(seq);
            }
        }
    }

    /// Smallest sequence number the builder has heard of, applied or dropped.
    fn next_known(&self) -> Option<SequenceNo> {
        let pending = self.pending.keys().next().copied();
        let dropped = self.dropped.first().copied();
        match (pending, dropped) {
            (Some(p), Some(d)) => Some(p.min(d)),
            (p, d) => p.or(d),
        }
    }

    fn has_work(&self, force: bool) -> bool {
        let expected = self.next_expected;
        self.pending.contains_key(&expected)
            || self.dropped.contains(&expected)
            || self.pending.len() > self.reorder_window
            || (force && self.next_known().is_some())
    }

    fn advance(&mut self, force: bool, wait: bool) -> usize {
        if !self.has_work(force) {
            return 0;
        }

        // One write lock per batch: readers see either none or all of it
        let lock = Arc::clone(&self.graph);
        let mut graph = if wait {
            lock.write()
        } else {
            match lock.try_write() {
                Some(graph) => graph,
                None => {
                    debug!("Graph busy; leaving {} events pending", self.pending.len());
                    return 0;
                }
            }
        };

        let mut applied = 0usize;
        let mut missing = 0u64;
        loop {
            let expected = self.next_expected;
            if let Some(event) = self.pending.remove(&expected) {
                if graph.apply(event) {
                    applied += 1;
                }
            } else if self.dropped.remove(&expected) {
                graph.mark_gap(SequenceGap::single(expected));
                missing += 1;
            } else if let Some(first) = self.next_known() {
                if !force && self.pending.len() <= self.reorder_window {
                    break;
                }
                if !force {
                    warn!("Reorder window of {} exceeded; giving up on {}", self.reorder_window, expected);
                }
                // Skip straight to the first known number as one gap
                let gap = SequenceGap::new(expected, SequenceNo(first.0 - 1));
                graph.mark_gap(gap);
                missing = missing.saturating_add(gap.len());
                self.next_expected = first;
                continue;
            } else {
                break;
            }

            match expected.next() {
                Some(next) => self.next_expected = next,
                None => break,
            }
        }
        drop(graph);

        if missing > 0 {
            warn!("Sequence log has {} newly missing events; affected causal chains are possibly incomplete", missing);
            counter!("heaptrace_sequence_gaps", missing);
        }
        counter!("heaptrace_events_applied", applied as u64);
        debug!("Applied {} events ({} still pending)", applied, self.pending.len());
        applied
    }
}

impl std::fmt::Debug for GraphBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphBuilder")
            .field("pending", &self.pending.len())
            .field("dropped", &self.dropped.len())
            .field("next_expected", &self.next_expected)
            .field("reorder_window", &self.reorder_window)
            .finish()
    }
}

/// Rebuilds a graph from a persisted, possibly unordered log. Holes in the
/// sequence become gaps.
pub fn replay(events: impl IntoIterator<Item = TraceEvent>) -> CausalGraph {
    let graph = Arc::new(RwLock::new(CausalGraph::new()));
    let mut builder = GraphBuilder::new(Arc::clone(&graph), usize::MAX);
    builder.ingest(events, std::iter::empty());
    builder.flush();
    drop(builder);

    match Arc::try_unwrap(graph) {
        Ok(lock) => lock.into_inner(),
        // The builder was the only other owner and is gone
        Err(shared) => std::mem::take(&mut *shared.write()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ClassId, ThreadId};

    fn init(seq: u64) -> TraceEvent {
        TraceEvent::ClassInitStart {
            class_id: ClassId(seq),
            thread_id: ThreadId(0),
            sequence_no: SequenceNo(seq),
        }
    }

    fn builder(window: usize) -> (Arc<RwLock<CausalGraph>>, GraphBuilder) {
        let graph = Arc::new(RwLock::new(CausalGraph::new()));
        let builder = GraphBuilder::new(Arc::clone(&graph), window);
        (graph, builder)
    }

    fn applied(graph: &Arc<RwLock<CausalGraph>>) -> Vec<u64> {
        graph.read().log().iter().map(|e| e.sequence_no().0).collect()
    }

    #[test]
    fn test_out_of_order_arrivals_apply_in_sequence() {
        let (graph, mut builder) = builder(16);
        assert_eq!(builder.ingest([init(2), init(3)], []), 0);
        assert_eq!(builder.pending_len(), 2);
        assert_eq!(builder.ingest([init(1)], []), 3);
        assert_eq!(applied(&graph), vec![1, 2, 3]);
        assert!(graph.read().gaps().is_empty());
    }

    #[test]
    fn test_dropped_numbers_become_gaps() {
        let (graph, mut builder) = builder(16);
        builder.ingest([init(1), init(3)], [SequenceNo(2)]);
        assert_eq!(applied(&graph), vec![1, 3]);
        assert_eq!(graph.read().gaps(), &[SequenceGap::single(SequenceNo(2))]);
    }

    #[test]
    fn test_reorder_window_gives_up_on_missing() {
        let (graph, mut builder) = builder(2);
        builder.ingest([init(2), init(3)], []);
        assert!(applied(&graph).is_empty());
        builder.ingest([init(4)], []);
        assert_eq!(applied(&graph), vec![2, 3, 4]);
        assert_eq!(graph.read().gaps(), &[SequenceGap::single(SequenceNo(1))]);

        // The missing event showing up late is discarded
        builder.ingest([init(1)], []);
        assert_eq!(applied(&graph), vec![2, 3, 4]);
    }

    #[test]
    fn test_flush_applies_across_holes() {
        let (graph, mut builder) = builder(16);
        builder.ingest([init(1), init(4)], []);
        assert_eq!(applied(&graph), vec![1]);
        assert_eq!(builder.flush(), 1);
        assert_eq!(applied(&graph), vec![1, 4]);
        assert_eq!(graph.read().gaps(), &[SequenceGap::new(SequenceNo(2), SequenceNo(3))]);
    }

    #[test]
    fn test_pump_from_queue() {
        let (graph, mut builder) = builder(16);
        let queue = EventQueue::with_capacity(2);
        queue.push(init(1));
        queue.push(init(2));
        queue.push(init(3));

        builder.pump(&queue);
        assert_eq!(applied(&graph), vec![2, 3]);
        assert_eq!(graph.read().gaps(), &[SequenceGap::single(SequenceNo(1))]);
    }

    #[test]
    fn test_try_pump_leaves_events_pending_while_graph_is_read() {
        let (graph, mut builder) = builder(16);
        let queue = EventQueue::with_capacity(8);
        queue.push(init(1));
        queue.push(init(2));

        {
            let _reader = graph.read();
            assert_eq!(builder.try_pump(&queue), 0);
        }
        assert_eq!(builder.pending_len(), 2);
        assert!(queue.is_empty());

        assert_eq!(builder.try_pump(&queue), 2);
        assert_eq!(applied(&graph), vec![1, 2]);
    }

    #[test]
    fn test_wide_hole_is_one_gap() {
        let (graph, mut builder) = builder(16);
        builder.ingest([init(1), init(5_000_000)], []);
        assert_eq!(builder.flush(), 1);
        assert_eq!(graph.read().gaps(), &[SequenceGap::new(SequenceNo(2), SequenceNo(4_999_999))]);

        // Dropped numbers next to a skipped range extend it
        builder.ingest([init(5_000_003)], [SequenceNo(5_000_001), SequenceNo(5_000_002)]);
        assert_eq!(applied(&graph), vec![1, 5_000_000, 5_000_003]);
        assert_eq!(graph.read().gaps().len(), 2);
        assert_eq!(graph.read().stats().gaps, 4_999_998 + 2);
    }

    #[test]
    fn test_replay_sorts_and_dedups() {
        let graph = replay([init(3), init(1), init(2), init(2)]);
        assert_eq!(graph.log().iter().map(|e| e.sequence_no().0).collect::<Vec<_>>(), vec![1, 2, 3]);
    }
}
