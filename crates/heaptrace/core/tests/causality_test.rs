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

use heaptrace_core::graph::{GraphBuilder, replay};
use heaptrace_core::persistence::load_graph;
use heaptrace_core::recorder::EventQueue;
use heaptrace_core::{
    CausalGraph, CausalityQuery, ClassId, Completeness, DrainMode, EventRecorder, FieldHolder, FieldId, NodeId, ObjectId, Recorder, SequenceGap, SequenceNo,
    ThreadId, TraceConfig, TraceError, TraceEvent, TraceHooks, TraceSession,
};
use parking_lot::RwLock;
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

const T0: ThreadId = ThreadId(0);

fn inline_session() -> Arc<TraceSession> {
    TraceSession::start(TraceConfig::default().with_drain_mode(DrainMode::Inline)).unwrap()
}

/// Class X's initializer, running on T0, stores M into F[0].
#[test]
fn test_static_initializer_makes_object_reachable() {
    let x = ClassId(1);
    let f = ObjectId(10);
    let m = ObjectId(20);

    let session = inline_session();
    let start = session.record_class_init_start(x, T0).unwrap();
    let write = session.record_array_write(f, 0, m, T0).unwrap();
    assert!(start < write);

    let explanation = session.query().explain(NodeId::Object(m)).unwrap();
    assert_eq!(explanation.completeness, Completeness::Complete);

    let hops: Vec<(NodeId, NodeId)> = explanation.chain.iter().map(|e| (e.source, e.target)).collect();
    assert_eq!(hops, vec![(NodeId::Thread(T0), NodeId::Class(x)), (NodeId::Object(f), NodeId::Object(m))]);
    assert_eq!(explanation.chain[0].sequence_no(), start);
    assert_eq!(explanation.chain[1].sequence_no(), write);
    assert_eq!(explanation.chain[1].cause, NodeId::Class(x));

    assert_eq!(session.query().responsible_class(m), Some(x));
}

#[test]
fn test_concurrent_producers_get_a_total_order() {
    const THREADS: u64 = 8;
    const PER_THREAD: u32 = 500;

    let session = TraceSession::start(TraceConfig::default().with_queue_capacity(1 << 16).with_drain_interval(Duration::from_millis(1))).unwrap();

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let session = Arc::clone(&session);
            thread::spawn(move || {
                let mut issued = Vec::with_capacity(PER_THREAD as usize);
                for i in 0..PER_THREAD {
                    issued.push(session.record_array_write(ObjectId(t), i, ObjectId(1_000 * (t + 1) + u64::from(i)), ThreadId(t)).unwrap());
                }
                issued
            })
        })
        .collect();

    let mut all = HashSet::new();
    for handle in handles {
        let issued = handle.join().unwrap();
        // Program order on one thread is sequence order
        assert!(issued.windows(2).all(|w| w[0] < w[1]));
        for seq in issued {
            assert!(all.insert(seq), "sequence number {} issued twice", seq);
        }
    }

    let stats = session.close().unwrap();
    let total = THREADS * u64::from(PER_THREAD);
    assert_eq!(stats.events_applied as u64, total);
    assert_eq!(stats.gaps, 0);

    session.query().with_graph(|graph| {
        let seqs: Vec<u64> = graph.log().iter().map(|e| e.sequence_no().0).collect();
        assert_eq!(seqs, (1..=total).collect::<Vec<_>>());
    });
}

#[test]
fn test_overwrites_keep_full_history() {
    let f = ObjectId(10);
    let (v1, v2) = (ObjectId(1), ObjectId(2));

    let session = inline_session();
    session.record_array_write(f, 0, v1, T0).unwrap();
    session.record_array_write(f, 0, v2, T0).unwrap();

    let query = session.query();
    let writers: Vec<ObjectId> = query
        .all_writers(f, 0)
        .into_iter()
        .map(|event| match event {
            TraceEvent::ArrayWrite { value_id, .. } => value_id,
            other => panic!("unexpected event {other}"),
        })
        .collect();
    assert_eq!(writers, vec![v1, v2]);

    // The overwritten value stays explained
    assert_eq!(query.explain(NodeId::Object(v1)).unwrap().chain.len(), 1);
}

#[test]
fn test_unknown_node_and_root() {
    let session = inline_session();
    session.record_thread_start(T0, ThreadId(1)).unwrap();

    let query = session.query();
    assert!(query.explain(NodeId::Thread(T0)).unwrap().is_root());
    assert!(matches!(query.explain(NodeId::Object(ObjectId(5))), Err(TraceError::NodeNotFound(_))));
    assert_eq!(query.explain(NodeId::Thread(ThreadId(1))).unwrap().chain.len(), 1);
}

#[test]
fn test_dropped_events_surface_as_gaps() {
    let queue = Arc::new(EventQueue::with_capacity(4));
    let recorder = Recorder::new(Arc::clone(&queue), u64::MAX);
    for i in 0..10u32 {
        recorder.record_array_write(ObjectId(1), i, ObjectId(100 + u64::from(i)), T0).unwrap();
    }
    assert_eq!(queue.stats().dropped_count.load(std::sync::atomic::Ordering::Relaxed), 6);

    let graph = Arc::new(RwLock::new(CausalGraph::new()));
    let mut builder = GraphBuilder::new(Arc::clone(&graph), 16);
    recorder.close();
    builder.finish(&queue);

    let query = CausalityQuery::new(graph);
    assert_eq!(query.stats().gaps, 6);
    assert_eq!(query.stats().gap_ranges, 1);
    assert_eq!(query.stats().events_applied, 4);

    let explanation = query.explain(NodeId::Object(ObjectId(108))).unwrap();
    assert_eq!(explanation.chain.len(), 1);
    assert_eq!(
        explanation.completeness,
        Completeness::PossiblyIncomplete {
            gaps: vec![SequenceGap::new(SequenceNo(1), SequenceNo(6))]
        }
    );
    assert!(matches!(explanation.into_result(), Err(TraceError::IncompleteChain { .. })));
    assert!(matches!(query.explain(NodeId::Object(ObjectId(100))), Err(TraceError::NodeNotFound(_))));
}

#[test]
fn test_static_field_written_by_initializer() {
    let x = ClassId(1);
    let instance = FieldId(1);
    let m = ObjectId(20);

    let session = inline_session();
    session.record_class_init_start(x, T0).unwrap();
    let write = session.record_field_write(FieldHolder::Class(x), instance, m, T0).unwrap();
    session.record_class_init_end(x, T0).unwrap();

    let query = session.query();
    let explanation = query.explain(NodeId::Object(m)).unwrap();
    assert!(explanation.is_complete());
    assert_eq!(explanation.chain.last().map(|e| (e.source, e.sequence_no())), Some((NodeId::Class(x), write)));
    assert_eq!(query.class_responsible_for_static_field_write(x, instance, m), Some(x));
    assert_eq!(query.all_field_writers(FieldHolder::Class(x), instance).len(), 1);
}

#[test]
fn test_sparse_log_replays_without_expanding_gaps() {
    let start = |seq: u64| TraceEvent::ClassInitStart {
        class_id: ClassId(seq),
        thread_id: T0,
        sequence_no: SequenceNo(seq),
    };
    let graph = replay([start(1), start(20_000_000)]);

    assert_eq!(graph.gaps(), &[SequenceGap::new(SequenceNo(2), SequenceNo(19_999_999))]);
    assert_eq!(graph.stats().gaps, 19_999_998);
    assert_eq!(graph.log().len(), 2);
}

#[test]
fn test_overflow_fails_open_through_hooks() {
    let session = TraceSession::start(TraceConfig::default().with_drain_mode(DrainMode::Inline).with_sequence_limit(3)).unwrap();
    let hooks = TraceHooks::new(Arc::clone(&session));

    hooks.on_class_init_start(ClassId(1), T0);
    for i in 0..10 {
        hooks.on_array_write(ObjectId(1), i, ObjectId(2), T0);
    }
    hooks.on_class_init_end(ClassId(1), T0);

    let stats = session.close().unwrap();
    assert_eq!(stats.events_applied, 3);
    assert_eq!(session.query().responsible_class(ObjectId(2)), Some(ClassId(1)));
}

#[test]
fn test_closed_log_replays_to_same_answers() {
    let dir = TempDir::new().unwrap();
    for name in ["trace.jsonl", "trace.bin"] {
        let path = dir.path().join(name);
        let session = TraceSession::start(TraceConfig::default().with_persist_path(&path)).unwrap();

        session.record_thread_start(T0, ThreadId(1)).unwrap();
        session.record_class_init_start(ClassId(7), ThreadId(1)).unwrap();
        session.record_array_write(ObjectId(1), 3, ObjectId(2), ThreadId(1)).unwrap();
        session.record_class_init_end(ClassId(7), ThreadId(1)).unwrap();
        session.close().unwrap();

        let replayed = CausalityQuery::from_graph(load_graph(&path).unwrap());
        let live = session.query();
        for node in [NodeId::Object(ObjectId(2)), NodeId::Class(ClassId(7)), NodeId::Thread(ThreadId(1))] {
            assert_eq!(replayed.explain(node).unwrap(), live.explain(node).unwrap());
        }
        assert_eq!(replayed.stats(), live.stats());
        assert_eq!(replayed.explain(NodeId::Object(ObjectId(2))).unwrap().chain.len(), 3);
    }
}

fn arb_events() -> impl Strategy<Value = Vec<TraceEvent>> {
    prop::collection::vec((0u8..5, 0u64..4, 0u32..3, 0u64..6, 0u64..3), 0..64).prop_map(|ops| {
        ops.into_iter()
            .enumerate()
            .map(|(i, (kind, a, index, b, thread))| {
                let sequence_no = SequenceNo(i as u64 + 1);
                let thread_id = ThreadId(thread);
                match kind {
                    0 => TraceEvent::ArrayWrite {
                        container_id: ObjectId(a),
                        index,
                        value_id: ObjectId(b),
                        thread_id,
                        sequence_no,
                    },
                    1 => TraceEvent::ClassInitStart {
                        class_id: ClassId(a),
                        thread_id,
                        sequence_no,
                    },
                    2 => TraceEvent::ClassInitEnd {
                        class_id: ClassId(a),
                        thread_id,
                        sequence_no,
                    },
                    3 => TraceEvent::FieldWrite {
                        holder: if index == 0 { FieldHolder::Class(ClassId(a)) } else { FieldHolder::Object(ObjectId(a)) },
                        field_id: FieldId(u64::from(index)),
                        value_id: ObjectId(b),
                        thread_id,
                        sequence_no,
                    },
                    _ => TraceEvent::ThreadStart {
                        parent_thread_id: thread_id,
                        new_thread_id: ThreadId(a + 3),
                        sequence_no,
                    },
                }
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn prop_graph_only_grows(events in arb_events(), cut in 0usize..64) {
        let cut = cut.min(events.len());
        let prefix = replay(events[..cut].iter().copied());
        let full = replay(events.iter().copied());

        prop_assert_eq!(&full.edges()[..prefix.edges().len()], prefix.edges());
        for node in prefix.nodes() {
            prop_assert_eq!(full.node(&node.id), Some(node));
        }
    }

    #[test]
    fn prop_delivery_order_does_not_matter(
        (events, shuffled) in arb_events().prop_flat_map(|events| (Just(events.clone()), Just(events).prop_shuffle()))
    ) {
        let ordered = replay(events.iter().copied());
        let reordered = replay(shuffled);

        prop_assert_eq!(ordered.edges(), reordered.edges());
        prop_assert!(reordered.gaps().is_empty());

        let ordered = CausalityQuery::from_graph(ordered);
        let reordered = CausalityQuery::from_graph(reordered);
        for node in ordered.with_graph(|g| g.nodes().map(|n| n.id).collect::<Vec<_>>()) {
            prop_assert_eq!(ordered.explain(node).unwrap(), reordered.explain(node).unwrap());
        }
    }
}
