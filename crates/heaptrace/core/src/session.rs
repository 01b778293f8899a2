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

//! One trace session: recorder, queue, builder and graph wired together.

use metrics::gauge;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{DrainMode, TraceConfig};
use crate::error::TraceResult;
use crate::event::{ClassId, FieldHolder, FieldId, ObjectId, SequenceNo, ThreadId};
use crate::graph::{CausalGraph, GraphBuilder, GraphStats};
use crate::identity::HostIdentities;
use crate::persistence::save_log;
use crate::query::CausalityQuery;
use crate::recorder::{EventQueue, EventRecorder, Recorder, RecorderState};

struct DrainWorker {
    handle: JoinHandle<()>,
    stop: Arc<AtomicBool>,
}

impl DrainWorker {
    fn spawn(queue: Arc<EventQueue>, builder: Arc<Mutex<GraphBuilder>>, interval: Duration) -> TraceResult<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let handle = thread::Builder::new().name("heaptrace-drain".to_string()).spawn(move || {
            debug!("Drain thread started");
            while !stop_flag.load(Ordering::Acquire) {
                builder.lock().pump(&queue);
                thread::park_timeout(interval);
            }
            debug!("Drain thread stopped");
        })?;

        Ok(Self { handle, stop })
    }

    fn waker(&self) -> thread::Thread {
        self.handle.thread().clone()
    }

    fn stop(self) {
        self.stop.store(true, Ordering::Release);
        self.handle.thread().unpark();
        if self.handle.join().is_err() {
            warn!("Drain thread panicked; remaining events are drained on close");
        }
    }
}

/// A running trace.
///
/// Producers record through the [`EventRecorder`] impl and never wait on
/// graph construction. Queries see whatever prefix of the sequence order has
/// been applied so far; after [`TraceSession::close`] that is everything
/// that was not dropped.
pub struct TraceSession {
    config: TraceConfig,
    identities: HostIdentities,
    recorder: Recorder,
    graph: Arc<RwLock<CausalGraph>>,
    builder: Arc<Mutex<GraphBuilder>>,
    drain: Mutex<Option<DrainWorker>>,
    waker: Option<thread::Thread>,
    wake_threshold: usize,
    // Held for the whole of close, so concurrent closers wait for the first
    closed: Mutex<bool>,
}

impl TraceSession {
    pub fn start(config: TraceConfig) -> TraceResult<Arc<Self>> {
        config.validate()?;

        let queue = Arc::new(EventQueue::with_capacity(config.queue_capacity));
        let recorder = Recorder::new(Arc::clone(&queue), config.sequence_limit);
        let graph = Arc::new(RwLock::new(CausalGraph::new()));
        let builder = Arc::new(Mutex::new(GraphBuilder::new(Arc::clone(&graph), config.reorder_window)));

        let drain = match config.drain_mode {
            DrainMode::Background => Some(DrainWorker::spawn(Arc::clone(&queue), Arc::clone(&builder), config.drain_interval)?),
            DrainMode::Inline => None,
        };
        let waker = drain.as_ref().map(DrainWorker::waker);

        info!(
            "Trace session started (queue capacity {}, drain mode {:?}, sequence limit {})",
            config.queue_capacity, config.drain_mode, config.sequence_limit
        );

        Ok(Arc::new(Self {
            wake_threshold: (config.queue_capacity / 2).max(1),
            config,
            identities: HostIdentities::new(),
            recorder,
            graph,
            builder,
            drain: Mutex::new(drain),
            waker,
            closed: Mutex::new(false),
        }))
    }

    pub fn config(&self) -> &TraceConfig {
        &self.config
    }

    /// Host handle to id mapping shared by every hook of this session.
    pub fn identities(&self) -> &HostIdentities {
        &self.identities
    }

    pub fn recorder_state(&self) -> RecorderState {
        self.recorder.state()
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        self.recorder.queue()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock()
    }

    pub fn query(&self) -> CausalityQuery {
        CausalityQuery::new(Arc::clone(&self.graph))
    }

    pub fn stats(&self) -> GraphStats {
        self.graph.read().stats()
    }

    /// Drains the queue on the calling thread. Returns the number of events
    /// applied.
    pub fn pump(&self) -> usize {
        self.builder.lock().pump(self.recorder.queue())
    }

    /// Stops recording, applies everything still queued and writes the log
    /// if a path is configured. Later calls return the final stats without
    /// doing anything else.
    pub fn close(&self) -> TraceResult<GraphStats> {
        let mut closed = self.closed.lock();
        if *closed {
            return Ok(self.stats());
        }

        self.recorder.close();
        if let Some(worker) = self.drain.lock().take() {
            worker.stop();
        }
        let applied = self.builder.lock().finish(self.recorder.queue());
        *closed = true;
        debug!("Applied {} events while closing", applied);

        if let (Some(path), Some(format)) = (self.config.persist_path.as_deref(), self.config.effective_log_format()) {
            let graph = self.graph.read();
            save_log(path, graph.log(), format)?;
        }

        let stats = self.stats();
        gauge!("heaptrace_graph_nodes", stats.nodes() as f64);
        info!(
            "Trace session closed: {} nodes, {} edges, {} events applied, {} missing",
            stats.nodes(),
            stats.edges,
            stats.events_applied,
            stats.gaps
        );
        Ok(stats)
    }

    fn after_record(&self, result: TraceResult<SequenceNo>) -> TraceResult<SequenceNo> {
        if result.is_ok() {
            match &self.waker {
                Some(waker) => {
                    if self.recorder.queue().approx_len() >= self.wake_threshold {
                        waker.unpark();
                    }
                }
                // Never wait on another drainer or on a reader of the graph
                None => {
                    if let Some(mut builder) = self.builder.try_lock() {
                        builder.try_pump(self.recorder.queue());
                    }
                }
            }
        }
        result
    }
}

impl EventRecorder for TraceSession {
    fn record_array_write(&self, container_id: ObjectId, index: u32, value_id: ObjectId, thread_id: ThreadId) -> TraceResult<SequenceNo> {
        self.after_record(self.recorder.record_array_write(container_id, index, value_id, thread_id))
    }

    fn record_field_write(&self, holder: FieldHolder, field_id: FieldId, value_id: ObjectId, thread_id: ThreadId) -> TraceResult<SequenceNo> {
        self.after_record(self.recorder.record_field_write(holder, field_id, value_id, thread_id))
    }

    fn record_class_init_start(&self, class_id: ClassId, thread_id: ThreadId) -> TraceResult<SequenceNo> {
        self.after_record(self.recorder.record_class_init_start(class_id, thread_id))
    }

    fn record_class_init_end(&self, class_id: ClassId, thread_id: ThreadId) -> TraceResult<SequenceNo> {
        self.after_record(self.recorder.record_class_init_end(class_id, thread_id))
    }

    fn record_thread_start(&self, parent_thread_id: ThreadId, new_thread_id: ThreadId) -> TraceResult<SequenceNo> {
        self.after_record(self.recorder.record_thread_start(parent_thread_id, new_thread_id))
    }
}

impl Drop for TraceSession {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!("Trace session close on drop failed: {}", err);
        }
    }
}

impl std::fmt::Debug for TraceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceSession")
            .field("drain_mode", &self.config.drain_mode)
            .field("state", &self.recorder.state())
            .field("last_issued", &self.recorder.last_issued())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TraceError;
    use crate::event::{NodeId, TraceEvent};
    use std::sync::mpsc;

    fn inline() -> TraceConfig {
        TraceConfig::default().with_drain_mode(DrainMode::Inline)
    }

    #[test]
    fn test_inline_session_applies_as_it_records() {
        let session = TraceSession::start(inline()).unwrap();
        session.record_class_init_start(ClassId(1), ThreadId(0)).unwrap();
        session.record_array_write(ObjectId(10), 0, ObjectId(11), ThreadId(0)).unwrap();

        assert_eq!(session.stats().events_applied, 2);
        let chain = session.query().explain(NodeId::Object(ObjectId(11))).unwrap().chain;
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn test_inline_recording_does_not_wait_for_queries() {
        let session = TraceSession::start(inline()).unwrap();
        session.record_class_init_start(ClassId(1), ThreadId(0)).unwrap();

        session.query().with_graph(|graph| {
            assert_eq!(graph.log().len(), 1);
            let (tx, rx) = mpsc::channel();
            let producer = Arc::clone(&session);
            let handle = thread::spawn(move || {
                let result = producer.record_array_write(ObjectId(10), 0, ObjectId(11), ThreadId(1));
                tx.send(result.is_ok()).unwrap();
            });
            assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(true));
            handle.join().unwrap();
            // Still the snapshot taken when the read began
            assert_eq!(graph.log().len(), 1);
        });

        assert_eq!(session.builder.lock().pending_len(), 1);
        assert_eq!(session.pump(), 1);
        assert_eq!(session.stats().events_applied, 2);
    }

    #[test]
    fn test_background_session_drains_by_close() {
        let session = TraceSession::start(TraceConfig::default().with_drain_interval(Duration::from_millis(1))).unwrap();
        for i in 0..100 {
            session.record_array_write(ObjectId(1), i, ObjectId(100 + u64::from(i)), ThreadId(0)).unwrap();
        }

        let stats = session.close().unwrap();
        assert_eq!(stats.events_applied, 100);
        assert_eq!(stats.gaps, 0);
        assert!(session.is_closed());
    }

    #[test]
    fn test_close_is_idempotent_and_rejects_events() {
        let session = TraceSession::start(inline()).unwrap();
        session.record_thread_start(ThreadId(0), ThreadId(1)).unwrap();

        let first = session.close().unwrap();
        let second = session.close().unwrap();
        assert_eq!(first, second);
        assert!(matches!(session.record_thread_start(ThreadId(0), ThreadId(2)), Err(TraceError::SessionClosed)));
        assert_eq!(session.recorder_state(), RecorderState::Closed);
    }

    #[test]
    fn test_overflow_stops_recording_but_keeps_graph() {
        let session = TraceSession::start(inline().with_sequence_limit(2)).unwrap();
        session.record_class_init_start(ClassId(1), ThreadId(0)).unwrap();
        session.record_class_init_end(ClassId(1), ThreadId(0)).unwrap();

        assert!(matches!(session.record_class_init_start(ClassId(2), ThreadId(0)), Err(TraceError::TraceOverflow { limit: 2 })));
        assert_eq!(session.recorder_state(), RecorderState::Overflowed);
        assert_eq!(session.close().unwrap().events_applied, 2);
        assert_eq!(session.query().with_graph(|g| g.log().last().map(TraceEvent::sequence_no)), Some(SequenceNo(2)));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        assert!(matches!(TraceSession::start(inline().with_queue_capacity(0)), Err(TraceError::InvalidConfig(_))));
    }
}
