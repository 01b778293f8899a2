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

use metrics::counter;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use tracing::{debug, warn};

use crate::error::{TraceError, TraceResult};
use crate::event::{ClassId, FieldHolder, FieldId, ObjectId, SequenceNo, ThreadId, TraceEvent};
use crate::recorder::lib::EventRecorder;
use crate::recorder::queue::EventQueue;
use crate::recorder::sequencer::Sequencer;

/// Lifecycle of a recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecorderState {
    Open = 0,
    /// Sequence space exhausted; no further events are accepted.
    Overflowed = 1,
    Closed = 2,
}

impl RecorderState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => RecorderState::Open,
            1 => RecorderState::Overflowed,
            _ => RecorderState::Closed,
        }
    }
}

/// In-process event sink shared by every instrumented thread.
///
/// The hot path is one sequence increment plus one short queue push.
/// `in_flight` lets `close` wait for producers that already passed the state
/// check, so nothing is appended after the final drain.
#[derive(Debug)]
pub struct Recorder {
    sequencer: Sequencer,
    queue: Arc<EventQueue>,
    state: AtomicU8,
    in_flight: AtomicUsize,
}

impl Recorder {
    pub fn new(queue: Arc<EventQueue>, sequence_limit: u64) -> Self {
        Self {
            sequencer: Sequencer::new(sequence_limit),
            queue,
            state: AtomicU8::new(RecorderState::Open as u8),
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn state(&self) -> RecorderState {
        RecorderState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    pub fn last_issued(&self) -> Option<SequenceNo> {
        self.sequencer.last_issued()
    }

    /// Stops accepting events and waits until no producer is mid-append.
    /// Returns `false` if the recorder was already closed.
    pub fn close(&self) -> bool {
        let previous = self.state.swap(RecorderState::Closed as u8, Ordering::SeqCst);
        while self.in_flight.load(Ordering::SeqCst) != 0 {
            std::thread::yield_now();
        }
        RecorderState::from_u8(previous) != RecorderState::Closed
    }

    fn record(&self, make_event: impl FnOnce(SequenceNo) -> TraceEvent) -> TraceResult<SequenceNo> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let result = self.record_in_flight(make_event);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn record_in_flight(&self, make_event: impl FnOnce(SequenceNo) -> TraceEvent) -> TraceResult<SequenceNo> {
        match self.state() {
            RecorderState::Open => {}
            RecorderState::Overflowed => return Err(TraceError::TraceOverflow { limit: self.sequencer.limit() }),
            RecorderState::Closed => return Err(TraceError::SessionClosed),
        }

        let sequence_no = match self.sequencer.next() {
            Ok(seq) => seq,
            Err(err) => {
                // Only the first producer to observe exhaustion reports it
                if self
                    .state
                    .compare_exchange(RecorderState::Open as u8, RecorderState::Overflowed as u8, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    warn!("Sequence space exhausted at limit {}; recording stopped", self.sequencer.limit());
                    counter!("heaptrace_trace_overflow", 1);
                }
                return Err(err);
            }
        };

        if let Some(dropped) = self.queue.push(make_event(sequence_no)) {
            debug!("Event queue full; dropped oldest event {}", dropped);
            counter!("heaptrace_events_dropped", 1);
        }

        Ok(sequence_no)
    }
}

impl EventRecorder for Recorder {
    fn record_array_write(&self, container_id: ObjectId, index: u32, value_id: ObjectId, thread_id: ThreadId) -> TraceResult<SequenceNo> {
        self.record(|sequence_no| TraceEvent::ArrayWrite {
            container_id,
            index,
            value_id,
            thread_id,
            sequence_no,
        })
    }

    fn record_field_write(&self, holder: FieldHolder, field_id: FieldId, value_id: ObjectId, thread_id: ThreadId) -> TraceResult<SequenceNo> {
        self.record(|sequence_no| TraceEvent::FieldWrite {
            holder,
            field_id,
            value_id,
            thread_id,
            sequence_no,
        })
    }

    fn record_class_init_start(&self, class_id: ClassId, thread_id: ThreadId) -> TraceResult<SequenceNo> {
        self.record(|sequence_no| TraceEvent::ClassInitStart { class_id, thread_id, sequence_no })
    }

    fn record_class_init_end(&self, class_id: ClassId, thread_id: ThreadId) -> TraceResult<SequenceNo> {
        self.record(|sequence_no| TraceEvent::ClassInitEnd { class_id, thread_id, sequence_no })
    }

    fn record_thread_start(&self, parent_thread_id: ThreadId, new_thread_id: ThreadId) -> TraceResult<SequenceNo> {
        self.record(|sequence_no| TraceEvent::ThreadStart {
            parent_thread_id,
            new_thread_id,
            sequence_no,
        })
    }
}
