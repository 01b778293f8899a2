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

//! Host-facing instrumentation hooks.
//!
//! Hooks are called from instrumented host code and must never fail it: every
//! tracing error is logged and swallowed here.

use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

use crate::error::{TraceError, TraceResult};
use crate::event::{ClassId, FieldHolder, FieldId, ObjectId, SequenceNo, ThreadId};
use crate::recorder::EventRecorder;

pub struct TraceHooks<R: EventRecorder> {
    recorder: R,
    overflow_reported: AtomicBool,
}

impl<R: EventRecorder> TraceHooks<R> {
    pub fn new(recorder: R) -> Self {
        Self {
            recorder,
            overflow_reported: AtomicBool::new(false),
        }
    }

    pub fn recorder(&self) -> &R {
        &self.recorder
    }

    pub fn on_array_write(&self, container_id: ObjectId, index: u32, value_id: ObjectId, thread_id: ThreadId) {
        self.report(self.recorder.record_array_write(container_id, index, value_id, thread_id));
    }

    pub fn on_field_write(&self, holder: FieldHolder, field_id: FieldId, value_id: ObjectId, thread_id: ThreadId) {
        self.report(self.recorder.record_field_write(holder, field_id, value_id, thread_id));
    }

    pub fn on_class_init_start(&self, class_id: ClassId, thread_id: ThreadId) {
        self.report(self.recorder.record_class_init_start(class_id, thread_id));
    }

    pub fn on_class_init_end(&self, class_id: ClassId, thread_id: ThreadId) {
        self.report(self.recorder.record_class_init_end(class_id, thread_id));
    }

    pub fn on_thread_start(&self, parent_thread_id: ThreadId, new_thread_id: ThreadId) {
        self.report(self.recorder.record_thread_start(parent_thread_id, new_thread_id));
    }

    /// Logs a failed record and turns the result into the assigned sequence
    /// number, if any.
    pub fn report(&self, result: TraceResult<SequenceNo>) -> Option<SequenceNo> {
        match result {
            Ok(seq) => Some(seq),
            Err(TraceError::SessionClosed) => {
                debug!("Event after trace session close dropped");
                None
            }
            Err(err @ TraceError::TraceOverflow { .. }) => {
                if !self.overflow_reported.swap(true, Ordering::Relaxed) {
                    warn!("{}; further events are dropped", err);
                }
                None
            }
            Err(err) => {
                warn!("Failed to record event: {}", err);
                None
            }
        }
    }
}

impl<R: EventRecorder + std::fmt::Debug> std::fmt::Debug for TraceHooks<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceHooks").field("recorder", &self.recorder).finish()
    }
}

/// Instrumented `slots[index] = value`: the write is reported before the
/// store happens. Returns the previous value, or `None` without recording
/// anything when `index` is out of bounds.
pub fn traced_array_store<T, R: EventRecorder>(
    hooks: &TraceHooks<R>,
    slots: &mut [T],
    index: u32,
    value: T,
    container_id: ObjectId,
    value_id: ObjectId,
    thread_id: ThreadId,
) -> Option<T> {
    let slot = slots.get_mut(index as usize)?;
    hooks.on_array_write(container_id, index, value_id, thread_id);
    Some(std::mem::replace(slot, value))
}

/// Instrumented `holder.field = value`, reported before the store. Returns
/// the previous value.
pub fn traced_field_store<T, R: EventRecorder>(
    hooks: &TraceHooks<R>,
    slot: &mut T,
    value: T,
    holder: FieldHolder,
    field_id: FieldId,
    value_id: ObjectId,
    thread_id: ThreadId,
) -> T {
    hooks.on_field_write(holder, field_id, value_id, thread_id);
    std::mem::replace(slot, value)
}
