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

use std::sync::Arc;

use crate::error::TraceResult;
use crate::event::{ClassId, FieldHolder, FieldId, ObjectId, SequenceNo, ThreadId};

/// One method per traced program point.
///
/// Each call assigns the event its global sequence number and returns it
/// without waiting for graph construction. Callers on the instrumented side
/// go through [`crate::hooks::TraceHooks`], which never lets an error reach
/// the host program.
pub trait EventRecorder: Send + Sync {
    /// Reported just before `container[index] = value` is performed.
    fn record_array_write(&self, container_id: ObjectId, index: u32, value_id: ObjectId, thread_id: ThreadId) -> TraceResult<SequenceNo>;

    /// Reported just before `holder.field = value` is performed. Static
    /// fields pass their declaring class as holder.
    fn record_field_write(&self, holder: FieldHolder, field_id: FieldId, value_id: ObjectId, thread_id: ThreadId) -> TraceResult<SequenceNo>;

    /// Reported on entry to a class initializer, before any of its body runs.
    fn record_class_init_start(&self, class_id: ClassId, thread_id: ThreadId) -> TraceResult<SequenceNo>;

    /// Reported when a class initializer returns or unwinds.
    fn record_class_init_end(&self, class_id: ClassId, thread_id: ThreadId) -> TraceResult<SequenceNo>;

    /// Reported before `new_thread_id` runs any user code.
    fn record_thread_start(&self, parent_thread_id: ThreadId, new_thread_id: ThreadId) -> TraceResult<SequenceNo>;
}

impl<R: EventRecorder + ?Sized> EventRecorder for Arc<R> {
    fn record_array_write(&self, container_id: ObjectId, index: u32, value_id: ObjectId, thread_id: ThreadId) -> TraceResult<SequenceNo> {
        (**self).record_array_write(container_id, index, value_id, thread_id)
    }

    fn record_field_write(&self, holder: FieldHolder, field_id: FieldId, value_id: ObjectId, thread_id: ThreadId) -> TraceResult<SequenceNo> {
        (**self).record_field_write(holder, field_id, value_id, thread_id)
    }

    fn record_class_init_start(&self, class_id: ClassId, thread_id: ThreadId) -> TraceResult<SequenceNo> {
        (**self).record_class_init_start(class_id, thread_id)
    }

    fn record_class_init_end(&self, class_id: ClassId, thread_id: ThreadId) -> TraceResult<SequenceNo> {
        (**self).record_class_init_end(class_id, thread_id)
    }

    fn record_thread_start(&self, parent_thread_id: ThreadId, new_thread_id: ThreadId) -> TraceResult<SequenceNo> {
        (**self).record_thread_start(parent_thread_id, new_thread_id)
    }
}
