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

//! C entry points for native instrumentation.
//!
//! Each hook forwards to the installed session and returns the assigned
//! sequence number, or 0 when nothing was recorded (no session installed,
//! session closed, or sequence space exhausted). Identity functions return
//! 0 when no session is installed.

use std::ffi::{CStr, c_char};

use crate::agent;
use crate::event::{ClassId, FieldHolder, FieldId, ObjectId, SequenceNo, ThreadId};
use crate::recorder::EventRecorder;

fn forward(record: impl FnOnce(&agent::AgentHooks) -> Option<SequenceNo>) -> u64 {
    agent::hooks().and_then(|hooks| record(&hooks)).map_or(0, |seq| seq.0)
}

#[unsafe(no_mangle)]
pub extern "C" fn heaptrace_on_array_write(container_id: u64, index: u32, value_id: u64, thread_id: u64) -> u64 {
    forward(|hooks| {
        hooks.report(
            hooks
                .recorder()
                .record_array_write(ObjectId(container_id), index, ObjectId(value_id), ThreadId(thread_id)),
        )
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn heaptrace_on_static_field_write(class_id: u64, field_id: u64, value_id: u64, thread_id: u64) -> u64 {
    field_write(FieldHolder::Class(ClassId(class_id)), field_id, value_id, thread_id)
}

#[unsafe(no_mangle)]
pub extern "C" fn heaptrace_on_instance_field_write(object_id: u64, field_id: u64, value_id: u64, thread_id: u64) -> u64 {
    field_write(FieldHolder::Object(ObjectId(object_id)), field_id, value_id, thread_id)
}

fn field_write(holder: FieldHolder, field_id: u64, value_id: u64, thread_id: u64) -> u64 {
    forward(|hooks| {
        hooks.report(
            hooks
                .recorder()
                .record_field_write(holder, FieldId(field_id), ObjectId(value_id), ThreadId(thread_id)),
        )
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn heaptrace_on_class_init_start(class_id: u64, thread_id: u64) -> u64 {
    forward(|hooks| hooks.report(hooks.recorder().record_class_init_start(ClassId(class_id), ThreadId(thread_id))))
}

#[unsafe(no_mangle)]
pub extern "C" fn heaptrace_on_class_init_end(class_id: u64, thread_id: u64) -> u64 {
    forward(|hooks| hooks.report(hooks.recorder().record_class_init_end(ClassId(class_id), ThreadId(thread_id))))
}

#[unsafe(no_mangle)]
pub extern "C" fn heaptrace_on_thread_start(parent_thread_id: u64, new_thread_id: u64) -> u64 {
    forward(|hooks| hooks.report(hooks.recorder().record_thread_start(ThreadId(parent_thread_id), ThreadId(new_thread_id))))
}

/// Stable id for the object at `address`.
#[unsafe(no_mangle)]
pub extern "C" fn heaptrace_identify_object(address: usize) -> u64 {
    agent::current().map_or(0, |session| session.identities().object_at(address).0)
}

/// Forgets the object at `address`; returns the id it had, or 0.
#[unsafe(no_mangle)]
pub extern "C" fn heaptrace_object_freed(address: usize) -> u64 {
    agent::current().and_then(|session| session.identities().release_object_at(address)).map_or(0, |id| id.0)
}

#[unsafe(no_mangle)]
pub extern "C" fn heaptrace_identify_current_thread() -> u64 {
    agent::current().map_or(0, |session| session.identities().current_thread().0)
}

/// Stable id for the class named by the NUL-terminated UTF-8 string `name`.
/// Returns 0 for a null or non-UTF-8 name.
///
/// # Safety
///
/// `name` must be null or point to a valid NUL-terminated string that stays
/// alive for the duration of the call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn heaptrace_identify_class(name: *const c_char) -> u64 {
    if name.is_null() {
        return 0;
    }
    // SAFETY: non-null and valid per the caller contract
    let Ok(name) = unsafe { CStr::from_ptr(name) }.to_str() else {
        return 0;
    };
    agent::current().map_or(0, |session| session.identities().class(name).0)
}

/// Stable id for the field `name` declared by `class_id`. Returns 0 for a
/// null or non-UTF-8 name.
///
/// # Safety
///
/// Same contract as [`heaptrace_identify_class`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn heaptrace_identify_field(class_id: u64, name: *const c_char) -> u64 {
    if name.is_null() {
        return 0;
    }
    // SAFETY: non-null and valid per the caller contract
    let Ok(name) = unsafe { CStr::from_ptr(name) }.to_str() else {
        return 0;
    };
    agent::current().map_or(0, |session| session.identities().field(ClassId(class_id), name).0)
}
