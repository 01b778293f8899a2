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

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{ClassId, FieldHolder, FieldId, ObjectId, SequenceNo, ThreadId};

/// Discriminant of a [`TraceEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    ArrayWrite,
    FieldWrite,
    ClassInitStart,
    ClassInitEnd,
    ThreadStart,
}

/// A traced program point.
///
/// Events are immutable once recorded. Equality covers every field including
/// `sequence_no`, so an event doubles as an idempotent replay key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TraceEvent {
    /// `container[index] = value`, reported just before the store happens.
    ArrayWrite {
        container_id: ObjectId,
        index: u32,
        value_id: ObjectId,
        thread_id: ThreadId,
        sequence_no: SequenceNo,
    },
    /// `holder.field = value`, reported just before the store happens. A
    /// static field is held by its declaring class.
    FieldWrite {
        holder: FieldHolder,
        field_id: FieldId,
        value_id: ObjectId,
        thread_id: ThreadId,
        sequence_no: SequenceNo,
    },
    /// A class initializer is about to run its body.
    ClassInitStart { class_id: ClassId, thread_id: ThreadId, sequence_no: SequenceNo },
    /// A class initializer returned (normally or by exception).
    ClassInitEnd { class_id: ClassId, thread_id: ThreadId, sequence_no: SequenceNo },
    /// `parent` is about to start `new_thread`.
    ThreadStart {
        parent_thread_id: ThreadId,
        new_thread_id: ThreadId,
        sequence_no: SequenceNo,
    },
}

impl TraceEvent {
    pub fn sequence_no(&self) -> SequenceNo {
        match self {
            TraceEvent::ArrayWrite { sequence_no, .. }
            | TraceEvent::FieldWrite { sequence_no, .. }
            | TraceEvent::ClassInitStart { sequence_no, .. }
            | TraceEvent::ClassInitEnd { sequence_no, .. }
            | TraceEvent::ThreadStart { sequence_no, .. } => *sequence_no,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            TraceEvent::ArrayWrite { .. } => EventKind::ArrayWrite,
            TraceEvent::FieldWrite { .. } => EventKind::FieldWrite,
            TraceEvent::ClassInitStart { .. } => EventKind::ClassInitStart,
            TraceEvent::ClassInitEnd { .. } => EventKind::ClassInitEnd,
            TraceEvent::ThreadStart { .. } => EventKind::ThreadStart,
        }
    }

    /// The thread on which the traced program point executed.
    pub fn acting_thread(&self) -> ThreadId {
        match self {
            TraceEvent::ArrayWrite { thread_id, .. }
            | TraceEvent::FieldWrite { thread_id, .. }
            | TraceEvent::ClassInitStart { thread_id, .. }
            | TraceEvent::ClassInitEnd { thread_id, .. } => *thread_id,
            TraceEvent::ThreadStart { parent_thread_id, .. } => *parent_thread_id,
        }
    }
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceEvent::ArrayWrite {
                container_id,
                index,
                value_id,
                thread_id,
                sequence_no,
            } => write!(f, "{sequence_no} thread:{}: object:{}[{index}] = object:{}", thread_id.0, container_id.0, value_id.0),
            TraceEvent::FieldWrite {
                holder,
                field_id,
                value_id,
                thread_id,
                sequence_no,
            } => write!(f, "{sequence_no} thread:{}: {holder}.field:{} = object:{}", thread_id.0, field_id.0, value_id.0),
            TraceEvent::ClassInitStart { class_id, thread_id, sequence_no } => write!(f, "{sequence_no} thread:{}: class:{}.<clinit> start", thread_id.0, class_id.0),
            TraceEvent::ClassInitEnd { class_id, thread_id, sequence_no } => write!(f, "{sequence_no} thread:{}: class:{}.<clinit> end", thread_id.0, class_id.0),
            TraceEvent::ThreadStart {
                parent_thread_id,
                new_thread_id,
                sequence_no,
            } => write!(f, "{sequence_no} thread:{}: Thread.start() thread:{}", parent_thread_id.0, new_thread_id.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn write(seq: u64) -> TraceEvent {
        TraceEvent::ArrayWrite {
            container_id: ObjectId(1),
            index: 0,
            value_id: ObjectId(2),
            thread_id: ThreadId(0),
            sequence_no: SequenceNo(seq),
        }
    }

    #[test]
    fn test_equality_includes_sequence_no() {
        assert_eq!(write(3), write(3));
        assert_ne!(write(3), write(4));

        let keys: HashSet<TraceEvent> = [write(3), write(3), write(4)].into_iter().collect();
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn test_acting_thread() {
        let start = TraceEvent::ThreadStart {
            parent_thread_id: ThreadId(1),
            new_thread_id: ThreadId(2),
            sequence_no: SequenceNo(9),
        };
        assert_eq!(start.acting_thread(), ThreadId(1));
        assert_eq!(start.kind(), EventKind::ThreadStart);
        assert_eq!(write(1).acting_thread(), ThreadId(0));
    }

    #[test]
    fn test_static_field_write_display() {
        let event = TraceEvent::FieldWrite {
            holder: FieldHolder::Class(ClassId(3)),
            field_id: FieldId(8),
            value_id: ObjectId(2),
            thread_id: ThreadId(1),
            sequence_no: SequenceNo(4),
        };
        assert_eq!(event.to_string(), "#4 thread:1: class:3.field:8 = object:2");
        assert_eq!(event.kind(), EventKind::FieldWrite);
        assert_eq!(event.acting_thread(), ThreadId(1));
    }

    #[test]
    fn test_json_shape() {
        let json = serde_json::to_string(&write(5)).unwrap();
        assert!(json.starts_with("{\"ArrayWrite\":"));
        let back: TraceEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, write(5));
    }
}
