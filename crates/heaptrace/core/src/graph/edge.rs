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

use crate::event::{FieldId, NodeId, SequenceNo, TraceEvent};

/// What produced an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeLabel {
    ArrayWrite { index: u32 },
    FieldWrite { field: FieldId },
    ClassInit,
    ThreadStart,
}

/// `source` gained a reference path to `target` through `event`.
///
/// `cause` is the node whose own reachability explains the edge: the class
/// initializer innermost on the acting thread when the event happened, or the
/// acting thread itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CausalEdge {
    pub source: NodeId,
    pub target: NodeId,
    pub cause: NodeId,
    pub event: TraceEvent,
}

impl CausalEdge {
    pub fn sequence_no(&self) -> SequenceNo {
        self.event.sequence_no()
    }

    pub fn label(&self) -> EdgeLabel {
        match self.event {
            TraceEvent::ArrayWrite { index, .. } => EdgeLabel::ArrayWrite { index },
            TraceEvent::FieldWrite { field_id, .. } => EdgeLabel::FieldWrite { field: field_id },
            TraceEvent::ClassInitStart { .. } | TraceEvent::ClassInitEnd { .. } => EdgeLabel::ClassInit,
            TraceEvent::ThreadStart { .. } => EdgeLabel::ThreadStart,
        }
    }
}

impl fmt::Display for CausalEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.label() {
            EdgeLabel::ArrayWrite { index } => write!(f, "{} {}[{}] -> {}", self.sequence_no(), self.source, index, self.target)?,
            EdgeLabel::FieldWrite { field } => write!(f, "{} {}.field:{} -> {}", self.sequence_no(), self.source, field.0, self.target)?,
            EdgeLabel::ClassInit => write!(f, "{} {} -> {} (class init)", self.sequence_no(), self.source, self.target)?,
            EdgeLabel::ThreadStart => write!(f, "{} {} -> {} (thread start)", self.sequence_no(), self.source, self.target)?,
        }
        if self.cause != self.source {
            write!(f, " caused by {}", self.cause)?;
        }
        Ok(())
    }
}
