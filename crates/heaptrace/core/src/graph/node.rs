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

use crate::event::{NodeId, NodeKind, SequenceNo};

/// A traced entity. Created on first mention and never removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CausalNode {
    pub id: NodeId,
    /// Sequence number of the event that first mentioned this node
    pub first_seen: SequenceNo,
}

impl CausalNode {
    pub fn new(id: NodeId, first_seen: SequenceNo) -> Self {
        Self { id, first_seen }
    }

    pub fn kind(&self) -> NodeKind {
        self.id.kind()
    }
}
