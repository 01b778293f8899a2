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

use thiserror::Error;

use crate::event::NodeId;
use crate::graph::{CausalEdge, SequenceGap, missing_count};

#[derive(Error, Debug)]
pub enum TraceError {
    #[error("Trace overflow: sequence space exhausted at limit {limit}")]
    TraceOverflow { limit: u64 },

    #[error("Trace session is closed")]
    SessionClosed,

    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Causal chain of {} edges is possibly incomplete: {} missing events", chain.len(), missing_count(gaps))]
    IncompleteChain { chain: Vec<CausalEdge>, gaps: Vec<SequenceGap> },

    #[error("A trace session is already installed")]
    AgentAlreadyInstalled,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl TraceError {
    /// Errors after which the recorder accepts no further events.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TraceError::TraceOverflow { .. } | TraceError::SessionClosed)
    }
}

pub type TraceResult<T> = Result<T, TraceError>;
