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

//! Causality graph and its single-consumer builder.

pub mod builder;
pub mod causal_graph;
pub mod edge;
pub mod gap;
pub mod node;

pub use builder::{GraphBuilder, replay};
pub use causal_graph::{CausalGraph, GraphStats};
pub use edge::{CausalEdge, EdgeLabel};
pub use gap::{SequenceGap, missing_count};
pub use node::CausalNode;
