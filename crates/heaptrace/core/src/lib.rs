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

//! Heaptrace causality tracing
//!
//! Records the program points that make heap objects reachable (array and
//! field stores, class initialization, thread starts) into one totally ordered
//! event log, builds an append-only causality graph from it, and answers
//! "why is this object reachable?" by returning the shortest causal chain
//! from a root.

pub mod agent;
pub mod config;
pub mod error;
pub mod event;
pub mod ffi;
pub mod graph;
pub mod hooks;
pub mod identity;
pub mod persistence;
pub mod query;
pub mod recorder;
pub mod session;

pub use config::{DrainMode, TraceConfig};
pub use error::{TraceError, TraceResult};
pub use event::{ClassId, EventKind, FieldHolder, FieldId, NodeId, NodeKind, ObjectId, SequenceNo, ThreadId, TraceEvent};
pub use graph::{CausalEdge, CausalGraph, CausalNode, EdgeLabel, GraphStats, SequenceGap};
pub use hooks::{TraceHooks, traced_array_store, traced_field_store};
pub use identity::{HostIdentities, IdentityRegistry};
pub use persistence::LogFormat;
pub use query::{CausalityQuery, Completeness, Explanation};
pub use recorder::{EventRecorder, Recorder, RecorderState};
pub use session::TraceSession;
