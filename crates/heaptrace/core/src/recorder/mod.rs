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

//! Recorder: the interception boundary instrumented code calls into.

pub mod lib;
pub mod queue;
pub mod sequencer;
pub mod sink;

pub use lib::EventRecorder;
pub use queue::{EventQueue, QueueStats};
pub use sequencer::Sequencer;
pub use sink::{Recorder, RecorderState};
