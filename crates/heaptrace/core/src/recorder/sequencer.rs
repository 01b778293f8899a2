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

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{TraceError, TraceResult};
use crate::event::SequenceNo;

/// Hands out globally unique, strictly increasing sequence numbers.
///
/// One atomic read-modify-write per call; no lock. Numbers above `limit` are
/// never issued, and once the limit is hit every later call fails.
#[derive(Debug)]
pub struct Sequencer {
    next: AtomicU64,
    limit: u64,
}

impl Sequencer {
    pub fn new(limit: u64) -> Self {
        Self::starting_at(SequenceNo::FIRST, limit)
    }

    pub fn starting_at(first: SequenceNo, limit: u64) -> Self {
        Self {
            next: AtomicU64::new(first.0),
            limit,
        }
    }

    pub fn next(&self) -> TraceResult<SequenceNo> {
        let limit = self.limit;
        self.next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| if n <= limit { n.checked_add(1) } else { None })
            .map(SequenceNo)
            .map_err(|_| TraceError::TraceOverflow { limit })
    }

    /// The last number handed out, if any.
    pub fn last_issued(&self) -> Option<SequenceNo> {
        let next = self.next.load(Ordering::Acquire);
        (next > SequenceNo::FIRST.0).then(|| SequenceNo(next - 1))
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }
}
