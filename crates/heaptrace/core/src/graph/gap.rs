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

use crate::event::SequenceNo;

/// A run of sequence numbers that will never be applied.
///
/// Gaps are stored as ranges so a log with one wide hole costs one entry,
/// however many numbers the hole spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SequenceGap {
    pub first: SequenceNo,
    pub last: SequenceNo,
}

impl SequenceGap {
    pub fn new(first: SequenceNo, last: SequenceNo) -> Self {
        Self {
            first: first.min(last),
            last: first.max(last),
        }
    }

    pub fn single(seq: SequenceNo) -> Self {
        Self { first: seq, last: seq }
    }

    /// Number of missing sequence numbers; saturates for the full `u64` range.
    pub fn len(&self) -> u64 {
        self.last.0.saturating_sub(self.first.0).saturating_add(1)
    }

    pub fn contains(&self, seq: SequenceNo) -> bool {
        self.first <= seq && seq <= self.last
    }

    /// The part of this gap at or before `horizon`.
    pub fn clipped_to(&self, horizon: SequenceNo) -> Option<SequenceGap> {
        (self.first <= horizon).then(|| SequenceGap::new(self.first, self.last.min(horizon)))
    }

    /// Overlapping or adjacent, assuming `self.first <= other.first`.
    pub(crate) fn touches(&self, other: &SequenceGap) -> bool {
        other.first.0 <= self.last.0.saturating_add(1)
    }
}

impl fmt::Display for SequenceGap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.first == self.last {
            write!(f, "{}", self.first)
        } else {
            write!(f, "{}..{}", self.first, self.last)
        }
    }
}

/// Total count of missing numbers across `gaps`.
pub fn missing_count(gaps: &[SequenceGap]) -> u64 {
    gaps.iter().fold(0u64, |total, gap| total.saturating_add(gap.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gap_len_and_clip() {
        let gap = SequenceGap::new(SequenceNo(10), SequenceNo(4));
        assert_eq!(gap.first, SequenceNo(4));
        assert_eq!(gap.len(), 7);
        assert!(gap.contains(SequenceNo(10)));
        assert_eq!(gap.clipped_to(SequenceNo(6)), Some(SequenceGap::new(SequenceNo(4), SequenceNo(6))));
        assert_eq!(gap.clipped_to(SequenceNo(3)), None);
        assert_eq!(SequenceGap::new(SequenceNo(0), SequenceNo(u64::MAX)).len(), u64::MAX);
        assert_eq!(gap.to_string(), "#4..#10");
        assert_eq!(SequenceGap::single(SequenceNo(2)).to_string(), "#2");
    }
}
