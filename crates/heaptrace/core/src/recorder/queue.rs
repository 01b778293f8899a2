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

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::event::{SequenceNo, TraceEvent};

/// Statistics for monitoring queue pressure.
///
/// All counters are atomic and can be read while producers are pushing.
#[derive(Debug, Default)]
pub struct QueueStats {
    /// Events accepted by `push`
    pub enqueued_count: AtomicUsize,
    /// Events handed to the consumer by `drain_into`
    pub drained_count: AtomicUsize,
    /// Oldest events displaced because the queue was full
    pub dropped_count: AtomicUsize,
}

#[derive(Debug, Default)]
struct QueueInner {
    events: VecDeque<TraceEvent>,
    dropped: Vec<SequenceNo>,
}

/// Bounded multi-producer, single-consumer event queue.
///
/// When full, the oldest event is displaced and its sequence number kept so
/// the consumer can mark the gap. The newest event is never dropped and
/// producers never wait for the consumer beyond the push itself.
#[derive(Debug)]
pub struct EventQueue {
    inner: Mutex<QueueInner>,
    capacity: usize,
    stats: QueueStats,
}

impl EventQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        EventQueue {
            inner: Mutex::new(QueueInner {
                events: VecDeque::with_capacity(capacity.min(4_096)),
                dropped: Vec::new(),
            }),
            capacity,
            stats: QueueStats::default(),
        }
    }

    /// Appends `event`. Returns the sequence number of the displaced oldest
    /// event when the queue was full.
    pub fn push(&self, event: TraceEvent) -> Option<SequenceNo> {
        let displaced = {
            let mut inner = self.inner.lock();
            let displaced = if inner.events.len() >= self.capacity {
                inner.events.pop_front().map(|old| old.sequence_no())
            } else {
                None
            };
            if let Some(seq) = displaced {
                inner.dropped.push(seq);
            }
            inner.events.push_back(event);
            displaced
        };

        self.stats.enqueued_count.fetch_add(1, Ordering::Relaxed);
        if displaced.is_some() {
            self.stats.dropped_count.fetch_add(1, Ordering::Relaxed);
        }
        displaced
    }

    /// Moves every queued event into `events` and every dropped sequence
    /// number into `dropped`. Returns the number of events moved.
    pub fn drain_into(&self, events: &mut Vec<TraceEvent>, dropped: &mut Vec<SequenceNo>) -> usize {
        let moved = {
            let mut inner = self.inner.lock();
            let moved = inner.events.len();
            events.extend(inner.events.drain(..));
            dropped.append(&mut inner.dropped);
            moved
        };
        self.stats.drained_count.fetch_add(moved, Ordering::Relaxed);
        moved
    }

    pub fn len(&self) -> usize {
        self.inner.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lock-free estimate of `len`, from the counters.
    pub fn approx_len(&self) -> usize {
        let out = self.stats.drained_count.load(Ordering::Relaxed) + self.stats.dropped_count.load(Ordering::Relaxed);
        self.stats.enqueued_count.load(Ordering::Relaxed).saturating_sub(out)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ClassId, ThreadId};
    use std::sync::Arc;
    use std::thread;

    fn init(seq: u64) -> TraceEvent {
        TraceEvent::ClassInitStart {
            class_id: ClassId(seq),
            thread_id: ThreadId(0),
            sequence_no: SequenceNo(seq),
        }
    }

    #[test]
    fn test_push_drain() {
        let queue = EventQueue::with_capacity(8);
        assert_eq!(queue.push(init(1)), None);
        assert_eq!(queue.push(init(2)), None);
        assert_eq!(queue.len(), 2);

        let (mut events, mut dropped) = (Vec::new(), Vec::new());
        assert_eq!(queue.drain_into(&mut events, &mut dropped), 2);
        assert_eq!(events, vec![init(1), init(2)]);
        assert!(dropped.is_empty());
        assert!(queue.is_empty());
        assert_eq!(queue.stats().drained_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_full_queue_drops_oldest() {
        let queue = EventQueue::with_capacity(2);
        queue.push(init(1));
        queue.push(init(2));
        assert_eq!(queue.push(init(3)), Some(SequenceNo(1)));
        assert_eq!(queue.push(init(4)), Some(SequenceNo(2)));
        assert_eq!(queue.approx_len(), 2);

        let (mut events, mut dropped) = (Vec::new(), Vec::new());
        queue.drain_into(&mut events, &mut dropped);
        assert_eq!(events, vec![init(3), init(4)]);
        assert_eq!(dropped, vec![SequenceNo(1), SequenceNo(2)]);
        assert_eq!(queue.approx_len(), 0);
        assert_eq!(queue.stats().dropped_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_concurrent_producers() {
        let queue = Arc::new(EventQueue::with_capacity(10_000));
        let handles: Vec<_> = (0..4u64)
            .map(|t| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..500 {
                        queue.push(init(t * 1_000 + i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(queue.len(), 2_000);
        assert_eq!(queue.stats().enqueued_count.load(Ordering::SeqCst), 2_000);
    }
}
