/// Deterministic message scheduler.
///
/// Uses a `BinaryHeap` with reversed `Ord` on `QueueEntry` to act as a
/// min-heap keyed by `(deliver_at, sequence)`. Because sequences are
/// strictly increasing and the heap is deterministic, two runs with the
/// same send sequence always pop in the same order.

use std::collections::BinaryHeap;

use crate::error::SchedulingError;
use crate::event::{QueueEntry, Sequence, SequenceGen};
use crate::message::Message;
use crate::time::VirtualTime;

// ── Event Queue ───────────────────────────────────────────────────────

/// Time-ordered queue of pending deliveries. No cancellation.
#[derive(Debug, Clone, Default)]
pub struct EventQueue {
    /// Min-heap (via reversed Ord on QueueEntry).
    heap: BinaryHeap<QueueEntry>,
}

impl EventQueue {
    pub fn new() -> Self {
        EventQueue {
            heap: BinaryHeap::new(),
        }
    }

    pub fn push(&mut self, entry: QueueEntry) {
        self.heap.push(entry);
    }

    /// Remove the entry with the smallest `(deliver_at, sequence)`.
    pub fn pop_earliest(&mut self) -> Result<QueueEntry, SchedulingError> {
        self.heap.pop().ok_or(SchedulingError::EmptyQueue)
    }

    pub fn peek(&self) -> Option<&QueueEntry> {
        self.heap.peek()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Drain all entries in delivery order.
    pub fn drain_ordered(&mut self) -> Vec<QueueEntry> {
        let mut entries = Vec::with_capacity(self.heap.len());
        while let Some(e) = self.heap.pop() {
            entries.push(e);
        }
        entries
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }
}

// ── Scheduler ─────────────────────────────────────────────────────────

/// Owns the queue, the sequence generator and the simulated clock.
///
/// All pushes go through this struct so sequences are minted from one
/// counter per run.
#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    queue: EventQueue,
    seq_gen: SequenceGen,
    now: VirtualTime,
}

impl Scheduler {
    /// Create an empty scheduler at time zero.
    pub fn new() -> Self {
        Self::starting_at(VirtualTime::ZERO)
    }

    /// Create an empty scheduler whose clock reads `start`.
    pub fn starting_at(start: VirtualTime) -> Self {
        Scheduler {
            queue: EventQueue::new(),
            seq_gen: SequenceGen::new(),
            now: start,
        }
    }

    #[inline]
    pub fn now(&self) -> VirtualTime {
        self.now
    }

    /// Move the clock to `to`. Time never moves backward.
    pub fn advance_to(&mut self, to: VirtualTime) -> Result<(), SchedulingError> {
        if to < self.now {
            return Err(SchedulingError::NonCausal {
                requested: to,
                current: self.now,
            });
        }
        self.now = to;
        Ok(())
    }

    pub fn next_sequence(&mut self) -> Sequence {
        self.seq_gen.next_sequence()
    }

    /// Sequence the next push will receive.
    pub fn peek_sequence(&self) -> Sequence {
        self.seq_gen.peek()
    }

    /// Push `message` for delivery at `now + delay`.
    ///
    /// On failure the message is dropped and nothing is queued.
    pub fn schedule(
        &mut self,
        message: Message,
        delay: i64,
    ) -> Result<(VirtualTime, Sequence), SchedulingError> {
        if delay < 0 {
            return Err(SchedulingError::NegativeDelay(delay));
        }
        let Some(deliver_at) = self.now.plus(delay) else {
            tracing::error!(
                now = %self.now,
                delay,
                message = %message.id(),
                "delivery time overflows the simulated clock, message not queued"
            );
            return Err(SchedulingError::TimeOverflow {
                now: self.now,
                delay,
            });
        };
        let sequence = self.next_sequence();
        self.queue.push(QueueEntry::new(deliver_at, sequence, message));
        Ok((deliver_at, sequence))
    }

    pub fn pop_earliest(&mut self) -> Result<QueueEntry, SchedulingError> {
        self.queue.pop_earliest()
    }

    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut EventQueue {
        &mut self.queue
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Drop every pending entry and rewind the clock to `to`.
    ///
    /// The sequence counter keeps counting so entries pushed afterwards
    /// never share a sequence with ones handed out before.
    pub fn reset(&mut self, to: VirtualTime) {
        self.queue.clear();
        self.now = to;
    }
}
