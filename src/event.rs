/// Queue entries for the deterministic event queue.
///
/// Every scheduled delivery is a `QueueEntry`: a message, the simulated
/// time it becomes deliverable, and a sequence number. Entries are
/// immutable once pushed; any mutation of the message happens before.

use crate::message::Message;
use crate::time::VirtualTime;
use std::cmp::Ordering;

// ── Sequence ──────────────────────────────────────────────────────────

/// A strictly increasing tie-breaker.
///
/// Two entries scheduled for the same `VirtualTime` are delivered in
/// sequence order, which is push order. This is what makes replay
/// deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Sequence(u64);

impl Sequence {
    #[inline]
    pub fn new(raw: u64) -> Self {
        Sequence(raw)
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Sequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ── Sequence Generator ───────────────────────────────────────────────

/// Deterministic, strictly increasing sequence generator.
///
/// Each `Scheduler` owns exactly one, and every message pushed during a
/// run draws from it, so ordering across messages is total.
#[derive(Debug, Clone, Default)]
pub struct SequenceGen {
    next: u64,
}

impl SequenceGen {
    /// Create a generator starting at 0.
    pub fn new() -> Self {
        SequenceGen { next: 0 }
    }

    /// Mint the next sequence number.
    pub fn next_sequence(&mut self) -> Sequence {
        let seq = Sequence(self.next);
        self.next += 1;
        seq
    }

    /// Peek at the next sequence without consuming it.
    pub fn peek(&self) -> Sequence {
        Sequence(self.next)
    }
}

// ── Queue Entry ──────────────────────────────────────────────────────

/// A pending message delivery.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub deliver_at: VirtualTime,
    pub sequence: Sequence,
    pub message: Message,
}

impl QueueEntry {
    pub fn new(deliver_at: VirtualTime, sequence: Sequence, message: Message) -> Self {
        QueueEntry {
            deliver_at,
            sequence,
            message,
        }
    }

    /// The `(deliver_at, sequence)` ordering key.
    #[inline]
    pub fn key(&self) -> (VirtualTime, Sequence) {
        (self.deliver_at, self.sequence)
    }

    /// Hand the message over to whoever popped the entry.
    pub fn into_message(self) -> Message {
        self.message
    }
}

/// Entries compare by key only; sequences are unique within a run.
impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for QueueEntry {}

/// Ordering: smallest `(deliver_at, sequence)` first.
///
/// `BinaryHeap` is a max-heap, so the natural ordering is reversed here
/// to turn it into a min-heap.
impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deliver_at
            .cmp(&self.deliver_at)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
