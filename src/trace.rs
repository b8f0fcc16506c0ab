//! Delivery trace — one record per message or timeout popped by the run loop.
//!
//! The trace carries a running, order-sensitive digest so two runs can be
//! compared for identical replay without keeping both traces around.

use crate::event::Sequence;
use crate::message::{Message, MessageId, MessageKind};
use crate::network::NodeId;
use crate::time::VirtualTime;

/// Combine two `u64` hashes (order-sensitive).
pub fn hash_combine(a: u64, b: u64) -> u64 {
    let mut h = a;
    h = h.wrapping_mul(0x517cc1b727220a95);
    h = h.wrapping_add(b);
    h ^= h >> 32;
    h
}

/// Hash a byte slice deterministically (FNV-1a variant).
pub fn hash_bytes(data: &[u8]) -> u64 {
    let mut h: u64 = 0xcbf29ce484222325;
    for &b in data {
        h ^= b as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    h
}

// ── Trace Entry ───────────────────────────────────────────────────────

/// A record of a single delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct TraceEntry {
    /// Virtual time at which the message was delivered.
    pub time: VirtualTime,
    /// The queue sequence the delivery was popped with.
    pub sequence: Sequence,
    /// The node the message arrived at.
    pub node: NodeId,
    pub kind: MessageKind,
    pub message_id: MessageId,
    /// Service the message is addressed to.
    pub service: String,
}

impl TraceEntry {
    pub fn new(time: VirtualTime, sequence: Sequence, message: &Message) -> Self {
        TraceEntry {
            time,
            sequence,
            node: message.current().node,
            kind: message.kind(),
            message_id: message.id(),
            service: message.dst_service().to_string(),
        }
    }

    /// Hash of this entry, independent of its position in the trace.
    pub fn hash(&self) -> u64 {
        let kind = match self.kind {
            MessageKind::Request => 1,
            MessageKind::Response => 2,
            MessageKind::Timeout => 3,
        };
        let mut h = hash_combine(self.time.ticks(), self.sequence.raw());
        h = hash_combine(h, self.node.raw());
        h = hash_combine(h, kind);
        h = hash_combine(h, self.message_id.raw());
        hash_combine(h, hash_bytes(self.service.as_bytes()))
    }
}

impl std::fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[T={} {} {}] {} {} → {}",
            self.time.ticks(),
            self.sequence,
            self.node,
            self.kind,
            self.message_id,
            self.service,
        )
    }
}

// ── Delivery Trace ────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct DeliveryTrace {
    entries: Vec<TraceEntry>,
    digest: u64,
}

impl DeliveryTrace {
    pub fn new() -> Self {
        DeliveryTrace::default()
    }

    pub fn record(&mut self, entry: TraceEntry) {
        self.digest = hash_combine(self.digest, entry.hash());
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Running digest over every recorded entry, in order.
    pub fn digest(&self) -> u64 {
        self.digest
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.digest = 0;
    }
}
