//! Acknowledgement tracking and replay.
//!
//! Every non-ACK frame a side sends carries a stamp from its own registry and
//! is kept, as raw framed bytes, until the matching ACK arrives. The ordered
//! map makes in-stamp-order replay after a reconnect a plain iteration.

use std::collections::BTreeMap;
use std::time::Instant;

/// A sent frame still awaiting its acknowledgement.
#[derive(Debug, Clone)]
pub struct PendingAck {
    pub sent_at: Instant,
    /// The exact bytes that went on the wire, for retransmission.
    pub frame: Vec<u8>,
}

/// Sender-local stamp allocation plus the pending-ACK map.
///
/// Owned exclusively by the single task driving a side's outbound traffic;
/// survives connection lifetimes on the reconnecting side.
#[derive(Debug, Default)]
pub struct AckRegistry {
    last_stamp: u64,
    pending: BTreeMap<u64, PendingAck>,
}

impl AckRegistry {
    pub fn new() -> Self {
        AckRegistry::default()
    }

    /// Allocate the next stamp. Monotonic, never reused.
    pub fn next_stamp(&mut self) -> u64 {
        self.last_stamp += 1;
        self.last_stamp
    }

    /// Record a sent frame as awaiting acknowledgement.
    pub fn track(&mut self, stamp: u64, frame: Vec<u8>) {
        self.pending.insert(
            stamp,
            PendingAck {
                sent_at: Instant::now(),
                frame,
            },
        );
    }

    /// Clear a pending entry. Returns `None` for unknown stamps, which the
    /// caller logs and otherwise ignores.
    pub fn acknowledge(&mut self, stamp: u64) -> Option<PendingAck> {
        self.pending.remove(&stamp)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// All pending frames in stamp order, for replay on a fresh connection.
    pub fn replay_frames(&self) -> impl Iterator<Item = &[u8]> {
        self.pending.values().map(|p| p.frame.as_slice())
    }

    /// Stamps currently pending, in order.
    pub fn pending_stamps(&self) -> impl Iterator<Item = u64> + '_ {
        self.pending.keys().copied()
    }
}
