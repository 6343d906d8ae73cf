//! Receive-side state machine: reorder buffer and ack construction.
//!
//! [`ReceiverState`] implements selective repeat on the receive side:
//!
//! - The **first** valid data frame fixes the expected frame count and sizes
//!   the reorder table; later frames that disagree on the total are treated
//!   as corruption and discarded.
//! - In-range payloads are buffered exactly once — duplicates never
//!   overwrite or re-deliver.
//! - `next_expected` advances over the contiguous prefix of received slots.
//! - Every buffered-or-duplicate frame elicits an ack carrying the
//!   cumulative base plus a 64-bit selective mask of out-of-order receipts.
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility (same pattern as [`crate::sender::SenderState`]).

use crate::packet::{Packet, SACK_WIDTH};

/// Receive-side state for one transfer.
#[derive(Debug, Default)]
pub struct ReceiverState {
    /// One slot per sequence number; `Some` once its payload arrived.
    slots: Vec<Option<Vec<u8>>>,
    /// Frame count learned from the first valid data frame.
    total: Option<u16>,
    /// Smallest sequence not yet received in order.  Every slot below it is
    /// filled, so reassembly of `0..next_expected` never hits a gap.
    next_expected: usize,
    /// The most recently constructed ack, re-sent by the driver on idle.
    last_ack: Option<Packet>,
}

impl ReceiverState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process one decoded data frame.
    ///
    /// Returns the ack to transmit, or `None` when the frame was discarded
    /// (zero or contradictory total, sequence out of range) — corruption
    /// that slipped past the header check must not be acknowledged.
    pub fn on_data(&mut self, seq: u16, total: u16, payload: Vec<u8>) -> Option<Packet> {
        let expected = match self.total {
            Some(t) if t != total => return None,
            Some(t) => t,
            None => {
                if total == 0 {
                    return None;
                }
                self.total = Some(total);
                self.slots = vec![None; total as usize];
                total
            }
        } as usize;

        if seq as usize >= expected {
            return None;
        }

        let slot = &mut self.slots[seq as usize];
        if slot.is_none() {
            *slot = Some(payload);
        }

        while self.next_expected < expected && self.slots[self.next_expected].is_some() {
            self.next_expected += 1;
        }

        let ack = Packet::Ack {
            base: self.next_expected as u16,
            mask: self.sack_mask(expected),
        };
        self.last_ack = Some(ack.clone());
        Some(ack)
    }

    /// Mask bit `i` reports slot `next_expected + i` as buffered.  Bit 0 is
    /// structurally zero: that slot is the one the base reports missing.
    fn sack_mask(&self, expected: usize) -> u64 {
        let mut mask = 0u64;
        for i in 1..SACK_WIDTH {
            let seq = self.next_expected + i;
            if seq >= expected {
                break;
            }
            if self.slots[seq].is_some() {
                mask |= 1 << i;
            }
        }
        mask
    }

    /// The most recently emitted ack, if any data frame has been accepted.
    pub fn last_ack(&self) -> Option<&Packet> {
        self.last_ack.as_ref()
    }

    /// `true` once every expected frame has been received.
    pub fn is_complete(&self) -> bool {
        matches!(self.total, Some(t) if self.next_expected >= t as usize)
    }

    /// Number of frames delivered in order so far.
    pub fn in_order(&self) -> usize {
        self.next_expected
    }

    /// Frame count announced by the sender, once known.
    pub fn expected_total(&self) -> Option<u16> {
        self.total
    }

    /// Concatenate buffered payloads in sequence order.
    ///
    /// On a complete transfer this is the whole file; on an interrupted one
    /// it is the in-order prefix received so far.
    pub fn reassemble(self) -> Vec<u8> {
        self.slots
            .into_iter()
            .take(self.next_expected)
            .flatten()
            .flatten()
            .collect()
    }
}
