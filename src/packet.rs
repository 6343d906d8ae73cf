//! Wire-format definitions for protocol frames.
//!
//! Every datagram exchanged between peers is a [`Packet`].  This module is
//! responsible for:
//! - Defining the on-wire binary layout (kind byte, header fields, payload).
//! - Serialising a [`Packet`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Packet`], returning errors
//!   for malformed, truncated, or corrupted input.
//!
//! No I/O happens here — this is pure data transformation.
//!
//! # Layout
//!
//! All multi-byte fields are big-endian.
//!
//! ```text
//! DATA  ┌──────┬─────────┬───────────┬─────┬─────────────────┐
//!       │ 0x00 │ seq u16 │ total u16 │ XOR │ payload ≤ 1024B │
//!       └──────┴─────────┴───────────┴─────┴─────────────────┘
//! ACK   ┌──────┬──────────┬───────────────┬─────┐
//!       │ 0x01 │ base u16 │ SACK mask u64 │ XOR │
//!       └──────┴──────────┴───────────────┴─────┘
//! ```
//!
//! The XOR byte folds every header byte after the kind byte.  It exists
//! because the channel flips bits: a corrupted ack base would otherwise
//! advance the sender's window past data the receiver never saw.  Payload
//! bytes are deliberately left unprotected — data integrity belongs to an
//! end-to-end file hash, not to this layer.

/// Frame kind byte for data frames.
pub const KIND_DATA: u8 = 0;
/// Frame kind byte for ack frames.
pub const KIND_ACK: u8 = 1;

/// Bytes preceding the payload in a data frame: kind + seq + total + XOR.
pub const DATA_HEADER: usize = 6;
/// Total size of an ack frame: kind + base + mask + XOR.
pub const ACK_HEADER: usize = 12;

/// Hard upper bound on the payload carried by one data frame.
pub const MAX_PAYLOAD: usize = 1024;

/// Number of selective-acknowledgement bits carried by an ack frame.
///
/// Bit `i` of the mask refers to sequence `base + i`; bit 0 is always clear
/// because that slot is what the cumulative base itself reports missing.
pub const SACK_WIDTH: usize = 64;

/// A complete protocol frame, ready to encode or freshly decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// A file chunk.  `total` is repeated in every frame so the receiver
    /// learns the file length from whichever frame arrives first.
    Data {
        seq: u16,
        total: u16,
        payload: Vec<u8>,
    },
    /// Cumulative + selective acknowledgement.  `base` is the smallest
    /// sequence not yet received in order; mask bit `i` reports `base + i`
    /// as buffered out-of-order.
    Ack { base: u16, mask: u64 },
}

/// XOR-fold a byte range into the 8-bit header integrity value.
fn xor_fold(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

impl Packet {
    /// Serialise this frame into a newly allocated byte vector.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Packet::Data {
                seq,
                total,
                payload,
            } => {
                let mut buf = Vec::with_capacity(DATA_HEADER + payload.len());
                buf.push(KIND_DATA);
                buf.extend_from_slice(&seq.to_be_bytes());
                buf.extend_from_slice(&total.to_be_bytes());
                buf.push(xor_fold(&buf[1..5]));
                buf.extend_from_slice(payload);
                buf
            }
            Packet::Ack { base, mask } => {
                let mut buf = Vec::with_capacity(ACK_HEADER);
                buf.push(KIND_ACK);
                buf.extend_from_slice(&base.to_be_bytes());
                buf.extend_from_slice(&mask.to_be_bytes());
                buf.push(xor_fold(&buf[1..11]));
                buf
            }
        }
    }

    /// Parse a [`Packet`] from a raw byte slice.
    ///
    /// Returns `Err` for buffers shorter than the declared header, unknown
    /// kind bytes, integrity-check failures, and oversized payloads.  The
    /// caller is expected to discard such frames silently — the protocol's
    /// redundancy recovers the data.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        let kind = *buf.first().ok_or(PacketError::TooShort)?;
        match kind {
            KIND_DATA => {
                if buf.len() < DATA_HEADER {
                    return Err(PacketError::TooShort);
                }
                if xor_fold(&buf[1..5]) != buf[5] {
                    return Err(PacketError::IntegrityMismatch);
                }
                let payload = &buf[DATA_HEADER..];
                if payload.len() > MAX_PAYLOAD {
                    return Err(PacketError::PayloadTooLong(payload.len()));
                }
                Ok(Packet::Data {
                    seq: u16::from_be_bytes([buf[1], buf[2]]),
                    total: u16::from_be_bytes([buf[3], buf[4]]),
                    payload: payload.to_vec(),
                })
            }
            KIND_ACK => {
                if buf.len() < ACK_HEADER {
                    return Err(PacketError::TooShort);
                }
                if xor_fold(&buf[1..11]) != buf[11] {
                    return Err(PacketError::IntegrityMismatch);
                }
                let mut mask_bytes = [0u8; 8];
                mask_bytes.copy_from_slice(&buf[3..11]);
                Ok(Packet::Ack {
                    base: u16::from_be_bytes([buf[1], buf[2]]),
                    mask: u64::from_be_bytes(mask_bytes),
                })
            }
            other => Err(PacketError::UnknownKind(other)),
        }
    }
}

/// Errors that can arise when parsing a raw datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    /// Buffer shorter than the header its kind byte declares.
    TooShort,
    /// Kind byte is neither [`KIND_DATA`] nor [`KIND_ACK`].
    UnknownKind(u8),
    /// The XOR integrity byte did not match the recomputed value.
    IntegrityMismatch,
    /// Data payload exceeds [`MAX_PAYLOAD`].
    PayloadTooLong(usize),
}

impl std::fmt::Display for PacketError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooShort => write!(f, "frame shorter than its header"),
            Self::UnknownKind(k) => write!(f, "unknown frame kind {k:#04x}"),
            Self::IntegrityMismatch => write!(f, "header integrity check failed"),
            Self::PayloadTooLong(n) => write!(f, "payload of {n} bytes exceeds {MAX_PAYLOAD}"),
        }
    }
}

impl std::error::Error for PacketError {}
