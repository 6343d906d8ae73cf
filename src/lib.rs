//! `rft` — reliable whole-file transfer over a lossy datagram channel.
//!
//! The channel below may lose, reorder, duplicate, and bit-corrupt frames;
//! the protocol above delivers the file exactly once, in order.
//!
//! # Architecture
//!
//! ```text
//!  ┌────────────┐  DATA (seq, total, payload)  ┌──────────────┐
//!  │ FileSender │─────────────────────────────▶│ FileReceiver │
//!  └─────┬──────┘                              └──────┬───────┘
//!        │◀──────── ACK (base, SACK mask) ────────────┘
//!        │
//!  ┌─────▼──────────────────────────────────────┐
//!  │ SenderState                                │
//!  │   ├── sliding window + loss detection      │
//!  │   ├── RttEstimator  (RTO, back-off)        │
//!  │   └── CongestionController (CUBIC)         │
//!  └─────┬──────────────────────────────────────┘
//!        │ raw UDP datagrams
//!  ┌─────▼─────┐
//!  │  Socket   │  (thin async wrapper around tokio UdpSocket)
//!  └───────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]     — wire format (serialise / deserialise, XOR integrity)
//! - [`rtt`]        — round-trip estimation and retransmission timeout
//! - [`congestion`] — CUBIC congestion window
//! - [`sender`]     — send-side window state machine
//! - [`receiver`]   — reorder buffer and ack construction
//! - [`transfer`]   — the async driver loops and stop signal
//! - [`config`]     — tunable parameters
//! - [`simulator`]  — lossy/reordering relay for testing
//! - [`socket`]     — async UDP socket abstraction

pub mod config;
pub mod congestion;
pub mod packet;
pub mod receiver;
pub mod rtt;
pub mod sender;
pub mod simulator;
pub mod socket;
pub mod transfer;
