//! Datagram I/O for protocol frames.
//!
//! [`Socket`] owns the UDP endpoint and the codec boundary: every datagram
//! leaving here is an encoded [`Packet`], and every datagram arriving is
//! decoded before the engines see it.  The two drivers lean on it
//! differently — the sender drains queued acks without suspending
//! ([`try_recv_from`]) and pushes prebuilt frame bytes ([`send_bytes`]),
//! while the receiver parks on [`recv_from`] under its keepalive timeout —
//! so both a blocking and a non-blocking receive path are exposed.
//!
//! A datagram that does not parse surfaces as [`SocketError::Frame`]; the
//! drivers log and discard it, and the retransmission machinery recovers
//! whatever the corrupted frame was carrying.
//!
//! [`try_recv_from`]: Socket::try_recv_from
//! [`send_bytes`]: Socket::send_bytes
//! [`recv_from`]: Socket::recv_from

use std::io;
use std::net::SocketAddr;

use tokio::net::UdpSocket;

use crate::packet::{Packet, PacketError, DATA_HEADER, MAX_PAYLOAD};

/// Receive-buffer size: a full-payload data frame is the largest datagram
/// either endpoint ever emits (acks are far smaller).
const RECV_BUF: usize = DATA_HEADER + MAX_PAYLOAD;

/// Failures crossing the datagram boundary.
#[derive(Debug)]
pub enum SocketError {
    /// The operating system refused the send or receive.
    Io(io::Error),
    /// The datagram arrived but did not parse as a protocol frame.
    Frame(PacketError),
}

impl std::fmt::Display for SocketError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "datagram I/O failed: {e}"),
            Self::Frame(e) => write!(f, "undecodable datagram: {e}"),
        }
    }
}

impl std::error::Error for SocketError {}

impl From<io::Error> for SocketError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// Decode at the socket edge, so the engines only ever see valid frames.
fn decode(datagram: &[u8]) -> Result<Packet, SocketError> {
    Packet::decode(datagram).map_err(SocketError::Frame)
}

/// A frame-speaking UDP endpoint.
///
/// Every method takes `&self`: the endpoint carries no protocol state, so
/// nothing here needs exclusive access.
#[derive(Debug)]
pub struct Socket {
    inner: UdpSocket,
    bound: SocketAddr,
}

impl Socket {
    /// Bind to `addr`; port `0` asks the OS for an ephemeral one.
    pub async fn bind(addr: SocketAddr) -> Result<Self, SocketError> {
        let inner = UdpSocket::bind(addr).await?;
        let bound = inner.local_addr()?;
        Ok(Self { inner, bound })
    }

    /// The address actually bound, with any OS-chosen port filled in.
    pub fn local_addr(&self) -> SocketAddr {
        self.bound
    }

    /// Ship already-encoded frame bytes to `dest`.
    ///
    /// The sender's data frames are encoded once at setup and every
    /// retransmission reuses them, so this path takes the raw slice.
    pub async fn send_bytes(&self, frame: &[u8], dest: SocketAddr) -> Result<(), SocketError> {
        self.inner.send_to(frame, dest).await?;
        Ok(())
    }

    /// Encode `packet` and ship it to `dest` as one datagram.
    pub async fn send_to(&self, packet: &Packet, dest: SocketAddr) -> Result<(), SocketError> {
        self.send_bytes(&packet.encode(), dest).await
    }

    /// Wait for the next datagram and decode it.
    pub async fn recv_from(&self) -> Result<(Packet, SocketAddr), SocketError> {
        let mut buf = [0u8; RECV_BUF];
        let (len, from) = self.inner.recv_from(&mut buf).await?;
        Ok((decode(&buf[..len])?, from))
    }

    /// Drain one queued datagram without suspending.
    ///
    /// Returns `Ok(None)` once the queue is empty; the sender loop calls
    /// this until then before moving on to its timeout and admission work.
    pub fn try_recv_from(&self) -> Result<Option<(Packet, SocketAddr)>, SocketError> {
        let mut buf = [0u8; RECV_BUF];
        match self.inner.try_recv_from(&mut buf) {
            Ok((len, from)) => Ok(Some((decode(&buf[..len])?, from))),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(SocketError::Io(e)),
        }
    }
}
