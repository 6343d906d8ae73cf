//! Transfer drivers: the cooperative loops that move a whole file.
//!
//! # Architecture
//!
//! ```text
//!  file bytes                                reassembled bytes
//!      │                                            ▲
//!  ┌───▼────────┐  DATA frames   ┌──────────────────┴──┐
//!  │ FileSender │───────────────▶│    FileReceiver     │
//!  │  SenderState│               │    ReceiverState    │
//!  │  (window,   │◀──────────────│  (reorder buffer,   │
//!  │   RTT, cwnd)│  ACK frames   │   ack construction) │
//!  └───┬────────┘                └──────────┬──────────┘
//!      │ raw UDP datagrams                  │
//!  ┌───▼──────┐                      ┌──────▼───┐
//!  │  Socket  │                      │  Socket  │
//!  └──────────┘                      └──────────┘
//! ```
//!
//! Each driver is a single task; no state is shared across threads, so ack
//! ingestion, loss recovery, and window admission cannot race.  Per
//! iteration the sender drains every queued ack (ingestion, then the loss
//! recovery that ack implies), sweeps for RTO-expired slots, admits fresh
//! frames up to the congestion window, and finally sleeps a ~1 ms tick.
//! The receiver blocks on the socket with a keepalive-bounded timeout and
//! re-emits its latest ack when the line goes quiet, so a sender whose
//! return path is lossy still learns where the transfer stands.
//!
//! Both loops poll a [`StopHandle`] between iterations and exit cleanly
//! when it fires.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::time::timeout;

use crate::config::Config;
use crate::packet::Packet;
use crate::receiver::ReceiverState;
use crate::sender::{SenderError, SenderState, TransferStats};
use crate::socket::{Socket, SocketError};

// ---------------------------------------------------------------------------
// Control plane
// ---------------------------------------------------------------------------

/// Cooperative stop signal shared between a driver and its controller.
///
/// The flag is monotonic: once raised it stays raised.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the driver to exit at its next loop boundary.
    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can end a transfer.
#[derive(Debug)]
pub enum TransferError {
    /// Preparing the send tables failed.
    Sender(SenderError),
    /// The socket layer failed with a real I/O error.
    Socket(SocketError),
    /// The stop signal was raised before the transfer completed.
    Stopped,
}

impl std::fmt::Display for TransferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sender(e) => write!(f, "transfer setup failed: {e}"),
            Self::Socket(e) => write!(f, "transfer aborted: {e}"),
            Self::Stopped => write!(f, "transfer stopped by signal"),
        }
    }
}

impl std::error::Error for TransferError {}

impl From<SenderError> for TransferError {
    fn from(e: SenderError) -> Self {
        Self::Sender(e)
    }
}

impl From<SocketError> for TransferError {
    fn from(e: SocketError) -> Self {
        Self::Socket(e)
    }
}

// ---------------------------------------------------------------------------
// FileSender
// ---------------------------------------------------------------------------

/// Sending endpoint: owns the socket and the window state for one file.
pub struct FileSender {
    socket: Socket,
    peer: SocketAddr,
    state: SenderState,
    stop: StopHandle,
    config: Config,
}

impl FileSender {
    /// Pre-frame `data` and prepare to send it to `peer`.
    pub fn new(
        socket: Socket,
        peer: SocketAddr,
        data: &[u8],
        config: &Config,
        stop: StopHandle,
    ) -> Result<Self, TransferError> {
        let state = SenderState::new(data, config)?;
        Ok(Self {
            socket,
            peer,
            state,
            stop,
            config: config.clone(),
        })
    }

    /// Drive the transfer until every frame is acknowledged.
    ///
    /// Returns the accumulated statistics on success and
    /// [`TransferError::Stopped`] if the stop signal fired first.
    pub async fn run(mut self) -> Result<TransferStats, TransferError> {
        log::info!(
            "[sender] transferring {} frame(s) to {}",
            self.state.total(),
            self.peer
        );

        loop {
            if self.stop.is_stopped() {
                log::warn!(
                    "[sender] stopped at {}/{} acknowledged",
                    self.state.send_base(),
                    self.state.total()
                );
                return Err(TransferError::Stopped);
            }

            // Phase A + B: drain queued acks in arrival order; each one may
            // demand fast retransmissions.
            loop {
                match self.socket.try_recv_from() {
                    Ok(Some((Packet::Ack { base, mask }, addr))) if addr == self.peer => {
                        let now = Instant::now();
                        for seq in self.state.handle_ack(base, mask, now) {
                            log::debug!("[sender] fast retransmit seq={seq}");
                            self.socket.send_bytes(self.state.frame(seq), self.peer).await?;
                        }
                    }
                    Ok(Some(_)) => {} // data frame or foreign peer: not ours
                    Ok(None) => break,
                    Err(SocketError::Frame(e)) => {
                        log::debug!("[sender] discarding frame: {e}");
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            if self.state.is_complete() {
                let stats = self.state.stats();
                log::info!(
                    "[sender] transfer complete: {} fresh, {} retransmitted, cwnd={:.1}, rto={:?}",
                    stats.frames_sent,
                    stats.retransmits,
                    self.state.cwnd(),
                    self.state.rto()
                );
                return Ok(stats);
            }

            // RTO sweep over the in-flight range.
            let now = Instant::now();
            for seq in self.state.due_retransmits(now) {
                log::debug!("[sender] timeout retransmit seq={seq}");
                self.socket.send_bytes(self.state.frame(seq), self.peer).await?;
            }

            // Phase C: fresh frames while the congestion window has room.
            let now = Instant::now();
            for seq in self.state.admit(now) {
                self.socket.send_bytes(self.state.frame(seq), self.peer).await?;
            }

            tokio::time::sleep(self.config.idle_tick).await;
        }
    }
}

// ---------------------------------------------------------------------------
// FileReceiver
// ---------------------------------------------------------------------------

/// Receiving endpoint: reassembles one file from whoever sends it first.
pub struct FileReceiver {
    socket: Socket,
    state: ReceiverState,
    stop: StopHandle,
    config: Config,
    /// Learned from the first valid data frame; acks go back there.
    peer: Option<SocketAddr>,
}

impl FileReceiver {
    pub fn new(socket: Socket, config: &Config, stop: StopHandle) -> Self {
        Self {
            socket,
            state: ReceiverState::new(),
            stop,
            config: config.clone(),
            peer: None,
        }
    }

    /// Receive until the file is complete, then return its bytes.
    ///
    /// If the stop signal fires first, returns the in-order prefix received
    /// so far — callers decide whether a short transfer is acceptable.
    pub async fn run(mut self) -> Result<Vec<u8>, TransferError> {
        log::info!("[receiver] listening on {}", self.socket.local_addr());

        loop {
            if self.stop.is_stopped() {
                log::warn!(
                    "[receiver] stopped after {} in-order frame(s)",
                    self.state.in_order()
                );
                return Ok(self.state.reassemble());
            }

            match timeout(self.config.ack_keepalive, self.socket.recv_from()).await {
                Ok(Ok((Packet::Data { seq, total, payload }, addr))) => {
                    match self.peer {
                        Some(peer) if addr != peer => continue,
                        Some(_) => {}
                        None => {
                            log::info!("[receiver] sender is {addr}, expecting {total} frame(s)");
                            self.peer = Some(addr);
                        }
                    }

                    match self.state.on_data(seq, total, payload) {
                        Some(ack) => self.socket.send_to(&ack, addr).await?,
                        None => log::debug!("[receiver] discarding data seq={seq} total={total}"),
                    }

                    if self.state.is_complete() {
                        return self.linger(addr).await;
                    }
                }
                Ok(Ok((Packet::Ack { .. }, _))) => {} // not addressed to us
                Ok(Err(SocketError::Frame(e))) => {
                    log::debug!("[receiver] discarding frame: {e}");
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(_elapsed) => {
                    // Idle: the sender may be stalled on a lost ack.
                    if let (Some(ack), Some(peer)) = (self.state.last_ack(), self.peer) {
                        log::debug!("[receiver] idle, re-sending ack");
                        let ack = ack.clone();
                        self.socket.send_to(&ack, peer).await?;
                    }
                }
            }
        }
    }

    /// The final ack can be lost like any other; answer retransmitted data
    /// frames for a grace period before tearing down.
    async fn linger(self, peer: SocketAddr) -> Result<Vec<u8>, TransferError> {
        log::info!(
            "[receiver] all {} frame(s) received, lingering for {:?}",
            self.state.in_order(),
            self.config.linger
        );

        let deadline = Instant::now() + self.config.linger;
        loop {
            let now = Instant::now();
            if self.stop.is_stopped() || now >= deadline {
                break;
            }
            match timeout(deadline - now, self.socket.recv_from()).await {
                Ok(Ok((Packet::Data { .. }, addr))) if addr == peer => {
                    if let Some(ack) = self.state.last_ack() {
                        let ack = ack.clone();
                        self.socket.send_to(&ack, peer).await?;
                    }
                }
                Ok(Ok(_)) => {}
                Ok(Err(SocketError::Frame(_))) => {}
                Ok(Err(e)) => return Err(e.into()),
                Err(_elapsed) => break,
            }
        }

        log::info!("[receiver] transfer complete");
        Ok(self.state.reassemble())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_handle_is_monotonic_and_shared() {
        let stop = StopHandle::new();
        let peer = stop.clone();
        assert!(!stop.is_stopped());

        peer.stop();
        assert!(stop.is_stopped());
        assert!(peer.is_stopped());

        // Raising it again changes nothing.
        stop.stop();
        assert!(stop.is_stopped());
    }

    #[test]
    fn transfer_error_formats() {
        let e = TransferError::from(SenderError::FileTooLarge { packets: 70_000 });
        assert!(e.to_string().contains("70000"));
        assert!(TransferError::Stopped.to_string().contains("stopped"));
    }
}
