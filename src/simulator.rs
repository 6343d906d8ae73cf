//! Network simulator for deterministic testing.
//!
//! Real networks drop, reorder, duplicate, and corrupt packets.  To exercise
//! the reliability mechanisms without depending on actual network
//! conditions, this module provides a [`Simulator`]: a UDP relay that sits
//! between the two endpoints and applies a configurable fault model to every
//! datagram it forwards:
//!
//! | Fault         | Description                                        |
//! |---------------|----------------------------------------------------|
//! | Packet loss   | Drop a datagram with probability `loss_rate`.      |
//! | Reordering    | Delay a datagram by `reorder_delay`, letting later |
//! |               | datagrams overtake it.                             |
//! | Duplication   | Deliver a datagram twice.                          |
//! | Corruption    | Flip one random bit in the frame header.           |
//!
//! Both endpoints address the relay instead of each other; the relay learns
//! which direction a datagram travels from its source address.  Corruption
//! happens at the byte level, below the codec, so the integrity check is
//! exercised exactly as it would be on a real link.  Flips land in the
//! checksummed header region: payload bits are not covered by the integrity
//! byte, so flipping them would silently alter the delivered file instead
//! of exercising the protocol's recovery path.
//!
//! The RNG is seeded so a failing test reproduces.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use crate::packet::DATA_HEADER;

/// Configuration for the fault-injection model.
///
/// All probabilities are in the range `[0.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Probability that any given datagram is silently dropped.
    pub loss_rate: f64,
    /// Probability that a datagram is reordered (delivered late).
    pub reorder_rate: f64,
    /// Delay applied to reordered datagrams.
    pub reorder_delay: Duration,
    /// Probability that a datagram is delivered twice.
    pub duplicate_rate: f64,
    /// Probability that one bit of the frame header is flipped.
    pub corrupt_rate: f64,
    /// RNG seed, so failures reproduce.
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // No faults by default — the simulator is a transparent relay.
        Self {
            loss_rate: 0.0,
            reorder_rate: 0.0,
            reorder_delay: Duration::from_millis(20),
            duplicate_rate: 0.0,
            corrupt_rate: 0.0,
            seed: 0,
        }
    }
}

/// A fault-injecting relay between two fixed endpoints.
pub struct Simulator {
    /// Address both endpoints should talk to.
    pub local_addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl Simulator {
    /// Bind a relay on loopback that shuttles datagrams between `a` and
    /// `b`, applying the fault model in both directions.
    pub async fn spawn(
        a: SocketAddr,
        b: SocketAddr,
        config: SimulatorConfig,
    ) -> io::Result<Self> {
        let socket = UdpSocket::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
        let local_addr = socket.local_addr()?;
        let handle = tokio::spawn(relay(Arc::new(socket), a, b, config));
        Ok(Self { local_addr, handle })
    }
}

impl Drop for Simulator {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn relay(socket: Arc<UdpSocket>, a: SocketAddr, b: SocketAddr, config: SimulatorConfig) {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut buf = [0u8; 2048];

    loop {
        let (n, from) = match socket.recv_from(&mut buf).await {
            Ok(v) => v,
            Err(e) => {
                log::warn!("[sim] relay socket error: {e}");
                return;
            }
        };
        let dest = if from == a {
            b
        } else if from == b {
            a
        } else {
            log::debug!("[sim] datagram from unknown endpoint {from}");
            continue;
        };

        if rng.gen_bool(config.loss_rate) {
            log::trace!("[sim] dropped {n}B {from} → {dest}");
            continue;
        }

        let mut bytes = buf[..n].to_vec();
        if n >= 2 && rng.gen_bool(config.corrupt_rate) {
            let byte = rng.gen_range(1..DATA_HEADER.min(n));
            let bit = rng.gen_range(0..8);
            bytes[byte] ^= 1 << bit;
            log::trace!("[sim] flipped bit {bit} of byte {byte}, {from} → {dest}");
        }

        let copies = if rng.gen_bool(config.duplicate_rate) { 2 } else { 1 };

        if rng.gen_bool(config.reorder_rate) {
            // Hold the datagram back; whatever arrives meanwhile overtakes.
            let socket = Arc::clone(&socket);
            let delay = config.reorder_delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                for _ in 0..copies {
                    let _ = socket.send_to(&bytes, dest).await;
                }
            });
        } else {
            for _ in 0..copies {
                let _ = socket.send_to(&bytes, dest).await;
            }
        }
    }
}
