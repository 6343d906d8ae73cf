//! Tunable protocol parameters.
//!
//! Everything that is a policy choice rather than a protocol invariant lives
//! here: payload size, RTO clamps, congestion-window bounds, timing of the
//! receiver's keepalive ack.  The defaults are sized for a lossy link with a
//! round-trip time in the tens of milliseconds; all fields are public so
//! callers (and tests) can override selectively with struct-update syntax.

use std::time::Duration;

use crate::packet::MAX_PAYLOAD;

/// Adjustable transfer parameters.
#[derive(Debug, Clone)]
pub struct Config {
    /// Payload bytes per data frame.  Clamped to [`MAX_PAYLOAD`].
    pub payload_size: usize,

    /// Seed for the smoothed RTT before any sample arrives.
    pub initial_rtt: Duration,
    /// Floor for the retransmission timeout.  Must exceed the one-way
    /// latency of the channel or every frame times out spuriously.
    pub min_rto: Duration,
    /// Ceiling for the retransmission timeout.
    pub max_rto: Duration,
    /// Ceiling for the RTO back-off multiplier.
    pub max_backoff: u32,

    /// Congestion window at start of transfer, in frames.
    pub initial_cwnd: f64,
    /// Slow-start threshold at start of transfer, in frames.
    pub initial_ssthresh: f64,
    /// The window never decreases below this.
    pub min_cwnd: f64,
    /// The window never grows beyond this.
    pub max_cwnd: f64,
    /// CUBIC aggressiveness constant (C).
    pub cubic_c: f64,
    /// CUBIC multiplicative-decrease factor (β).
    pub cubic_beta: f64,

    /// Receiver idle interval after which the latest ack is re-sent, so a
    /// sender whose acks are all being lost can still make progress.
    pub ack_keepalive: Duration,
    /// How long the receiver keeps answering retransmitted data frames
    /// after the transfer completed, in case its final ack was lost.
    pub linger: Duration,
    /// Bounded pause at the end of an idle sender loop iteration.
    pub idle_tick: Duration,
    /// Maximum fresh frames admitted per loop iteration.
    pub max_burst: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            payload_size: MAX_PAYLOAD,
            initial_rtt: Duration::from_millis(100),
            min_rto: Duration::from_millis(100),
            max_rto: Duration::from_secs(3),
            max_backoff: 16,
            initial_cwnd: 4.0,
            initial_ssthresh: 64.0,
            min_cwnd: 2.0,
            max_cwnd: 256.0,
            cubic_c: 0.4,
            cubic_beta: 0.7,
            ack_keepalive: Duration::from_millis(300),
            linger: Duration::from_secs(1),
            idle_tick: Duration::from_millis(1),
            max_burst: 32,
        }
    }
}

impl Config {
    /// Effective payload size after clamping to the wire-format maximum.
    pub fn frame_payload(&self) -> usize {
        self.payload_size.clamp(1, MAX_PAYLOAD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_consistent() {
        let cfg = Config::default();
        assert!(cfg.min_rto <= cfg.max_rto);
        assert!(cfg.min_cwnd <= cfg.initial_cwnd);
        assert!(cfg.initial_cwnd <= cfg.max_cwnd);
        assert!(cfg.cubic_beta > 0.0 && cfg.cubic_beta < 1.0);
        assert_eq!(cfg.frame_payload(), MAX_PAYLOAD);
    }

    #[test]
    fn frame_payload_clamps() {
        let cfg = Config {
            payload_size: 0,
            ..Config::default()
        };
        assert_eq!(cfg.frame_payload(), 1);

        let cfg = Config {
            payload_size: MAX_PAYLOAD * 4,
            ..Config::default()
        };
        assert_eq!(cfg.frame_payload(), MAX_PAYLOAD);
    }
}
