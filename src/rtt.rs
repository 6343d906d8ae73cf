//! Round-trip-time estimation and retransmission timeout.
//!
//! Reliable delivery requires that unacknowledged frames are re-sent if no
//! ack arrives within a bounded time.  The deadline is computed with a
//! variant of Jacobson's algorithm (RFC 6298):
//!
//! ```text
//!   RTTVAR = 3/4·RTTVAR + 1/4·|SRTT − sample|
//!   SRTT   = 7/8·SRTT   + 1/8·sample
//!   RTO    = (SRTT + 4·RTTVAR) · backoff
//! ```
//!
//! clamped between a configured floor and ceiling.  The back-off multiplier
//! doubles on every retransmission timeout (up to a cap) and snaps back to 1
//! on the next genuine sample.
//!
//! Karn's rule is the caller's job: a sequence whose retransmitted flag is
//! set must never be fed to [`RttEstimator::sample`], because its ack could
//! belong to either transmission and would poison the estimate.

use std::time::Duration;

use crate::config::Config;

/// Smoothed round-trip state for one transfer.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    /// Smoothed RTT estimate (SRTT).
    srtt: Duration,
    /// Mean absolute deviation of samples around SRTT (RTTVAR).
    rttvar: Duration,
    /// Exponential back-off multiplier, ≥ 1.
    backoff: u32,

    min_rto: Duration,
    max_rto: Duration,
    max_backoff: u32,
}

impl RttEstimator {
    /// Seed the estimator from configuration.
    ///
    /// Before the first sample, SRTT is the configured initial RTT and
    /// RTTVAR is half of it, mirroring the RFC 6298 first-measurement rule.
    pub fn new(config: &Config) -> Self {
        Self {
            srtt: config.initial_rtt,
            rttvar: config.initial_rtt / 2,
            backoff: 1,
            min_rto: config.min_rto,
            max_rto: config.max_rto,
            max_backoff: config.max_backoff,
        }
    }

    /// Record one genuine RTT measurement and reset the back-off.
    pub fn sample(&mut self, rtt: Duration) {
        let diff = rtt.abs_diff(self.srtt);
        self.rttvar = self.rttvar * 3 / 4 + diff / 4;
        self.srtt = self.srtt * 7 / 8 + rtt / 8;
        self.backoff = 1;
    }

    /// Current retransmission timeout.
    pub fn rto(&self) -> Duration {
        ((self.srtt + self.rttvar * 4) * self.backoff).clamp(self.min_rto, self.max_rto)
    }

    /// Double the back-off multiplier after a retransmission timeout,
    /// capped so the RTO cannot grow without bound.
    pub fn back_off(&mut self) {
        self.backoff = (self.backoff * 2).min(self.max_backoff);
    }

    /// Smoothed RTT estimate, used to deduplicate congestion events.
    pub fn srtt(&self) -> Duration {
        self.srtt
    }
}
