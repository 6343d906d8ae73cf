//! CUBIC congestion control.
//!
//! The controller owns a real-valued congestion window (`cwnd`, counted in
//! frames) and reacts to three events:
//!
//! - **ack** — below the slow-start threshold the window grows by one frame
//!   per newly acknowledged frame (exponential per RTT); above it the CUBIC
//!   curve steers the window back towards `w_max`, the window size at the
//!   last decrease, then probes beyond it.
//! - **loss** (SACK-derived) — multiplicative decrease: `cwnd ← β·cwnd`.
//! - **timeout** (RTO-derived) — stronger evidence of congestion: the
//!   threshold drops multiplicatively and the window restarts from the
//!   floor in slow start.
//!
//! Both decrease paths share one deduplication clock: a loss event arriving
//! less than one smoothed RTT after the previous one is ignored, so a burst
//! of drops within a single round trip cuts the window exactly once.

use std::time::{Duration, Instant};

use crate::config::Config;

/// Congestion-window state for one transfer.
#[derive(Debug, Clone)]
pub struct CongestionController {
    /// Congestion window, in frames.  Fractional growth accumulates here;
    /// the sender admits `cwnd as usize` frames.
    cwnd: f64,
    /// Below this the window is in slow start.
    ssthresh: f64,
    /// Window size captured at the last decrease (the CUBIC plateau).
    w_max: f64,
    /// Start of the current CUBIC epoch (time of the last decrease).
    epoch_start: Option<Instant>,
    /// Deduplication clock: time of the last honoured loss event.
    last_loss_event: Option<Instant>,

    min_cwnd: f64,
    max_cwnd: f64,
    c: f64,
    beta: f64,
}

impl CongestionController {
    pub fn new(config: &Config) -> Self {
        Self {
            cwnd: config.initial_cwnd,
            ssthresh: config.initial_ssthresh,
            w_max: 0.0,
            epoch_start: None,
            last_loss_event: None,
            min_cwnd: config.min_cwnd,
            max_cwnd: config.max_cwnd,
            c: config.cubic_c,
            beta: config.cubic_beta,
        }
    }

    /// Frames the sender may have in flight right now.
    pub fn window(&self) -> usize {
        self.cwnd as usize
    }

    /// Current window as the controller tracks it, for logging and stats.
    pub fn cwnd(&self) -> f64 {
        self.cwnd
    }

    /// Grow the window for `acked` newly acknowledged frames.
    pub fn on_ack(&mut self, acked: u32, now: Instant) {
        if self.cwnd < self.ssthresh {
            // Slow start: one frame per acked frame.
            self.cwnd = (self.cwnd + f64::from(acked)).min(self.max_cwnd);
            return;
        }

        // CUBIC: w(t) = C·(t − K)³ + w_max, with K the time the curve needs
        // to climb back to the pre-loss plateau.  Before any loss the epoch
        // anchors at the first congestion-avoidance ack.
        let epoch = *self.epoch_start.get_or_insert(now);
        let t = now.duration_since(epoch).as_secs_f64();
        let k = (self.w_max * (1.0 - self.beta) / self.c).cbrt();
        let target = self.c * (t - k).powi(3) + self.w_max;
        let increment = ((target - self.cwnd) / self.cwnd).max(0.0);
        self.cwnd = (self.cwnd + increment * f64::from(acked)).min(self.max_cwnd);
    }

    /// Multiplicative decrease after a SACK-detected loss.
    ///
    /// Returns `false` when the event was swallowed by the per-RTT
    /// deduplication window.
    pub fn on_loss(&mut self, now: Instant, srtt: Duration) -> bool {
        if self.recently_decreased(now, srtt) {
            return false;
        }
        self.last_loss_event = Some(now);

        self.w_max = self.cwnd.max(self.min_cwnd);
        self.cwnd = (self.cwnd * self.beta).max(self.min_cwnd);
        self.ssthresh = self.cwnd;
        self.epoch_start = Some(now);
        true
    }

    /// Collapse after a retransmission timeout: multiplicative threshold
    /// drop, then slow-start restart from the window floor.
    ///
    /// Shares the deduplication clock with [`on_loss`], so an RTO following
    /// hard on a SACK loss does not cut the window twice in one RTT.
    ///
    /// [`on_loss`]: Self::on_loss
    pub fn on_timeout(&mut self, now: Instant, srtt: Duration) -> bool {
        if self.recently_decreased(now, srtt) {
            return false;
        }
        self.last_loss_event = Some(now);

        self.w_max = self.cwnd.max(self.min_cwnd);
        self.ssthresh = (self.cwnd * self.beta).max(self.min_cwnd);
        self.cwnd = self.min_cwnd;
        self.epoch_start = Some(now);
        true
    }

    fn recently_decreased(&self, now: Instant, srtt: Duration) -> bool {
        self.last_loss_event
            .is_some_and(|t| now.duration_since(t) < srtt)
    }
}
