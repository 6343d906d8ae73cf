//! Send-side state machine: window tracking, loss detection, retransmission.
//!
//! [`SenderState`] owns the per-sequence tables and the two controllers
//! (RTT, congestion) for one transfer.  Each loop iteration of the driver
//! runs three phases against it, in this order:
//!
//! 1. **Ack ingestion** — [`handle_ack`] slides `send_base` over the
//!    cumulative ack, marks SACKed slots, feeds Karn-eligible RTT samples,
//!    grows the congestion window, and returns the fast retransmissions the
//!    ack's gaps demand.
//! 2. **Timeout scan** — [`due_retransmits`] sweeps the in-flight range for
//!    slots whose RTO expired.
//! 3. **Window admission** — [`admit`] releases fresh sequences while the
//!    congestion window has room.
//!
//! # Sequence-number layout
//!
//! ```text
//!  send_base          next_seq
//!      │                  │
//!  ────┼──────────────────┼──────────────────▶ seq space
//!      │ <── in flight ──▶│ <── unsent ─────▶
//! ```
//!
//! Every slot below `send_base` is acknowledged; every slot at or beyond
//! `next_seq` has never been transmitted.  A slot's life is
//! unsent → in flight → (retransmitting →)* acknowledged.
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility.
//!
//! [`handle_ack`]: SenderState::handle_ack
//! [`due_retransmits`]: SenderState::due_retransmits
//! [`admit`]: SenderState::admit

use std::time::{Duration, Instant};

use crate::config::Config;
use crate::congestion::CongestionController;
use crate::packet::{Packet, SACK_WIDTH};
use crate::rtt::RttEstimator;

/// How many identical head-of-line acks signal a loss the mask cannot
/// express (the mask is base-relative; it can never name `send_base`).
const DUP_ACK_THRESHOLD: u32 = 2;

/// Fraction of the RTO that must elapse before a gap is retransmitted a
/// second time, so an ack racing a probe still in flight does not trigger
/// another copy.
const REPROBE_RTO_FRACTION: f64 = 0.7;

/// Counters accumulated over one transfer, reported when the sender
/// finishes and asserted on by the loss-scenario tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    /// Fresh frames admitted through the congestion window.
    pub frames_sent: u64,
    /// Retransmissions, from SACK gaps, duplicate acks, and timeouts.
    pub retransmits: u64,
    /// Frames retransmitted specifically by the RTO scan.
    pub timeouts: u64,
    /// Valid acks ingested.
    pub acks: u64,
    /// Head-of-line duplicate acks observed.
    pub dup_acks: u64,
    /// Congestion-window decreases actually applied (post-deduplication).
    pub loss_events: u64,
}

/// Errors raised while preparing a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenderError {
    /// The file needs more frames than the 16-bit sequence space holds.
    FileTooLarge { packets: usize },
}

impl std::fmt::Display for SenderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FileTooLarge { packets } => write!(
                f,
                "file spans {packets} frames, exceeding the {} the sequence space allows",
                u16::MAX
            ),
        }
    }
}

impl std::error::Error for SenderError {}

/// Send-side state for one transfer.
#[derive(Debug)]
pub struct SenderState {
    /// Prebuilt wire bytes for every data frame, built once up front.
    frames: Vec<Vec<u8>>,
    acked: Vec<bool>,
    /// Wall-clock of the most recent transmission, `None` while unsent.
    sent_at: Vec<Option<Instant>>,
    /// Karn flag: once set, the slot no longer produces RTT samples.
    retransmitted: Vec<bool>,

    /// Smallest unacknowledged sequence (left window edge).
    send_base: usize,
    /// Next never-transmitted sequence.
    next_seq: usize,
    total: usize,

    rtt: RttEstimator,
    cc: CongestionController,

    /// Duplicate-ack tracking for the head-of-line slot.  `None` until the
    /// first ack is processed: base 0 is a legitimate first ack, not a
    /// repeat of anything.
    last_ack_base: Option<usize>,
    dup_count: u32,

    max_burst: usize,
    stats: TransferStats,
}

impl SenderState {
    /// Chop `data` into frames and initialise the tracking tables.
    ///
    /// An empty file still produces one (empty) frame, so the receiver has
    /// something to learn the total from.
    pub fn new(data: &[u8], config: &Config) -> Result<Self, SenderError> {
        let chunk = config.frame_payload();
        let total = data.len().div_ceil(chunk).max(1);
        if total > usize::from(u16::MAX) {
            return Err(SenderError::FileTooLarge { packets: total });
        }

        let frames = (0..total)
            .map(|i| {
                let lo = i * chunk;
                let hi = (lo + chunk).min(data.len());
                Packet::Data {
                    seq: i as u16,
                    total: total as u16,
                    payload: data[lo..hi].to_vec(),
                }
                .encode()
            })
            .collect();

        Ok(Self {
            frames,
            acked: vec![false; total],
            sent_at: vec![None; total],
            retransmitted: vec![false; total],
            send_base: 0,
            next_seq: 0,
            total,
            rtt: RttEstimator::new(config),
            cc: CongestionController::new(config),
            last_ack_base: None,
            dup_count: 0,
            max_burst: config.max_burst,
            stats: TransferStats::default(),
        })
    }

    /// Ingest one ack, then derive loss recovery from it.
    ///
    /// Returns the sequences to put back on the wire right now: SACK-gap
    /// fast retransmissions plus, on the second duplicate head-of-line ack,
    /// the `send_base` slot itself.  An ack whose base lies beyond
    /// `next_seq` is corrupt and ignored wholesale.
    pub fn handle_ack(&mut self, base: u16, mask: u64, now: Instant) -> Vec<u16> {
        let base = usize::from(base);
        if base > self.next_seq || base > self.total {
            return Vec::new();
        }
        self.stats.acks += 1;

        // ── Phase A: cumulative + selective ingestion ────────────────────
        let mut newly_acked = 0u32;
        while self.send_base < base {
            let s = self.send_base;
            if !self.acked[s] {
                self.take_rtt_sample(s, now);
                self.acked[s] = true;
                newly_acked += 1;
            }
            self.send_base += 1;
        }

        let horizon = self.next_seq.min(self.total);
        for i in 0..SACK_WIDTH {
            if mask >> i & 1 == 0 {
                continue;
            }
            let s = base + i;
            if s >= horizon {
                break;
            }
            if !self.acked[s] {
                self.take_rtt_sample(s, now);
                self.acked[s] = true;
                newly_acked += 1;
            }
        }

        if newly_acked > 0 {
            self.cc.on_ack(newly_acked, now);
        }

        // ── Phase B: loss recovery ───────────────────────────────────────
        let mut retransmit = self.sack_gaps(base, mask, now);

        if self.last_ack_base == Some(base) && base == self.send_base && self.send_base < self.next_seq
        {
            self.dup_count += 1;
            self.stats.dup_acks += 1;
            if self.dup_count >= DUP_ACK_THRESHOLD {
                self.dup_count = 0;
                let s = self.send_base;
                if !self.acked[s] && !self.probe_in_flight(s, now) {
                    self.mark_retransmit(s, now);
                    retransmit.push(s as u16);
                    if self.cc.on_loss(now, self.rtt.srtt()) {
                        self.stats.loss_events += 1;
                    }
                }
            }
        } else {
            self.last_ack_base = Some(base);
            self.dup_count = 0;
        }

        retransmit
    }

    /// SACK fast retransmit: every unacknowledged slot below the highest
    /// set mask bit whose own bit is clear was overtaken on the wire and is
    /// presumed lost.
    fn sack_gaps(&mut self, base: usize, mask: u64, now: Instant) -> Vec<u16> {
        let mut retransmit = Vec::new();
        if mask == 0 {
            return retransmit;
        }

        let highest = 63 - mask.leading_zeros() as usize;
        let horizon = self.next_seq.min(self.total);
        let mut loss_signalled = false;

        for i in 0..highest {
            if mask >> i & 1 == 1 {
                continue;
            }
            let s = base + i;
            if s >= horizon {
                break;
            }
            if self.acked[s] || self.probe_in_flight(s, now) {
                continue;
            }

            self.mark_retransmit(s, now);
            retransmit.push(s as u16);
            if !loss_signalled {
                loss_signalled = true;
                if self.cc.on_loss(now, self.rtt.srtt()) {
                    self.stats.loss_events += 1;
                }
            }
        }
        retransmit
    }

    /// Sweep the in-flight range for expired slots.
    ///
    /// Any hit doubles the RTO back-off and notifies the congestion
    /// controller once (further decreases inside one RTT are deduplicated
    /// there anyway).
    pub fn due_retransmits(&mut self, now: Instant) -> Vec<u16> {
        let rto = self.rtt.rto();
        let mut expired = Vec::new();
        for s in self.send_base..self.next_seq {
            if self.acked[s] {
                continue;
            }
            if self.sent_at[s].is_some_and(|t| now.duration_since(t) > rto) {
                self.mark_retransmit(s, now);
                expired.push(s as u16);
            }
        }

        if !expired.is_empty() {
            self.stats.timeouts += expired.len() as u64;
            self.rtt.back_off();
            if self.cc.on_timeout(now, self.rtt.srtt()) {
                self.stats.loss_events += 1;
            }
        }
        expired
    }

    /// Release fresh sequences while the congestion window has room,
    /// bounded by the per-iteration burst cap.
    pub fn admit(&mut self, now: Instant) -> Vec<u16> {
        let window = self.cc.window();
        let mut in_flight = self.in_flight();
        let mut fresh = Vec::new();

        while self.next_seq < self.total && in_flight < window && fresh.len() < self.max_burst {
            let s = self.next_seq;
            self.sent_at[s] = Some(now);
            self.retransmitted[s] = false;
            self.next_seq += 1;
            in_flight += 1;
            self.stats.frames_sent += 1;
            fresh.push(s as u16);
        }
        fresh
    }

    /// A recently retransmitted slot may just be a probe still in flight;
    /// give it a fraction of the RTO before sending yet another copy.
    fn probe_in_flight(&self, s: usize, now: Instant) -> bool {
        let reprobe_after = self.rtt.rto().mul_f64(REPROBE_RTO_FRACTION);
        self.retransmitted[s]
            && self.sent_at[s].is_some_and(|t| now.duration_since(t) < reprobe_after)
    }

    /// Karn's rule: a slot that was ever retransmitted never contributes a
    /// sample, because the ack could belong to either transmission.
    fn take_rtt_sample(&mut self, s: usize, now: Instant) {
        if self.retransmitted[s] {
            return;
        }
        if let Some(sent) = self.sent_at[s] {
            self.rtt.sample(now.duration_since(sent));
        }
    }

    fn mark_retransmit(&mut self, s: usize, now: Instant) {
        self.sent_at[s] = Some(now);
        self.retransmitted[s] = true;
        self.stats.retransmits += 1;
    }

    /// Prebuilt wire bytes for `seq`.
    pub fn frame(&self, seq: u16) -> &[u8] {
        &self.frames[usize::from(seq)]
    }

    /// Transmitted-but-unacknowledged frame count.
    pub fn in_flight(&self) -> usize {
        (self.send_base..self.next_seq)
            .filter(|&s| !self.acked[s])
            .count()
    }

    /// `true` once every frame is acknowledged.
    pub fn is_complete(&self) -> bool {
        self.send_base >= self.total
    }

    pub fn send_base(&self) -> usize {
        self.send_base
    }

    pub fn next_seq(&self) -> usize {
        self.next_seq
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn stats(&self) -> TransferStats {
        self.stats
    }

    /// Congestion window as currently tracked, for logging.
    pub fn cwnd(&self) -> f64 {
        self.cc.cwnd()
    }

    /// Current retransmission timeout, for logging and driver pacing.
    pub fn rto(&self) -> Duration {
        self.rtt.rto()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            payload_size: 4,
            ..Config::default()
        }
    }

    /// Helper: a sender over `n` four-byte frames with everything admitted.
    fn primed_sender(n: usize, now: Instant) -> SenderState {
        let cfg = Config {
            initial_cwnd: n as f64,
            initial_ssthresh: n as f64 * 2.0,
            max_cwnd: 1024.0,
            max_burst: n.max(1),
            ..config()
        };
        let data: Vec<u8> = (0..n * 4).map(|b| b as u8).collect();
        let mut s = SenderState::new(&data, &cfg).expect("in range");
        let admitted = s.admit(now);
        assert_eq!(admitted.len(), n);
        s
    }

    #[test]
    fn chops_file_into_frames() {
        let s = SenderState::new(&[0u8; 10], &config()).expect("in range");
        assert_eq!(s.total(), 3); // 4 + 4 + 2
        let last = Packet::decode(s.frame(2)).expect("decodes");
        assert_eq!(
            last,
            Packet::Data {
                seq: 2,
                total: 3,
                payload: vec![0, 0]
            }
        );
    }

    #[test]
    fn empty_file_still_sends_one_frame() {
        let s = SenderState::new(&[], &config()).expect("in range");
        assert_eq!(s.total(), 1);
        assert_eq!(
            Packet::decode(s.frame(0)).expect("decodes"),
            Packet::Data {
                seq: 0,
                total: 1,
                payload: vec![]
            }
        );
    }

    #[test]
    fn oversized_file_rejected() {
        let cfg = Config {
            payload_size: 1,
            ..Config::default()
        };
        let data = vec![0u8; usize::from(u16::MAX) + 1];
        assert_eq!(
            SenderState::new(&data, &cfg).unwrap_err(),
            SenderError::FileTooLarge {
                packets: usize::from(u16::MAX) + 1
            }
        );
    }

    #[test]
    fn admission_respects_congestion_window() {
        let cfg = Config {
            initial_cwnd: 4.0,
            ..config()
        };
        let mut s = SenderState::new(&[0u8; 64], &cfg).expect("in range");
        let now = Instant::now();

        let fresh = s.admit(now);
        assert_eq!(fresh, vec![0, 1, 2, 3]);
        assert_eq!(s.in_flight(), 4);

        // Window full: nothing further until acks open it.
        assert!(s.admit(now).is_empty());
    }

    #[test]
    fn admission_respects_burst_cap() {
        let cfg = Config {
            initial_cwnd: 16.0,
            max_burst: 3,
            ..config()
        };
        let mut s = SenderState::new(&[0u8; 64], &cfg).expect("in range");
        let now = Instant::now();
        assert_eq!(s.admit(now).len(), 3);
        assert_eq!(s.admit(now).len(), 3);
    }

    #[test]
    fn cumulative_ack_slides_base() {
        let now = Instant::now();
        let mut s = primed_sender(8, now);

        let retx = s.handle_ack(5, 0, now + Duration::from_millis(40));
        assert!(retx.is_empty());
        assert_eq!(s.send_base(), 5);
        assert_eq!(s.in_flight(), 3);
        assert!(!s.is_complete());
    }

    #[test]
    fn sack_marks_out_of_order_slots() {
        let now = Instant::now();
        let mut s = primed_sender(8, now);

        // Base still 0, frames 2 and 4 arrived out of order.
        let retx = s.handle_ack(0, (1 << 2) | (1 << 4), now + Duration::from_millis(10));
        assert_eq!(s.send_base(), 0);
        assert_eq!(s.in_flight(), 6);
        // Gaps below the highest bit: slots 0, 1, 3.
        assert_eq!(retx, vec![0, 1, 3]);
        // The very first ack can never be a head-of-line repeat.
        assert_eq!(s.stats().dup_acks, 0);
    }

    #[test]
    fn corrupt_ack_base_rejected() {
        let now = Instant::now();
        let mut s = primed_sender(4, now);

        // Base beyond anything transmitted: whole ack discarded.
        let retx = s.handle_ack(4000, u64::MAX, now);
        assert!(retx.is_empty());
        assert_eq!(s.send_base(), 0);
        assert_eq!(s.stats().acks, 0);
    }

    #[test]
    fn ack_replay_is_idempotent() {
        let now = Instant::now();
        let mut s = primed_sender(8, now);
        let later = now + Duration::from_millis(30);

        s.handle_ack(3, 1 << 2, later);
        let base = s.send_base();
        let in_flight = s.in_flight();
        let cwnd = s.cwnd();
        let rto = s.rto();

        // The identical ack again: window, tables and controllers hold.
        let retx = s.handle_ack(3, 1 << 2, later + Duration::from_millis(1));
        assert!(retx.is_empty());
        assert_eq!(s.send_base(), base);
        assert_eq!(s.in_flight(), in_flight);
        assert_eq!(s.cwnd(), cwnd);
        assert_eq!(s.rto(), rto);
    }

    #[test]
    fn completion_on_full_ack() {
        let now = Instant::now();
        let mut s = primed_sender(4, now);
        s.handle_ack(4, 0, now + Duration::from_millis(20));
        assert!(s.is_complete());
        assert_eq!(s.in_flight(), 0);
    }

    #[test]
    fn karn_excludes_retransmitted_slots() {
        let now = Instant::now();
        let mut s = primed_sender(4, now);
        let rto_before = s.rto();

        // Force slot 0 through a timeout, then ack it much later.  Were the
        // sample taken, the huge RTT would inflate the estimate; Karn plus
        // the back-off reset on slot 1's genuine sample keeps it sane.
        let expired = s.due_retransmits(now + Duration::from_secs(4));
        assert_eq!(expired, vec![0, 1, 2, 3]);

        let mut s2 = primed_sender(4, now);
        s2.due_retransmits(now + Duration::from_secs(4));
        let rto_backed_off = s2.rto();
        assert!(rto_backed_off > rto_before, "timeout must back off the RTO");

        s2.handle_ack(1, 0, now + Duration::from_secs(60));
        // Slot 0 was retransmitted: the 60 s pseudo-sample is excluded, so
        // the estimate still reflects the initial configuration (modulo the
        // back-off multiplier, which only a genuine sample clears).
        assert_eq!(s2.rto(), rto_backed_off);
    }

    #[test]
    fn fresh_slot_contributes_rtt_sample() {
        let now = Instant::now();
        let mut s = primed_sender(4, now);
        let rto_before = s.rto();

        // Samples just under the seeded SRTT shrink both the estimate and
        // its deviation, pulling the RTO below its configured start.
        s.handle_ack(4, 0, now + Duration::from_millis(90));
        assert!(s.rto() < rto_before);
    }

    #[test]
    fn sack_gap_not_reprobed_within_rto_fraction() {
        let now = Instant::now();
        let mut s = primed_sender(8, now);

        let t1 = now + Duration::from_millis(10);
        let first = s.handle_ack(2, 1 << 3, t1);
        assert_eq!(first, vec![2, 3, 4]);

        // Same evidence a moment later: probes are still in flight.
        let t2 = t1 + Duration::from_millis(5);
        let second = s.handle_ack(2, 1 << 3, t2);
        assert!(second.is_empty(), "reprobed too early: {second:?}");

        // After 0.7·RTO the gaps are fair game again; the head-of-line slot
        // is not duplicated by the dup-ack path, whose own probe is fresh.
        let t3 = t1 + s.rto();
        let third = s.handle_ack(2, 1 << 3, t3);
        assert_eq!(third, vec![2, 3, 4]);
    }

    #[test]
    fn second_duplicate_ack_retransmits_head_of_line() {
        let now = Instant::now();
        let mut s = primed_sender(6, now);

        // Advance the window a little so base == send_base is meaningful.
        s.handle_ack(2, 0, now + Duration::from_millis(10));
        assert_eq!(s.send_base(), 2);

        // First repeat of base 2 only counts.
        let r1 = s.handle_ack(2, 0, now + Duration::from_millis(20));
        assert!(r1.is_empty());
        // Second repeat trips the head-of-line retransmit.
        let r2 = s.handle_ack(2, 0, now + Duration::from_millis(30));
        assert_eq!(r2, vec![2]);
        assert_eq!(s.stats().dup_acks, 2);
        assert!(s.stats().loss_events >= 1);
    }

    /// A fresh sender starts with `send_base == 0`, so an initial ack at
    /// base 0 looks superficially like a repeat of itself.  It is the first
    /// observation, not a duplicate: the retransmit must wait for two
    /// further identical acks.
    #[test]
    fn first_ack_at_base_zero_is_not_a_duplicate() {
        let now = Instant::now();
        let mut s = primed_sender(4, now);

        let r1 = s.handle_ack(0, 0, now + Duration::from_millis(10));
        assert!(r1.is_empty());
        assert_eq!(s.stats().dup_acks, 0);

        let r2 = s.handle_ack(0, 0, now + Duration::from_millis(20)); // dup #1
        assert!(r2.is_empty());
        assert_eq!(s.stats().dup_acks, 1);

        let r3 = s.handle_ack(0, 0, now + Duration::from_millis(30)); // dup #2
        assert_eq!(r3, vec![0]);
        assert_eq!(s.stats().dup_acks, 2);
    }

    #[test]
    fn duplicate_count_resets_when_base_moves() {
        let now = Instant::now();
        let mut s = primed_sender(6, now);
        s.handle_ack(2, 0, now + Duration::from_millis(10));
        s.handle_ack(2, 0, now + Duration::from_millis(20)); // dup #1

        // Progress: the stall is over, the counter must restart.
        s.handle_ack(3, 0, now + Duration::from_millis(30));
        let retx = s.handle_ack(3, 0, now + Duration::from_millis(40)); // dup #1 again
        assert!(retx.is_empty());
    }

    #[test]
    fn timeout_scan_skips_acked_and_fresh_slots() {
        let now = Instant::now();
        let mut s = primed_sender(6, now);
        s.handle_ack(0, (1 << 1) | (1 << 3), now + Duration::from_millis(5));

        // Slots 1 and 3 are SACKed; 0 and 2 were just fast-retransmitted at
        // t+5ms and are fresh.  Only 4 and 5 (sent at t) expire first.
        let expired = s.due_retransmits(now + s.rto() + Duration::from_millis(1));
        assert_eq!(expired, vec![4, 5]);
    }

    #[test]
    fn timeout_scan_empty_before_rto() {
        let now = Instant::now();
        let mut s = primed_sender(4, now);
        assert!(s.due_retransmits(now + Duration::from_millis(1)).is_empty());
        assert_eq!(s.stats().timeouts, 0);
    }

    #[test]
    fn stats_track_retransmissions() {
        let now = Instant::now();
        let mut s = primed_sender(8, now);
        s.handle_ack(0, 1 << 4, now + Duration::from_millis(10));
        let stats = s.stats();
        assert_eq!(stats.frames_sent, 8);
        assert_eq!(stats.retransmits, 4); // gaps 0..4
        assert_eq!(stats.acks, 1);
    }

    /// Invariant from the module docs: base ≤ next ≤ total, slots below the
    /// base acked, slots at or beyond next unsent.
    #[test]
    fn window_invariants_hold_through_churn() {
        let now = Instant::now();
        let mut s = primed_sender(10, now);
        let mut t = now;

        for (base, mask) in [(0u16, 1u64 << 5), (3, 1 << 2), (6, 0), (6, 0), (10, 0)] {
            t += Duration::from_millis(15);
            s.handle_ack(base, mask, t);
            s.due_retransmits(t);
            s.admit(t);

            assert!(s.send_base() <= s.next_seq());
            assert!(s.next_seq() <= s.total());
            assert!((0..s.send_base()).all(|i| s.acked[i]));
            assert!((s.next_seq()..s.total()).all(|i| s.sent_at[i].is_none()));
        }
        assert!(s.is_complete());
    }
}
