//! Probe bookkeeping for one synchronization round
//!
//! The collector is a plain state machine; [`super::ClockSynchronizer`]
//! drives it from the async side (probe pacing, timeouts, reply delivery).

use super::sample::Sample;
use std::collections::HashSet;

/// A probe reply as delivered by the message channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeReply {
    /// Local send time echoed back by the reference
    pub sent_at_ms: f64,
    /// Reference time the probe arrived
    pub reference_start_ms: f64,
    /// Reference time the reply left
    pub reference_end_ms: f64,
    /// Local time the reply arrived
    pub received_at_ms: f64,
}

/// Why a reply did not enter the window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// No round is open
    NoOpenRound,
    /// Not a probe of the current round, or already answered
    UnknownProbe,
    /// Timestamps do not describe a real exchange
    InvalidTimestamps,
}

/// Result of feeding a reply into the collector
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyOutcome {
    /// Sample recorded, window not yet full
    Recorded {
        /// Samples collected so far this round
        collected: usize,
    },
    /// Window is full; the round is closed
    Complete(Vec<Sample>),
    /// Reply discarded
    Ignored(IgnoreReason),
}

/// Result of closing a round on timeout
#[derive(Debug, Clone, PartialEq)]
pub enum RoundClose {
    /// Enough samples for a degraded estimate
    Partial(Vec<Sample>),
    /// Too few samples; a fresh round must be armed
    Insufficient {
        /// Samples collected before the timeout
        collected: usize,
    },
}

/// Collects round-trip samples into fixed-size windows
#[derive(Debug)]
pub struct SampleCollector {
    probes_per_round: usize,
    min_samples: usize,
    round: u64,
    open: bool,
    outstanding: HashSet<u64>,
    window: Vec<Sample>,
}

impl SampleCollector {
    /// Create a collector for windows of `probes_per_round` samples.
    ///
    /// `min_samples` is the smallest partial window accepted on timeout.
    pub fn new(probes_per_round: usize, min_samples: usize) -> Self {
        Self {
            probes_per_round,
            min_samples: min_samples.max(1),
            round: 0,
            open: false,
            outstanding: HashSet::with_capacity(probes_per_round),
            window: Vec::with_capacity(probes_per_round),
        }
    }

    /// Discard any previous window and open a new round
    pub fn begin_round(&mut self) -> u64 {
        self.round += 1;
        self.open = true;
        self.outstanding.clear();
        self.window.clear();
        self.round
    }

    /// Current round number (0 before the first round)
    pub fn round(&self) -> u64 {
        self.round
    }

    /// Whether a round is open
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Samples collected in the current round
    pub fn collected(&self) -> usize {
        self.window.len()
    }

    /// Window size
    pub fn probes_per_round(&self) -> usize {
        self.probes_per_round
    }

    /// Record that a probe stamped `sent_at_ms` went out in this round
    pub fn register_probe(&mut self, sent_at_ms: f64) {
        if self.open {
            self.outstanding.insert(sent_at_ms.to_bits());
        }
    }

    /// Feed a reply into the current window
    pub fn on_reply(&mut self, reply: ProbeReply) -> ReplyOutcome {
        if !self.open {
            return ReplyOutcome::Ignored(IgnoreReason::NoOpenRound);
        }
        if !self.outstanding.remove(&reply.sent_at_ms.to_bits()) {
            return ReplyOutcome::Ignored(IgnoreReason::UnknownProbe);
        }

        let Some(sample) = Sample::from_timestamps(
            reply.sent_at_ms,
            reply.reference_start_ms,
            reply.reference_end_ms,
            reply.received_at_ms,
        ) else {
            return ReplyOutcome::Ignored(IgnoreReason::InvalidTimestamps);
        };

        self.window.push(sample);
        if self.window.len() >= self.probes_per_round {
            self.open = false;
            self.outstanding.clear();
            return ReplyOutcome::Complete(std::mem::take(&mut self.window));
        }

        ReplyOutcome::Recorded {
            collected: self.window.len(),
        }
    }

    /// Close the round after its timeout.
    ///
    /// Late replies for this round are ignored afterwards.
    pub fn close_round(&mut self) -> RoundClose {
        self.open = false;
        self.outstanding.clear();

        let window = std::mem::take(&mut self.window);
        if window.len() >= self.min_samples {
            RoundClose::Partial(window)
        } else {
            RoundClose::Insufficient {
                collected: window.len(),
            }
        }
    }
}
