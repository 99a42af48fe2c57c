//! Round-trip timing samples
//!
//! One probe/reply exchange yields four timestamps:
//!
//! ```text
//!  peer      sent_at ──────────────────────────────► received_at
//!                     \                             /
//!  reference           reference_start ─► reference_end
//! ```
//!
//! `sent_at` and `received_at` are read from the peer's local clock,
//! `reference_start` and `reference_end` from the reference clock.

use serde::{Deserialize, Serialize};

/// Network round-trip time of one exchange, excluding time spent at the reference.
///
/// `rtt = received_at - sent_at - (reference_end - reference_start)`
pub fn round_trip_ms(sent_at: f64, reference_start: f64, reference_end: f64, received_at: f64) -> f64 {
    (received_at - sent_at) - (reference_end - reference_start)
}

/// Offset of the reference clock relative to the local clock.
///
/// `offset = ((reference_start - sent_at) + (reference_end - received_at)) / 2`
///
/// Positive means the reference is ahead: `reference_time ~= local_time + offset`.
pub fn clock_offset_ms(sent_at: f64, reference_start: f64, reference_end: f64, received_at: f64) -> f64 {
    ((reference_start - sent_at) + (reference_end - received_at)) / 2.0
}

/// One round-trip measurement
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Local time the probe was sent
    pub sent_at_ms: f64,
    /// Reference time the probe was received
    pub reference_start_ms: f64,
    /// Reference time the reply was sent
    pub reference_end_ms: f64,
    /// Local time the reply was received
    pub received_at_ms: f64,
    /// Derived round-trip time
    pub rtt_ms: f64,
    /// Derived clock offset
    pub offset_ms: f64,
}

impl Sample {
    /// Build a sample from the four exchange timestamps.
    ///
    /// Returns `None` when the timestamps cannot describe a real exchange:
    /// any of them non-finite, or a negative round trip.
    pub fn from_timestamps(
        sent_at_ms: f64,
        reference_start_ms: f64,
        reference_end_ms: f64,
        received_at_ms: f64,
    ) -> Option<Self> {
        let all_finite = [sent_at_ms, reference_start_ms, reference_end_ms, received_at_ms]
            .iter()
            .all(|t| t.is_finite());
        if !all_finite {
            return None;
        }

        let rtt_ms = round_trip_ms(sent_at_ms, reference_start_ms, reference_end_ms, received_at_ms);
        if rtt_ms < 0.0 {
            return None;
        }

        Some(Self {
            sent_at_ms,
            reference_start_ms,
            reference_end_ms,
            received_at_ms,
            rtt_ms,
            offset_ms: clock_offset_ms(sent_at_ms, reference_start_ms, reference_end_ms, received_at_ms),
        })
    }
}
