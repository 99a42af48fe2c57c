//! Clock synchronization
//!
//! Peers estimate the offset between their local clock and the room's
//! reference clock from round-trip probes:
//!
//! 1. [`SampleCollector`] gathers a window of [`Sample`]s per round
//! 2. [`OffsetEstimator`] reduces the window to an [`OffsetEstimate`]
//! 3. [`SynchronizedClock`] serves `local_now + offset` to the rest of the core
//!
//! [`ClockSynchronizer`] runs the rounds as a tokio task.

pub mod clock;
pub mod collector;
pub mod estimator;
pub mod sample;
pub mod synchronizer;

pub use clock::{LocalClock, MonotonicClock, SynchronizedClock};
pub use collector::{IgnoreReason, ProbeReply, ReplyOutcome, RoundClose, SampleCollector};
pub use estimator::{EstimatorPolicy, OffsetEstimate, OffsetEstimator};
pub use sample::{clock_offset_ms, round_trip_ms, Sample};
pub use synchronizer::{ClockSynchronizer, SynchronizerEvent, SynchronizerHandle};
