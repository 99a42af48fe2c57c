//! RoomSync Core
//!
//! Synchronized playback for shared listening rooms. Every peer estimates
//! its offset to the room's reference clock, executes playback commands at
//! agreed instants on that shared timeline, and attenuates the audio by its
//! distance from a virtual source.
//!
//! # Architecture
//!
//! - **sync**: probe samples, offset estimation, synchronized clock
//! - **executor**: scheduled command execution against a media engine
//! - **spatial**: distance-based gain model
//! - **protocol**: room wire messages
//! - **channel**: message channel seam to the room
//! - **session**: orchestrator tying the above together

#![warn(clippy::all)]

pub mod channel;
pub mod config;
pub mod error;
pub mod executor;
pub mod protocol;
pub mod session;
pub mod spatial;
pub mod sync;

pub use channel::{MemoryChannel, MessageChannel};
pub use config::{Config, ConfigError};
pub use error::{Error, Result};
pub use executor::{
    CommandExecutor, CommandId, CommandKind, CommandPayload, MediaEngine, MediaError,
    PlaybackState, PlaybackStatus, ScheduleError, ScheduleOutcome, ScheduledCommand,
};
pub use protocol::{AudioCommand, ClientInfo, InboundMessage, OutboundMessage, TrackInfo};
pub use session::{MembershipUpdate, SessionIdentity, SessionStatus, SyncSession};
pub use spatial::{attenuation, gain_map, GainMap, Peer, Position, SpatialMode};
pub use sync::{
    EstimatorPolicy, LocalClock, MonotonicClock, OffsetEstimate, OffsetEstimator, Sample,
    SynchronizedClock,
};

/// Initialize tracing with `RUST_LOG`, defaulting to `info`.
///
/// Safe to call more than once; later calls leave the first subscriber in place.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}

/// Crate version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
