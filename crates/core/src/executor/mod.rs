//! Scheduled command execution
//!
//! Commands arrive bound to a synchronized instant; the executor decides
//! whether to act now or arm a timer, and drives the [`MediaEngine`].

pub mod command;
pub mod playback;
pub mod scheduler;

pub use command::{CommandId, CommandKind, CommandPayload, ScheduledCommand};
pub use playback::{MediaEngine, MediaError, PlaybackState, PlaybackStatus};
pub use scheduler::{CommandExecutor, ScheduleError, ScheduleOutcome};
