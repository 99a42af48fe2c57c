//! Scheduled playback commands

use serde::{Deserialize, Serialize};
use std::fmt;

/// Control kind of a command; one pending timer exists per kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    /// Start or resume playback
    Play,
    /// Pause playback
    Pause,
    /// Reposition playback
    Seek,
}

impl CommandKind {
    /// Wire name of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Play => "play",
            CommandKind::Pause => "pause",
            CommandKind::Seek => "seek",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific payload
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CommandPayload {
    /// Play from `position_ms`, or resume where the media is if `None`
    Play {
        /// Track position at the target instant
        position_ms: Option<f64>,
    },
    /// Pause, optionally parking the media at `resume_position_ms`
    Pause {
        /// Track position to hold while paused
        resume_position_ms: Option<f64>,
    },
    /// Move to `position_ms`
    Seek {
        /// Track position at the target instant
        position_ms: f64,
        /// Playing state after the seek; `None` keeps the current state
        resume_playing: Option<bool>,
    },
}

/// A playback action bound to an instant on the synchronized timeline
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScheduledCommand {
    /// Synchronized-clock instant the action takes effect
    pub target_instant_ms: f64,
    /// What to do
    pub payload: CommandPayload,
}

impl ScheduledCommand {
    /// Play at `target_instant_ms`
    pub fn play(target_instant_ms: f64, position_ms: Option<f64>) -> Self {
        Self {
            target_instant_ms,
            payload: CommandPayload::Play { position_ms },
        }
    }

    /// Pause at `target_instant_ms`
    pub fn pause(target_instant_ms: f64, resume_position_ms: Option<f64>) -> Self {
        Self {
            target_instant_ms,
            payload: CommandPayload::Pause { resume_position_ms },
        }
    }

    /// Seek at `target_instant_ms`
    pub fn seek(target_instant_ms: f64, position_ms: f64, resume_playing: Option<bool>) -> Self {
        Self {
            target_instant_ms,
            payload: CommandPayload::Seek {
                position_ms,
                resume_playing,
            },
        }
    }

    /// Control kind of the payload
    pub fn kind(&self) -> CommandKind {
        match self.payload {
            CommandPayload::Play { .. } => CommandKind::Play,
            CommandPayload::Pause { .. } => CommandKind::Pause,
            CommandPayload::Seek { .. } => CommandKind::Seek,
        }
    }
}

/// Local sequence number assigned to each accepted command
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CommandId(pub u64);

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cmd-{}", self.0)
    }
}
