//! Media engine seam and local playback state

use super::command::{CommandId, CommandKind, CommandPayload, ScheduledCommand};
use serde::{Deserialize, Serialize};

/// Playback state machine
///
/// `Stopped -> Playing <-> Paused`; seeks keep the state unless they say otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    /// Nothing played yet
    #[default]
    Stopped,
    /// Media is playing
    Playing,
    /// Media is paused
    Paused,
}

/// Errors reported by a media engine
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MediaError {
    /// No media is loaded
    #[error("no media loaded")]
    NotLoaded,

    /// Backend failure
    #[error("media backend error: {0}")]
    Backend(String),
}

/// Media collaborator driven by the executor.
///
/// Calls are made while the executor holds its state lock and must not block.
pub trait MediaEngine: Send {
    /// Start playing; from `position_ms` if given, otherwise where the media is
    fn play_from(&mut self, position_ms: Option<f64>) -> Result<(), MediaError>;

    /// Pause playback
    fn pause(&mut self) -> Result<(), MediaError>;

    /// Move the playhead without changing the playing state
    fn seek(&mut self, position_ms: f64) -> Result<(), MediaError>;

    /// Set output gain in `[0, 1]`
    fn set_gain(&mut self, gain: f64) -> Result<(), MediaError>;
}

/// Snapshot of the last executed command and the state it left behind
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PlaybackStatus {
    /// Current state
    pub state: PlaybackState,
    /// Last executed command
    pub current_command: Option<CommandId>,
    /// Kind of the last executed command
    pub current_kind: Option<CommandKind>,
    /// Track position at `executed_at_ms`, when known
    pub position_ms: Option<f64>,
    /// Synchronized time the last command executed
    pub executed_at_ms: Option<f64>,
    /// Target instant of the last executed command
    pub target_instant_ms: Option<f64>,
}

impl PlaybackStatus {
    /// Extrapolated track position at synchronized time `now_ms`
    pub fn position_at(&self, now_ms: f64) -> Option<f64> {
        let position = self.position_ms?;
        match (self.state, self.executed_at_ms) {
            (PlaybackState::Playing, Some(at)) => Some(position + (now_ms - at).max(0.0)),
            _ => Some(position),
        }
    }

    /// Perform `command` on `engine` and record the result.
    ///
    /// A command executed after its target instant starts that much further
    /// into the track, so every peer lands on the same position.
    ///
    /// The status tracks the engine: a command that fails on its first
    /// engine call leaves the status untouched, while a pause that took
    /// effect before a failing seek is recorded before the error returns.
    pub(crate) fn apply(
        &mut self,
        engine: &mut dyn MediaEngine,
        id: CommandId,
        command: &ScheduledCommand,
        now_ms: f64,
    ) -> Result<(), MediaError> {
        let lateness = (now_ms - command.target_instant_ms).max(0.0);

        let (state, position) = match command.payload {
            CommandPayload::Play {
                position_ms: Some(position),
            } => {
                let start = position + lateness;
                engine.play_from(Some(start))?;
                (PlaybackState::Playing, Some(start))
            }
            CommandPayload::Play { position_ms: None } => {
                engine.play_from(None)?;
                (PlaybackState::Playing, self.position_at(now_ms))
            }
            CommandPayload::Pause { resume_position_ms } => {
                engine.pause()?;
                if let Some(position) = resume_position_ms {
                    if let Err(e) = engine.seek(position) {
                        let held = self.position_at(now_ms);
                        self.record(PlaybackState::Paused, held, id, command, now_ms);
                        return Err(e);
                    }
                }
                (
                    PlaybackState::Paused,
                    resume_position_ms.or_else(|| self.position_at(now_ms)),
                )
            }
            CommandPayload::Seek {
                position_ms,
                resume_playing,
            } => {
                let playing = resume_playing.unwrap_or(self.state == PlaybackState::Playing);
                if playing {
                    let start = position_ms + lateness;
                    engine.play_from(Some(start))?;
                    (PlaybackState::Playing, Some(start))
                } else if self.state == PlaybackState::Playing {
                    engine.pause()?;
                    if let Err(e) = engine.seek(position_ms) {
                        let held = self.position_at(now_ms);
                        self.record(PlaybackState::Paused, held, id, command, now_ms);
                        return Err(e);
                    }
                    (PlaybackState::Paused, Some(position_ms))
                } else {
                    engine.seek(position_ms)?;
                    (self.state, Some(position_ms))
                }
            }
        };

        self.record(state, position, id, command, now_ms);
        Ok(())
    }

    fn record(
        &mut self,
        state: PlaybackState,
        position_ms: Option<f64>,
        id: CommandId,
        command: &ScheduledCommand,
        now_ms: f64,
    ) {
        *self = PlaybackStatus {
            state,
            current_command: Some(id),
            current_kind: Some(command.kind()),
            position_ms,
            executed_at_ms: Some(now_ms),
            target_instant_ms: Some(command.target_instant_ms),
        };
    }
}
