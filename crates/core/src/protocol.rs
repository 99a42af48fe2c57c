//! Room wire protocol
//!
//! Every message is a JSON object `{"event": "<name>", "data": {...}}` with
//! camelCase fields. Times are reference-clock milliseconds unless a field
//! says otherwise.

use crate::executor::{CommandKind, CommandPayload, ScheduledCommand};
use crate::spatial::{Peer, Position};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Messages a peer sends to the room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum OutboundMessage {
    /// Ask to join a room
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        /// Room to join
        room_id: String,
        /// Display name
        username: String,
    },
    /// Leave the current room
    LeaveRoom,
    /// Synchronization probe stamped with the local send time
    NtpRequest {
        /// Local send time
        t0: f64,
    },
    /// Ask the room to start playback at a reference instant
    #[serde(rename_all = "camelCase")]
    PlayAudio {
        /// Reference instant playback starts
        server_time_to_execute: f64,
        /// Track position to start from; where playback is when absent
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<f64>,
        /// Track length
        #[serde(default, skip_serializing_if = "Option::is_none")]
        song_duration: Option<f64>,
        /// Track source
        #[serde(default, skip_serializing_if = "Option::is_none")]
        song_url: Option<String>,
    },
    /// Ask the room to pause at a reference instant
    #[serde(rename_all = "camelCase")]
    PauseAudio {
        /// Reference instant playback pauses
        server_time_to_execute: f64,
        /// Position to hold
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resume_position: Option<f64>,
    },
    /// Ask the room to move the playhead at a reference instant
    #[serde(rename_all = "camelCase")]
    SeekAudio {
        /// Reference instant the seek happens
        server_time_to_execute: f64,
        /// New track position
        position: f64,
        /// Playing state after the seek; unchanged when absent
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resume_playing: Option<bool>,
    },
    /// Ask for a room-state snapshot
    GetRoomState,
    /// Switch spatial mode for the room
    #[serde(rename_all = "camelCase")]
    ToggleSpatial {
        /// Room to change
        room_id: String,
        /// New mode
        enable: bool,
    },
}

impl OutboundMessage {
    /// Issue message for `command`, carrying the track details given
    pub fn issue(command: &ScheduledCommand, track: &TrackInfo) -> Self {
        let server_time_to_execute = command.target_instant_ms;
        match command.payload {
            CommandPayload::Play { position_ms } => OutboundMessage::PlayAudio {
                server_time_to_execute,
                position: position_ms,
                song_duration: track.duration_ms,
                song_url: track.url.clone(),
            },
            CommandPayload::Pause { resume_position_ms } => OutboundMessage::PauseAudio {
                server_time_to_execute,
                resume_position: resume_position_ms,
            },
            CommandPayload::Seek {
                position_ms,
                resume_playing,
            } => OutboundMessage::SeekAudio {
                server_time_to_execute,
                position: position_ms,
                resume_playing,
            },
        }
    }

    /// Command an issue message asks for; `None` for every other message
    pub fn issued_command(&self) -> Option<ScheduledCommand> {
        match *self {
            OutboundMessage::PlayAudio {
                server_time_to_execute,
                position,
                ..
            } => Some(ScheduledCommand::play(server_time_to_execute, position)),
            OutboundMessage::PauseAudio {
                server_time_to_execute,
                resume_position,
            } => Some(ScheduledCommand::pause(server_time_to_execute, resume_position)),
            OutboundMessage::SeekAudio {
                server_time_to_execute,
                position,
                resume_playing,
            } => Some(ScheduledCommand::seek(server_time_to_execute, position, resume_playing)),
            _ => None,
        }
    }
}

/// Track details sent along with a play request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackInfo {
    /// Track length
    #[serde(default)]
    pub duration_ms: Option<f64>,
    /// Track source
    #[serde(default)]
    pub url: Option<String>,
}

/// Messages the room sends to a peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum InboundMessage {
    /// Id assigned to this peer
    #[serde(rename_all = "camelCase")]
    SetClientId {
        /// Assigned id
        client_id: String,
    },
    /// Join accepted
    RoomJoined,
    /// Join rejected
    JoinFailed {
        /// Reason given by the room
        reason: String,
    },
    /// Current member list
    RoomUpdate {
        /// Members
        clients: Vec<ClientInfo>,
    },
    /// Snapshot for a peer catching up
    #[serde(rename_all = "camelCase")]
    RoomState {
        /// Members
        clients: Vec<ClientInfo>,
        /// Spatial mode
        spatial_enabled: bool,
        /// Whether the room is playing
        song_enabled: bool,
        /// Track position at `server_time`
        elapsed_time: f64,
        /// Reference time the snapshot was taken
        server_time: f64,
    },
    /// Playback command broadcast, including back to its issuer
    AudioCommand(AudioCommand),
    /// Reply to a probe
    NtpResponse {
        /// Echoed local send time
        t0: f64,
        /// Reference receive time
        t1: f64,
        /// Reference reply time
        t2: f64,
    },
    /// Spatial mode changed
    SpatialToggled {
        /// New mode
        enabled: bool,
    },
    /// Audio source moved
    SpatialUpdate {
        /// Source position
        source: Position,
        /// Spatial mode
        enabled: bool,
    },
    /// Error reported by the room
    Error {
        /// Description
        message: String,
    },
}

impl InboundMessage {
    /// Event name, for logging
    pub fn event(&self) -> &'static str {
        match self {
            InboundMessage::SetClientId { .. } => "set-client-id",
            InboundMessage::RoomJoined => "room-joined",
            InboundMessage::JoinFailed { .. } => "join-failed",
            InboundMessage::RoomUpdate { .. } => "room-update",
            InboundMessage::RoomState { .. } => "room-state",
            InboundMessage::AudioCommand(_) => "audio-command",
            InboundMessage::NtpResponse { .. } => "ntp-response",
            InboundMessage::SpatialToggled { .. } => "spatial-toggled",
            InboundMessage::SpatialUpdate { .. } => "spatial-update",
            InboundMessage::Error { .. } => "error",
        }
    }
}

/// Member entry in room updates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    /// Peer id
    pub client_id: String,
    /// Display name
    pub username: String,
    /// Position in the room
    #[serde(default)]
    pub position: Position,
}

impl From<ClientInfo> for Peer {
    fn from(info: ClientInfo) -> Self {
        Peer {
            id: info.client_id,
            display_name: info.username,
            position: info.position,
        }
    }
}

/// Playback command as carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioCommand {
    /// Command kind
    pub action: CommandKind,
    /// Reference instant the command takes effect
    pub server_time: f64,
    /// Track position for `play` / `seek`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<f64>,
    /// Track position for `play`, as sent by rooms that track elapsed time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_time: Option<f64>,
    /// Position to hold on `pause`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_position: Option<f64>,
    /// Playing state after a `seek`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_playing: Option<bool>,
    /// Playing state after a `seek`, as sent by rooms that track song state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub song_enabled: Option<bool>,
}

impl From<&ScheduledCommand> for AudioCommand {
    fn from(command: &ScheduledCommand) -> Self {
        let mut wire = AudioCommand {
            action: command.kind(),
            server_time: command.target_instant_ms,
            position: None,
            elapsed_time: None,
            resume_position: None,
            resume_playing: None,
            song_enabled: None,
        };
        match command.payload {
            CommandPayload::Play { position_ms } => wire.position = position_ms,
            CommandPayload::Pause { resume_position_ms } => wire.resume_position = resume_position_ms,
            CommandPayload::Seek {
                position_ms,
                resume_playing,
            } => {
                wire.position = Some(position_ms);
                wire.resume_playing = resume_playing;
            }
        }
        wire
    }
}

impl TryFrom<AudioCommand> for ScheduledCommand {
    type Error = Error;

    fn try_from(wire: AudioCommand) -> Result<Self> {
        let target = wire.server_time;
        Ok(match wire.action {
            CommandKind::Play => ScheduledCommand::play(target, wire.position.or(wire.elapsed_time)),
            CommandKind::Pause => ScheduledCommand::pause(target, wire.resume_position),
            CommandKind::Seek => {
                let position = wire
                    .position
                    .ok_or_else(|| Error::protocol("seek command without a position"))?;
                ScheduledCommand::seek(target, position, wire.resume_playing.or(wire.song_enabled))
            }
        })
    }
}
