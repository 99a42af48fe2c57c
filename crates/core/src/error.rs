//! Error types for RoomSync Core

use thiserror::Error;

use crate::executor::ScheduleError;

/// Result type alias for RoomSync Core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in RoomSync Core
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Message channel failure (send on a closed or broken transport)
    #[error("Channel error: {0}")]
    Channel(String),

    /// A command could not be scheduled
    #[error("Schedule error: {0}")]
    Schedule(#[from] ScheduleError),

    /// The room rejected the join request
    #[error("Join failed: {reason}")]
    JoinFailed {
        /// Reason given by the room
        reason: String,
    },

    /// A message could not be mapped onto a command or event
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The session has been stopped
    #[error("Session is not running")]
    SessionClosed,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a channel error
    pub fn channel(msg: impl Into<String>) -> Self {
        Error::Channel(msg.into())
    }

    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::ConfigError(msg.into())
    }
}
