//! Media engine that logs instead of rendering audio

use roomsync_core::{MediaEngine, MediaError};
use tracing::info;

/// Tracks what a player would be doing and logs every call
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingEngine {
    playing: bool,
    position_ms: Option<f64>,
    gain: f64,
}

impl Default for LoggingEngine {
    fn default() -> Self {
        Self {
            playing: false,
            position_ms: None,
            gain: 1.0,
        }
    }
}

impl LoggingEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MediaEngine for LoggingEngine {
    fn play_from(&mut self, position_ms: Option<f64>) -> Result<(), MediaError> {
        if position_ms.is_some() {
            self.position_ms = position_ms;
        }
        self.playing = true;
        info!(position_ms = ?self.position_ms, "play");
        Ok(())
    }

    fn pause(&mut self) -> Result<(), MediaError> {
        self.playing = false;
        info!("pause");
        Ok(())
    }

    fn seek(&mut self, position_ms: f64) -> Result<(), MediaError> {
        if !position_ms.is_finite() || position_ms < 0.0 {
            return Err(MediaError::Backend(format!("invalid seek position {}", position_ms)));
        }
        self.position_ms = Some(position_ms);
        info!(position_ms, "seek");
        Ok(())
    }

    fn set_gain(&mut self, gain: f64) -> Result<(), MediaError> {
        self.gain = gain.clamp(0.0, 1.0);
        info!(gain = self.gain, "gain");
        Ok(())
    }
}
