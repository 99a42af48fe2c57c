//! Spatial gain model
//!
//! Maps each peer's distance from the shared audio source to a gain. The
//! model is a pure function of the peer set, source position and mode, so
//! it is recomputed from scratch on every membership or position change.

use crate::config::SpatialConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Point on the room plane
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    /// Horizontal coordinate
    pub x: f64,
    /// Vertical coordinate
    pub y: f64,
}

impl Position {
    /// Create a position
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to `other`
    pub fn distance_to(&self, other: &Position) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Room member as seen by the gain model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Peer {
    /// Stable peer id
    pub id: String,
    /// Name shown to other members
    pub display_name: String,
    /// Position in the room
    pub position: Position,
}

/// Whether distance attenuation is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpatialMode {
    /// Every peer hears the source at full gain
    #[default]
    Disabled,
    /// Gain falls off with distance from the source
    Enabled,
}

impl From<bool> for SpatialMode {
    fn from(enabled: bool) -> Self {
        if enabled {
            SpatialMode::Enabled
        } else {
            SpatialMode::Disabled
        }
    }
}

/// Gain per peer id, each in `[min_gain, 1.0]`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GainMap(BTreeMap<String, f64>);

impl GainMap {
    /// Gain for `peer_id`
    pub fn get(&self, peer_id: &str) -> Option<f64> {
        self.0.get(peer_id).copied()
    }

    /// Iterate `(peer_id, gain)` in id order
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(id, gain)| (id.as_str(), *gain))
    }

    /// Number of peers
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the map is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Attenuation for a listener `distance` away from the source.
///
/// Full gain inside `reference_radius`, `min_gain` from `falloff_radius`
/// on, linear in between.
pub fn attenuation(distance: f64, config: &SpatialConfig) -> f64 {
    let floor = config.min_gain.clamp(0.0, 1.0);
    if !distance.is_finite() {
        return floor;
    }
    if distance <= config.reference_radius {
        return 1.0;
    }
    if distance >= config.falloff_radius {
        return floor;
    }

    let span = config.falloff_radius - config.reference_radius;
    let t = (distance - config.reference_radius) / span;
    (1.0 - t * (1.0 - floor)).clamp(floor, 1.0)
}

/// Compute the gain of every peer for a source at `source`
pub fn gain_map(
    peers: &[Peer],
    source: Position,
    mode: SpatialMode,
    config: &SpatialConfig,
) -> GainMap {
    let gains = peers
        .iter()
        .map(|peer| {
            let gain = match mode {
                SpatialMode::Disabled => 1.0,
                SpatialMode::Enabled => attenuation(peer.position.distance_to(&source), config),
            };
            (peer.id.clone(), gain)
        })
        .collect();
    GainMap(gains)
}
