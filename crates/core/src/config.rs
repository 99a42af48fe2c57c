//! Configuration for RoomSync Core
//!
//! Configuration can be loaded from a TOML file and/or environment variables.

use crate::protocol::TrackInfo;
use crate::sync::EstimatorPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Clock synchronization
    #[serde(default)]
    pub sync: SyncConfig,

    /// Scheduled command execution
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Spatial gain model
    #[serde(default)]
    pub spatial: SpatialConfig,

    /// Session behaviour
    #[serde(default)]
    pub session: SessionConfig,
}

/// Clock synchronization configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Probes sent per synchronization round (window size K)
    #[serde(default = "default_probes_per_round")]
    pub probes_per_round: usize,

    /// Delay between consecutive probes in milliseconds
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,

    /// Time allowed for a round to fill before it is closed as degraded
    #[serde(default = "default_round_timeout_ms")]
    pub round_timeout_ms: u64,

    /// Smallest partial window still accepted after a round timeout
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,

    /// Window filtering policy
    #[serde(default)]
    pub policy: EstimatorPolicy,

    /// Re-synchronize periodically; `None` synchronizes once per session
    #[serde(default)]
    pub resync_interval_ms: Option<u64>,
}

fn default_probes_per_round() -> usize {
    8
}

fn default_probe_interval_ms() -> u64 {
    80
}

fn default_round_timeout_ms() -> u64 {
    2000
}

fn default_min_samples() -> usize {
    4
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            probes_per_round: default_probes_per_round(),
            probe_interval_ms: default_probe_interval_ms(),
            round_timeout_ms: default_round_timeout_ms(),
            min_samples: default_min_samples(),
            policy: EstimatorPolicy::default(),
            resync_interval_ms: None,
        }
    }
}

impl SyncConfig {
    /// Delay between probes
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    /// Round timeout
    pub fn round_timeout(&self) -> Duration {
        Duration::from_millis(self.round_timeout_ms)
    }

    /// Periodic re-synchronization interval, if any
    pub fn resync_interval(&self) -> Option<Duration> {
        self.resync_interval_ms.map(Duration::from_millis)
    }
}

/// Scheduled command executor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Commands due within this many milliseconds execute immediately
    #[serde(default = "default_execution_threshold_ms")]
    pub execution_threshold_ms: f64,

    /// Commands further than this in the future are rejected
    #[serde(default = "default_max_horizon_ms")]
    pub max_horizon_ms: f64,
}

fn default_execution_threshold_ms() -> f64 {
    10.0
}

fn default_max_horizon_ms() -> f64 {
    30_000.0
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            execution_threshold_ms: default_execution_threshold_ms(),
            max_horizon_ms: default_max_horizon_ms(),
        }
    }
}

/// Spatial gain model configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialConfig {
    /// Peers within this distance of the source get full gain
    #[serde(default)]
    pub reference_radius: f64,

    /// Distance at which gain reaches `min_gain`
    #[serde(default = "default_falloff_radius")]
    pub falloff_radius: f64,

    /// Gain floor
    #[serde(default)]
    pub min_gain: f64,
}

fn default_falloff_radius() -> f64 {
    100.0
}

impl Default for SpatialConfig {
    fn default() -> Self {
        Self {
            reference_radius: 0.0,
            falloff_radius: default_falloff_radius(),
            min_gain: 0.0,
        }
    }
}

/// Session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Lead time added to `synchronized_now` when issuing commands
    #[serde(default = "default_lead_time_ms")]
    pub lead_time_ms: f64,

    /// Track details sent with issued play requests
    #[serde(default)]
    pub track: TrackInfo,
}

fn default_lead_time_ms() -> f64 {
    100.0
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            lead_time_ms: default_lead_time_ms(),
            track: TrackInfo::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Load configuration from file if it exists, otherwise from defaults.
    ///
    /// Environment variables override either source.
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) if p.as_ref().exists() => Self::from_file(p)?,
            _ => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply `ROOMSYNC_*` overrides read through `lookup`.
    ///
    /// Unparseable values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(raw: Option<String>) -> Option<T> {
            raw.and_then(|v| v.trim().parse().ok())
        }

        // Sync
        if let Some(v) = parsed(lookup("ROOMSYNC_PROBES_PER_ROUND")) {
            self.sync.probes_per_round = v;
        }
        if let Some(v) = parsed(lookup("ROOMSYNC_PROBE_INTERVAL_MS")) {
            self.sync.probe_interval_ms = v;
        }
        if let Some(v) = parsed(lookup("ROOMSYNC_ROUND_TIMEOUT_MS")) {
            self.sync.round_timeout_ms = v;
        }
        if let Some(v) = parsed(lookup("ROOMSYNC_MIN_SAMPLES")) {
            self.sync.min_samples = v;
        }
        if let Some(raw) = lookup("ROOMSYNC_ESTIMATOR_POLICY") {
            match raw.trim() {
                "median_by_rtt" => self.sync.policy = EstimatorPolicy::MedianByRtt,
                "best_half_mean" => self.sync.policy = EstimatorPolicy::BestHalfMean,
                _ => {}
            }
        }
        if let Some(v) = parsed(lookup("ROOMSYNC_RESYNC_INTERVAL_MS")) {
            self.sync.resync_interval_ms = Some(v);
        }

        // Executor
        if let Some(v) = parsed(lookup("ROOMSYNC_EXECUTION_THRESHOLD_MS")) {
            self.executor.execution_threshold_ms = v;
        }
        if let Some(v) = parsed(lookup("ROOMSYNC_MAX_HORIZON_MS")) {
            self.executor.max_horizon_ms = v;
        }

        // Spatial
        if let Some(v) = parsed(lookup("ROOMSYNC_MIN_GAIN")) {
            self.spatial.min_gain = v;
        }
        if let Some(v) = parsed(lookup("ROOMSYNC_FALLOFF_RADIUS")) {
            self.spatial.falloff_radius = v;
        }

        // Session
        if let Some(v) = parsed(lookup("ROOMSYNC_LEAD_TIME_MS")) {
            self.session.lead_time_ms = v;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sync = &self.sync;
        if sync.probes_per_round == 0 {
            return Err(ConfigError::Invalid("probes_per_round must be at least 1".into()));
        }
        if sync.min_samples == 0 || sync.min_samples > sync.probes_per_round {
            return Err(ConfigError::Invalid(
                "min_samples must be between 1 and probes_per_round".into(),
            ));
        }
        // Probes are matched to replies by send time, which must be unique
        if sync.probes_per_round > 1 && sync.probe_interval_ms == 0 {
            return Err(ConfigError::Invalid("probe_interval_ms must be positive".into()));
        }
        let last_probe_ms = sync
            .probe_interval_ms
            .saturating_mul(sync.probes_per_round as u64 - 1);
        if sync.round_timeout_ms <= last_probe_ms {
            return Err(ConfigError::Invalid(format!(
                "round_timeout_ms ({}) must exceed the probe schedule ({}ms)",
                sync.round_timeout_ms, last_probe_ms
            )));
        }
        if sync.resync_interval_ms == Some(0) {
            return Err(ConfigError::Invalid("resync_interval_ms must be positive".into()));
        }

        let exec = &self.executor;
        if !exec.execution_threshold_ms.is_finite() || exec.execution_threshold_ms < 0.0 {
            return Err(ConfigError::Invalid(
                "execution_threshold_ms must be a non-negative number".into(),
            ));
        }
        if !exec.max_horizon_ms.is_finite() || exec.max_horizon_ms <= exec.execution_threshold_ms {
            return Err(ConfigError::Invalid(
                "max_horizon_ms must exceed execution_threshold_ms".into(),
            ));
        }

        let spatial = &self.spatial;
        if !(0.0..=1.0).contains(&spatial.min_gain) {
            return Err(ConfigError::Invalid("min_gain must be within [0, 1]".into()));
        }
        if !(spatial.reference_radius >= 0.0 && spatial.falloff_radius > spatial.reference_radius)
        {
            return Err(ConfigError::Invalid(
                "falloff_radius must exceed a non-negative reference_radius".into(),
            ));
        }

        if !(self.session.lead_time_ms.is_finite() && self.session.lead_time_ms >= 0.0) {
            return Err(ConfigError::Invalid("lead_time_ms must be non-negative".into()));
        }
        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<ConfigError> for crate::Error {
    fn from(err: ConfigError) -> Self {
        crate::Error::config(err.to_string())
    }
}
