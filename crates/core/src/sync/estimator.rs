//! Offset estimation from a window of round-trip samples
//!
//! Low round-trip time implies little queueing delay, and little queueing
//! delay usually means a near-symmetric path, so samples are ranked by RTT
//! before anything is taken from them. Two filtering policies are supported;
//! both keep `offset` and `rtt` paired to the same sample set.

use super::sample::Sample;
use serde::{Deserialize, Serialize};

/// How a full window is reduced to a single estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimatorPolicy {
    /// Sort by RTT and take the sample at index `len / 2` verbatim.
    #[default]
    MedianByRtt,
    /// Sort by RTT and average offset and RTT over the best `ceil(len / 2)` samples.
    BestHalfMean,
}

/// Filtered result of one sample window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OffsetEstimate {
    /// Reference clock minus local clock
    pub offset_ms: f64,
    /// Round-trip time belonging to the same selection as `offset_ms`
    pub rtt_ms: f64,
    /// Local time the estimate was produced
    pub computed_at_ms: f64,
    /// Number of samples in the window
    pub sample_count: usize,
    /// Produced from a partial window after a round timeout
    pub degraded: bool,
    /// Policy used to select `offset_ms` / `rtt_ms`
    pub policy: EstimatorPolicy,
}

/// Reduces sample windows to offset estimates
#[derive(Debug, Clone, Copy, Default)]
pub struct OffsetEstimator {
    policy: EstimatorPolicy,
}

impl OffsetEstimator {
    /// Create an estimator using the given policy
    pub fn new(policy: EstimatorPolicy) -> Self {
        Self { policy }
    }

    /// Get the configured policy
    pub fn policy(&self) -> EstimatorPolicy {
        self.policy
    }

    /// Estimate the clock offset from a window.
    ///
    /// Returns `None` for an empty window; the caller re-arms a round
    /// instead of publishing anything.
    pub fn estimate(
        &self,
        window: &[Sample],
        computed_at_ms: f64,
        degraded: bool,
    ) -> Option<OffsetEstimate> {
        if window.is_empty() {
            return None;
        }

        let mut ranked = window.to_vec();
        ranked.sort_by(|a, b| a.rtt_ms.total_cmp(&b.rtt_ms));

        let (offset_ms, rtt_ms) = match self.policy {
            EstimatorPolicy::MedianByRtt => {
                let chosen = ranked[ranked.len() / 2];
                (chosen.offset_ms, chosen.rtt_ms)
            }
            EstimatorPolicy::BestHalfMean => {
                let best = &ranked[..ranked.len().div_ceil(2)];
                let n = best.len() as f64;
                let offset = best.iter().map(|s| s.offset_ms).sum::<f64>() / n;
                let rtt = best.iter().map(|s| s.rtt_ms).sum::<f64>() / n;
                (offset, rtt)
            }
        };

        Some(OffsetEstimate {
            offset_ms,
            rtt_ms,
            computed_at_ms,
            sample_count: window.len(),
            degraded,
            policy: self.policy,
        })
    }
}
