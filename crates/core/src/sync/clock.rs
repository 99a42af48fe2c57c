//! Local and synchronized clocks
//!
//! All times are milliseconds as `f64`. The local clock is an epoch-ms wall
//! clock advanced by a monotonic source, so it never jumps backwards while a
//! session runs. The synchronized clock adds the current offset estimate.

use super::estimator::OffsetEstimate;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tokio::time::Instant;

/// Source of local time in milliseconds
pub trait LocalClock: Send + Sync + Debug {
    /// Current local time in milliseconds
    fn now_ms(&self) -> f64;
}

/// Wall-clock epoch anchored to a monotonic [`Instant`]
///
/// Uses `tokio::time::Instant`, so a paused tokio runtime controls it.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    epoch_ms: f64,
    anchor: Instant,
}

impl MonotonicClock {
    /// Anchor to the current system time
    pub fn new() -> Self {
        let epoch_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64() * 1000.0)
            .unwrap_or(0.0);
        Self::with_epoch_ms(epoch_ms)
    }

    /// Anchor to an explicit starting time
    pub fn with_epoch_ms(epoch_ms: f64) -> Self {
        Self {
            epoch_ms,
            anchor: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalClock for MonotonicClock {
    fn now_ms(&self) -> f64 {
        self.epoch_ms + self.anchor.elapsed().as_secs_f64() * 1000.0
    }
}

/// Local clock corrected by the latest offset estimate
///
/// Cloning shares the same estimate. Readers never block; the estimate is
/// replaced atomically by the synchronizer.
#[derive(Debug, Clone)]
pub struct SynchronizedClock {
    local: Arc<dyn LocalClock>,
    estimate: Arc<watch::Sender<Option<OffsetEstimate>>>,
}

impl SynchronizedClock {
    /// Create an unsynchronized clock over `local`
    pub fn new(local: Arc<dyn LocalClock>) -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            local,
            estimate: Arc::new(tx),
        }
    }

    /// Current local time
    pub fn local_now_ms(&self) -> f64 {
        self.local.now_ms()
    }

    /// Current reference time, or `None` before the first estimate
    pub fn synchronized_now_ms(&self) -> Option<f64> {
        let offset = self.estimate.borrow().map(|e| e.offset_ms)?;
        Some(self.local.now_ms() + offset)
    }

    /// Latest estimate
    pub fn estimate(&self) -> Option<OffsetEstimate> {
        *self.estimate.borrow()
    }

    /// Whether an estimate has been published
    pub fn is_synchronized(&self) -> bool {
        self.estimate.borrow().is_some()
    }

    /// Offset of the latest estimate
    pub fn current_offset_ms(&self) -> Option<f64> {
        self.estimate.borrow().map(|e| e.offset_ms)
    }

    /// Round-trip time of the latest estimate
    pub fn current_rtt_ms(&self) -> Option<f64> {
        self.estimate.borrow().map(|e| e.rtt_ms)
    }

    /// Replace the current estimate
    pub fn apply_estimate(&self, estimate: OffsetEstimate) {
        let previous = self.estimate.send_replace(Some(estimate));
        tracing::info!(
            offset_ms = estimate.offset_ms,
            rtt_ms = estimate.rtt_ms,
            samples = estimate.sample_count,
            degraded = estimate.degraded,
            drift_ms = previous.map(|p| estimate.offset_ms - p.offset_ms),
            "Clock offset updated"
        );
    }

    /// Forget the estimate; the clock reads as unsynchronized again
    pub fn reset(&self) {
        self.estimate.send_replace(None);
    }

    /// Watch estimate changes
    pub fn subscribe(&self) -> watch::Receiver<Option<OffsetEstimate>> {
        self.estimate.subscribe()
    }
}
