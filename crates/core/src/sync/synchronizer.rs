//! Clock synchronization task
//!
//! Runs synchronization rounds against the room: sends `K` probes spaced by
//! the probe interval, feeds replies into a [`SampleCollector`], and
//! publishes each estimate to the [`SynchronizedClock`]. A round that times
//! out with too few samples is re-armed at once; otherwise the task waits
//! for the re-sync interval (if any) or an explicit re-sync request.

use super::clock::SynchronizedClock;
use super::collector::{ProbeReply, ReplyOutcome, RoundClose, SampleCollector};
use super::estimator::OffsetEstimator;
use super::sample::Sample;
use crate::channel::MessageChannel;
use crate::config::SyncConfig;
use crate::protocol::OutboundMessage;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// Input to a running synchronizer
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SynchronizerEvent {
    /// A probe reply, stamped with its local arrival time
    Reply(ProbeReply),
    /// Start a new round once the current one is done
    Resync,
}

enum RoundEnd {
    Estimated,
    Retry,
    Shutdown,
}

/// Drives synchronization rounds; consumed by [`spawn`](Self::spawn)
pub struct ClockSynchronizer {
    config: SyncConfig,
    clock: SynchronizedClock,
    channel: Arc<dyn MessageChannel>,
    collector: SampleCollector,
    estimator: OffsetEstimator,
}

impl ClockSynchronizer {
    /// Create a synchronizer publishing into `clock`
    pub fn new(config: SyncConfig, clock: SynchronizedClock, channel: Arc<dyn MessageChannel>) -> Self {
        Self {
            collector: SampleCollector::new(config.probes_per_round, config.min_samples),
            estimator: OffsetEstimator::new(config.policy),
            config,
            clock,
            channel,
        }
    }

    /// Start the synchronization task
    pub fn spawn(self) -> SynchronizerHandle {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let task = tokio::spawn(self.run(events_rx, shutdown_rx));
        SynchronizerHandle {
            events_tx,
            shutdown_tx,
            task,
        }
    }

    async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<SynchronizerEvent>,
        mut shutdown: mpsc::Receiver<()>,
    ) {
        info!(
            probes = self.config.probes_per_round,
            interval_ms = self.config.probe_interval_ms,
            policy = ?self.estimator.policy(),
            "Clock synchronizer started"
        );

        loop {
            match self.run_round(&mut events, &mut shutdown).await {
                RoundEnd::Shutdown => break,
                RoundEnd::Retry => continue,
                RoundEnd::Estimated => {}
            }

            let resync = self.config.resync_interval();
            let wake = async {
                match resync {
                    Some(interval) => tokio::time::sleep(interval).await,
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::pin!(wake);

            let keep_running = loop {
                tokio::select! {
                    _ = shutdown.recv() => break false,
                    _ = &mut wake => break true,
                    event = events.recv() => match event {
                        None => break false,
                        Some(SynchronizerEvent::Resync) => break true,
                        Some(SynchronizerEvent::Reply(reply)) => {
                            trace!(sent_at_ms = reply.sent_at_ms, "Reply outside of a round");
                        }
                    },
                }
            };
            if !keep_running {
                break;
            }
        }

        info!("Clock synchronizer stopped");
    }

    async fn run_round(
        &mut self,
        events: &mut mpsc::UnboundedReceiver<SynchronizerEvent>,
        shutdown: &mut mpsc::Receiver<()>,
    ) -> RoundEnd {
        let round = self.collector.begin_round();
        let probes = self.collector.probes_per_round();
        let interval = self.config.probe_interval();
        let started = Instant::now();
        let deadline = started + self.config.round_timeout();
        let mut next_probe = started;
        let mut sent = 0usize;

        debug!(round, probes, "Synchronization round started");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.recv() => return RoundEnd::Shutdown,

                event = events.recv() => match event {
                    None => return RoundEnd::Shutdown,
                    Some(SynchronizerEvent::Reply(reply)) => match self.collector.on_reply(reply) {
                        ReplyOutcome::Complete(window) => {
                            self.publish(&window, false);
                            return RoundEnd::Estimated;
                        }
                        ReplyOutcome::Recorded { collected } => {
                            trace!(round, collected, "Probe reply recorded");
                        }
                        ReplyOutcome::Ignored(reason) => {
                            debug!(round, ?reason, sent_at_ms = reply.sent_at_ms, "Probe reply ignored");
                        }
                    },
                    Some(SynchronizerEvent::Resync) => {
                        debug!(round, "Re-sync requested while a round is running");
                    }
                },

                _ = tokio::time::sleep_until(next_probe), if sent < probes => {
                    self.send_probe(round).await;
                    sent += 1;
                    next_probe += interval;
                }

                _ = tokio::time::sleep_until(deadline) => {
                    return match self.collector.close_round() {
                        RoundClose::Partial(window) => {
                            warn!(round, collected = window.len(), expected = probes, "Round timed out, using partial window");
                            self.publish(&window, true);
                            RoundEnd::Estimated
                        }
                        RoundClose::Insufficient { collected } => {
                            warn!(round, collected, expected = probes, "Round timed out with too few samples, retrying");
                            RoundEnd::Retry
                        }
                    };
                }
            }
        }
    }

    async fn send_probe(&mut self, round: u64) {
        let t0 = self.clock.local_now_ms();
        self.collector.register_probe(t0);
        if let Err(e) = self.channel.send(OutboundMessage::NtpRequest { t0 }).await {
            warn!(round, error = %e, "Failed to send probe");
        }
    }

    fn publish(&self, window: &[Sample], degraded: bool) {
        let computed_at = self.clock.local_now_ms();
        if let Some(estimate) = self.estimator.estimate(window, computed_at, degraded) {
            self.clock.apply_estimate(estimate);
        }
    }
}

/// Handle to a running [`ClockSynchronizer`]
#[derive(Debug)]
pub struct SynchronizerHandle {
    events_tx: mpsc::UnboundedSender<SynchronizerEvent>,
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl SynchronizerHandle {
    /// Deliver a probe reply
    pub fn deliver(&self, reply: ProbeReply) {
        let _ = self.events_tx.send(SynchronizerEvent::Reply(reply));
    }

    /// Request a new round
    pub fn resync(&self) {
        let _ = self.events_tx.send(SynchronizerEvent::Resync);
    }

    /// Whether the task has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the task. No probe is sent after this returns.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.try_send(());
        self.task.abort();
    }
}

impl Drop for SynchronizerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
