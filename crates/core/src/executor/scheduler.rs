//! Scheduled command executor
//!
//! Binds playback commands to instants on the synchronized timeline. A
//! command due within the execution threshold runs immediately; anything
//! later arms a timer. Exactly one timer is armed per [`CommandKind`]: a
//! newer command of the same kind aborts the pending one.
//!
//! Timers never trust the delay computed when they were armed. On wake-up
//! they re-read the synchronized clock under the state lock and either
//! execute, sleep again, or drop out (superseded, stale, shut down).

use super::command::{CommandId, CommandKind, ScheduledCommand};
use super::playback::{MediaEngine, MediaError, PlaybackState, PlaybackStatus};
use crate::config::ExecutorConfig;
use crate::sync::SynchronizedClock;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Reasons a command is refused
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScheduleError {
    /// No offset estimate exists yet
    #[error("clock is not synchronized")]
    NotSynchronized,

    /// Target instant is too far in the future
    #[error("target is {delay_ms:.0}ms away, beyond the {max_horizon_ms:.0}ms horizon")]
    BeyondHorizon {
        /// Delay until the target instant
        delay_ms: f64,
        /// Configured horizon
        max_horizon_ms: f64,
    },

    /// Target instant is NaN or infinite
    #[error("target instant is not a finite time")]
    InvalidInstant,

    /// The executor has been shut down
    #[error("executor is shut down")]
    ShutDown,
}

/// What happened to an accepted command
#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleOutcome {
    /// Due within the threshold and executed immediately
    Executed {
        /// Assigned id
        id: CommandId,
    },
    /// Timer armed
    Armed {
        /// Assigned id
        id: CommandId,
        /// Delay at arm time
        delay_ms: f64,
    },
    /// Older than a command already accepted; ignored
    Stale,
    /// Due immediately but the media engine refused it
    Failed {
        /// Assigned id
        id: CommandId,
        /// Engine error
        error: MediaError,
    },
}

struct PendingTimer {
    id: CommandId,
    target_instant_ms: f64,
    handle: JoinHandle<()>,
}

struct ExecutorState {
    engine: Box<dyn MediaEngine>,
    status: PlaybackStatus,
    pending: HashMap<CommandKind, PendingTimer>,
    /// Newest accepted target per kind
    latest_target: HashMap<CommandKind, f64>,
    /// Newest target that actually executed, any kind
    last_executed_target: Option<f64>,
    next_id: u64,
    closed: bool,
}

impl ExecutorState {
    fn is_stale(&self, kind: CommandKind, target_instant_ms: f64) -> bool {
        let behind_kind = self
            .latest_target
            .get(&kind)
            .is_some_and(|&latest| target_instant_ms < latest);
        behind_kind || self.is_behind_last_executed(target_instant_ms)
    }

    fn is_behind_last_executed(&self, target_instant_ms: f64) -> bool {
        self.last_executed_target
            .is_some_and(|last| target_instant_ms < last)
    }

    fn next_command_id(&mut self) -> CommandId {
        self.next_id += 1;
        CommandId(self.next_id)
    }
}

struct Shared {
    config: ExecutorConfig,
    clock: SynchronizedClock,
    state: Mutex<ExecutorState>,
    status_tx: watch::Sender<PlaybackStatus>,
}

impl Shared {
    /// Run a command against the engine. Caller holds the state lock.
    fn execute(
        &self,
        state: &mut ExecutorState,
        id: CommandId,
        command: &ScheduledCommand,
        now_ms: f64,
    ) -> Result<(), MediaError> {
        match state.status.apply(state.engine.as_mut(), id, command, now_ms) {
            Ok(()) => {
                let target = command.target_instant_ms;
                state.last_executed_target = Some(
                    state
                        .last_executed_target
                        .map_or(target, |last| last.max(target)),
                );
                info!(
                    command = %id,
                    kind = %command.kind(),
                    late_ms = now_ms - target,
                    state = ?state.status.state,
                    "Executed command"
                );
                self.status_tx.send_replace(state.status);
                Ok(())
            }
            Err(e) => {
                warn!(command = %id, kind = %command.kind(), error = %e, "Media engine rejected command");
                let status = state.status;
                self.status_tx.send_if_modified(|current| {
                    let changed = *current != status;
                    *current = status;
                    changed
                });
                Err(e)
            }
        }
    }

    /// Decide what a woken timer does. Returns the next delay if it must sleep again.
    fn on_timer_fired(&self, id: CommandId, command: &ScheduledCommand) -> Option<f64> {
        let kind = command.kind();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if state.closed || state.pending.get(&kind).map(|p| p.id) != Some(id) {
            return None;
        }

        let Some(now) = self.clock.synchronized_now_ms() else {
            state.pending.remove(&kind);
            warn!(command = %id, kind = %kind, "Clock lost synchronization; dropping armed command");
            return None;
        };

        let remaining = command.target_instant_ms - now;
        if remaining > self.config.execution_threshold_ms {
            if remaining > self.config.max_horizon_ms {
                state.pending.remove(&kind);
                warn!(command = %id, kind = %kind, remaining_ms = remaining, "Target moved beyond horizon");
                return None;
            }
            debug!(command = %id, kind = %kind, remaining_ms = remaining, "Timer woke early, re-arming");
            return Some(remaining);
        }

        state.pending.remove(&kind);
        if state.is_behind_last_executed(command.target_instant_ms) {
            debug!(command = %id, kind = %kind, "Armed command overtaken by a newer one");
            return None;
        }

        let _ = self.execute(state, id, command, now);
        None
    }

    async fn run_timer(self: Arc<Self>, id: CommandId, command: ScheduledCommand, delay_ms: f64) {
        let mut delay_ms = delay_ms;
        loop {
            tokio::time::sleep(millis(delay_ms)).await;
            match self.on_timer_fired(id, &command) {
                Some(next) => delay_ms = next,
                None => return,
            }
        }
    }
}

fn millis(ms: f64) -> Duration {
    Duration::from_secs_f64(ms.max(0.0) / 1000.0)
}

/// Executes commands at their synchronized target instants
///
/// Cloning yields another handle to the same executor. Must be used from
/// within a tokio runtime: armed commands are tokio tasks.
#[derive(Clone)]
pub struct CommandExecutor {
    shared: Arc<Shared>,
}

impl CommandExecutor {
    /// Create an executor driving `engine` against `clock`
    pub fn new(
        config: ExecutorConfig,
        clock: SynchronizedClock,
        engine: Box<dyn MediaEngine>,
    ) -> Self {
        let (status_tx, _) = watch::channel(PlaybackStatus::default());
        Self {
            shared: Arc::new(Shared {
                config,
                clock,
                state: Mutex::new(ExecutorState {
                    engine,
                    status: PlaybackStatus::default(),
                    pending: HashMap::new(),
                    latest_target: HashMap::new(),
                    last_executed_target: None,
                    next_id: 0,
                    closed: false,
                }),
                status_tx,
            }),
        }
    }

    /// Schedule a command.
    ///
    /// Executes immediately when `target - synchronized_now <= threshold`,
    /// otherwise arms a timer that supersedes any pending command of the
    /// same kind. Commands older than one already accepted for their kind,
    /// or older than the last executed command, are [`ScheduleOutcome::Stale`].
    pub fn schedule(&self, command: ScheduledCommand) -> Result<ScheduleOutcome, ScheduleError> {
        let target = command.target_instant_ms;
        if !target.is_finite() {
            return Err(ScheduleError::InvalidInstant);
        }
        let kind = command.kind();

        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        if state.closed {
            return Err(ScheduleError::ShutDown);
        }

        let now = self
            .shared
            .clock
            .synchronized_now_ms()
            .ok_or(ScheduleError::NotSynchronized)?;

        if state.is_stale(kind, target) {
            debug!(kind = %kind, target_ms = target, "Ignoring stale command");
            return Ok(ScheduleOutcome::Stale);
        }

        let delay_ms = target - now;
        let config = &self.shared.config;
        if delay_ms > config.max_horizon_ms {
            return Err(ScheduleError::BeyondHorizon {
                delay_ms,
                max_horizon_ms: config.max_horizon_ms,
            });
        }

        let id = state.next_command_id();
        state.latest_target.insert(kind, target);
        if let Some(previous) = state.pending.remove(&kind) {
            previous.handle.abort();
            debug!(
                superseded = %previous.id,
                by = %id,
                kind = %kind,
                previous_target_ms = previous.target_instant_ms,
                "Superseded armed command"
            );
        }

        if delay_ms <= config.execution_threshold_ms {
            return Ok(match self.shared.execute(state, id, &command, now) {
                Ok(()) => ScheduleOutcome::Executed { id },
                Err(error) => ScheduleOutcome::Failed { id, error },
            });
        }

        let handle = tokio::spawn(Arc::clone(&self.shared).run_timer(id, command, delay_ms));
        state.pending.insert(
            kind,
            PendingTimer {
                id,
                target_instant_ms: target,
                handle,
            },
        );
        debug!(command = %id, kind = %kind, delay_ms, "Armed command");
        Ok(ScheduleOutcome::Armed { id, delay_ms })
    }

    /// Cancel every armed command and refuse new ones.
    ///
    /// Pauses the media if it is playing. Idempotent.
    pub fn shutdown(&self) {
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        if state.closed {
            return;
        }
        state.closed = true;

        let cancelled = state.pending.len();
        for (_, timer) in state.pending.drain() {
            timer.handle.abort();
        }

        if state.status.state == PlaybackState::Playing {
            match state.engine.pause() {
                Ok(()) => {
                    state.status.state = PlaybackState::Paused;
                    self.shared.status_tx.send_replace(state.status);
                }
                Err(e) => warn!(error = %e, "Failed to pause media on shutdown"),
            }
        }

        info!(cancelled, "Command executor shut down");
    }

    /// Whether [`shutdown`](Self::shutdown) was called
    pub fn is_shut_down(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Set the media engine's output gain
    pub fn apply_gain(&self, gain: f64) -> Result<(), MediaError> {
        self.shared.state.lock().engine.set_gain(gain)
    }

    /// Current playback status
    pub fn status(&self) -> PlaybackStatus {
        *self.shared.status_tx.borrow()
    }

    /// Watch playback status changes
    pub fn subscribe(&self) -> watch::Receiver<PlaybackStatus> {
        self.shared.status_tx.subscribe()
    }

    /// Number of armed commands
    pub fn pending_count(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    /// Whether a command of `kind` is armed
    pub fn is_pending(&self, kind: CommandKind) -> bool {
        self.shared.state.lock().pending.contains_key(&kind)
    }
}

impl fmt::Debug for CommandExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandExecutor")
            .field("config", &self.shared.config)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
