//! Room session orchestration
//!
//! A [`SyncSession`] owns one peer's participation in a room: it joins,
//! keeps the clock synchronized, routes inbound room events to the
//! executor and the gain model, and tears everything down on
//! [`stop`](SyncSession::stop). Observers read [`SessionStatus`] by
//! polling [`status`](SyncSession::status) or through
//! [`subscribe`](SyncSession::subscribe).

use crate::channel::MessageChannel;
use crate::config::Config;
use crate::executor::{
    CommandExecutor, MediaEngine, PlaybackState, PlaybackStatus, ScheduleError, ScheduleOutcome,
    ScheduledCommand,
};
use crate::protocol::{InboundMessage, OutboundMessage};
use crate::spatial::{gain_map, GainMap, Peer, Position, SpatialMode};
use crate::sync::{
    ClockSynchronizer, LocalClock, MonotonicClock, ProbeReply, SynchronizedClock,
    SynchronizerHandle,
};
use crate::{Error, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Room and display name to join with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    /// Room to join
    pub room_id: String,
    /// Display name
    pub username: String,
}

impl SessionIdentity {
    /// Create an identity
    pub fn new(room_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            username: username.into(),
        }
    }
}

/// Partial update to the inputs of the gain model; `None` keeps the current value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MembershipUpdate {
    /// Full member list
    pub peers: Option<Vec<Peer>>,
    /// Audio source position
    pub source: Option<Position>,
    /// Spatial mode
    pub mode: Option<SpatialMode>,
}

/// Observable session state
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SessionStatus {
    /// Offset of the latest estimate
    pub current_offset_ms: Option<f64>,
    /// Round-trip time of the latest estimate
    pub current_rtt_ms: Option<f64>,
    /// Whether an estimate exists
    pub is_synchronized: bool,
    /// Last executed command and resulting state
    pub playback: PlaybackStatus,
    /// Gain per peer
    pub gain_map: GainMap,
    /// Id the room assigned to this peer
    pub local_peer_id: Option<String>,
    /// Spatial mode
    pub spatial_mode: SpatialMode,
    /// Audio source position
    pub source_position: Position,
    /// Whether the room accepted the join
    pub joined: bool,
    /// Reason the room rejected the join
    pub join_failure: Option<String>,
    /// Whether the session is running
    pub running: bool,
}

impl SessionStatus {
    /// Current playback state
    pub fn playback_state(&self) -> PlaybackState {
        self.playback.state
    }
}

#[derive(Debug, Default)]
struct RoomModel {
    peers: Vec<Peer>,
    source: Position,
    mode: SpatialMode,
    gains: GainMap,
    local_peer_id: Option<String>,
    applied_gain: Option<f64>,
    joined: bool,
    state_requested: bool,
    join_failure: Option<String>,
}

struct SessionInner {
    config: Config,
    identity: SessionIdentity,
    channel: Arc<dyn MessageChannel>,
    clock: SynchronizedClock,
    executor: CommandExecutor,
    synchronizer: SynchronizerHandle,
    room: Mutex<RoomModel>,
    status_tx: watch::Sender<SessionStatus>,
    shutdown_tx: mpsc::Sender<()>,
    running: AtomicBool,
}

impl SessionInner {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn send(&self, message: OutboundMessage) {
        if let Err(e) = self.channel.send(message).await {
            warn!(room = %self.identity.room_id, error = %e, "Failed to send message");
        }
    }

    fn publish_status(&self) {
        let next = {
            let room = self.room.lock();
            SessionStatus {
                current_offset_ms: self.clock.current_offset_ms(),
                current_rtt_ms: self.clock.current_rtt_ms(),
                is_synchronized: self.clock.is_synchronized(),
                playback: self.executor.status(),
                gain_map: room.gains.clone(),
                local_peer_id: room.local_peer_id.clone(),
                spatial_mode: room.mode,
                source_position: room.source,
                joined: room.joined,
                join_failure: room.join_failure.clone(),
                running: self.is_running(),
            }
        };
        self.status_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    fn schedule(&self, command: ScheduledCommand) -> Result<ScheduleOutcome> {
        match self.executor.schedule(command) {
            Ok(outcome) => {
                debug!(kind = %command.kind(), target_ms = command.target_instant_ms, ?outcome, "Command scheduled");
                Ok(outcome)
            }
            Err(e) => {
                warn!(
                    kind = %command.kind(),
                    target_ms = command.target_instant_ms,
                    error = %e,
                    "Command rejected"
                );
                Err(e.into())
            }
        }
    }

    /// Recompute the gain map and push the local peer's gain to the engine
    fn refresh_gains(&self) -> GainMap {
        let (gains, apply) = {
            let mut guard = self.room.lock();
            let room = &mut *guard;
            room.gains = gain_map(&room.peers, room.source, room.mode, &self.config.spatial);

            let local = room
                .local_peer_id
                .as_deref()
                .and_then(|id| room.gains.get(id));
            let apply = match local {
                Some(gain) if room.applied_gain != Some(gain) => {
                    room.applied_gain = Some(gain);
                    Some(gain)
                }
                _ => None,
            };
            (room.gains.clone(), apply)
        };

        if let Some(gain) = apply {
            match self.executor.apply_gain(gain) {
                Ok(()) => debug!(gain, "Applied spatial gain"),
                Err(e) => warn!(gain, error = %e, "Failed to apply spatial gain"),
            }
        }
        self.publish_status();
        gains
    }

    fn update_membership(&self, update: MembershipUpdate) -> GainMap {
        {
            let mut room = self.room.lock();
            if let Some(peers) = update.peers {
                room.peers = peers;
            }
            if let Some(source) = update.source {
                room.source = source;
            }
            if let Some(mode) = update.mode {
                room.mode = mode;
            }
        }
        self.refresh_gains()
    }

    /// Ask for a room snapshot once the room accepted us and the clock is synchronized
    async fn maybe_request_room_state(&self) {
        let request = {
            let mut room = self.room.lock();
            if room.joined && !room.state_requested && self.clock.is_synchronized() {
                room.state_requested = true;
                true
            } else {
                false
            }
        };
        if request {
            debug!(room = %self.identity.room_id, "Requesting room state");
            self.send(OutboundMessage::GetRoomState).await;
        }
    }

    async fn handle(&self, message: InboundMessage) {
        debug!(event = message.event(), "Inbound message");
        match message {
            InboundMessage::NtpResponse { t0, t1, t2 } => {
                self.synchronizer.deliver(ProbeReply {
                    sent_at_ms: t0,
                    reference_start_ms: t1,
                    reference_end_ms: t2,
                    received_at_ms: self.clock.local_now_ms(),
                });
            }
            InboundMessage::AudioCommand(wire) => match ScheduledCommand::try_from(wire) {
                Ok(command) => {
                    let _ = self.schedule(command);
                }
                Err(e) => warn!(error = %e, "Dropping malformed audio command"),
            },
            InboundMessage::SetClientId { client_id } => {
                info!(client_id = %client_id, "Assigned client id");
                self.room.lock().local_peer_id = Some(client_id);
                self.refresh_gains();
            }
            InboundMessage::RoomJoined => {
                info!(room = %self.identity.room_id, "Joined room");
                self.room.lock().joined = true;
                self.publish_status();
                self.maybe_request_room_state().await;
            }
            InboundMessage::JoinFailed { reason } => {
                warn!(room = %self.identity.room_id, reason = %reason, "Join failed");
                self.room.lock().join_failure = Some(reason);
                self.teardown(false).await;
            }
            InboundMessage::RoomUpdate { clients } => {
                self.update_membership(MembershipUpdate {
                    peers: Some(clients.into_iter().map(Peer::from).collect()),
                    ..Default::default()
                });
            }
            InboundMessage::RoomState {
                clients,
                spatial_enabled,
                song_enabled,
                elapsed_time,
                server_time,
            } => {
                self.update_membership(MembershipUpdate {
                    peers: Some(clients.into_iter().map(Peer::from).collect()),
                    source: None,
                    mode: Some(spatial_enabled.into()),
                });

                // Align with the room: the executor advances a late play by
                // the time elapsed since the snapshot.
                let catch_up = if song_enabled {
                    ScheduledCommand::play(server_time, Some(elapsed_time.max(0.0)))
                } else {
                    ScheduledCommand::pause(server_time, Some(elapsed_time.max(0.0)))
                };
                let _ = self.schedule(catch_up);
            }
            InboundMessage::SpatialToggled { enabled } => {
                self.update_membership(MembershipUpdate {
                    mode: Some(enabled.into()),
                    ..Default::default()
                });
            }
            InboundMessage::SpatialUpdate { source, enabled } => {
                self.update_membership(MembershipUpdate {
                    source: Some(source),
                    mode: Some(enabled.into()),
                    ..Default::default()
                });
            }
            InboundMessage::Error { message } => {
                warn!(room = %self.identity.room_id, message = %message, "Room reported an error");
            }
        }
    }

    /// Stop everything; returns false if already stopped
    async fn teardown(&self, leave: bool) -> bool {
        if !self.running.swap(false, Ordering::SeqCst) {
            return false;
        }

        self.synchronizer.stop();
        self.executor.shutdown();
        self.clock.reset();
        let _ = self.shutdown_tx.try_send(());

        if leave {
            self.send(OutboundMessage::LeaveRoom).await;
        }
        self.publish_status();
        info!(room = %self.identity.room_id, "Session stopped");
        true
    }
}

async fn dispatch(
    inner: Arc<SessionInner>,
    mut inbound: mpsc::Receiver<InboundMessage>,
    mut shutdown: mpsc::Receiver<()>,
) {
    let mut estimates = inner.clock.subscribe();
    let mut playback = inner.executor.subscribe();

    while inner.is_running() {
        tokio::select! {
            _ = shutdown.recv() => break,

            message = inbound.recv() => match message {
                Some(message) => inner.handle(message).await,
                None => {
                    info!(room = %inner.identity.room_id, "Inbound channel closed");
                    break;
                }
            },

            changed = estimates.changed() => {
                if changed.is_err() {
                    break;
                }
                inner.publish_status();
                inner.maybe_request_room_state().await;
            }

            changed = playback.changed() => {
                if changed.is_err() {
                    break;
                }
                inner.publish_status();
            }
        }
    }

    debug!(room = %inner.identity.room_id, "Session dispatcher exited");
}

/// One peer's participation in a room
pub struct SyncSession {
    inner: Arc<SessionInner>,
    dispatcher: JoinHandle<()>,
}

impl SyncSession {
    /// Join the room and start synchronizing against the system clock.
    ///
    /// `channel` carries outbound messages, `inbound` delivers the room's
    /// messages. Must be called within a tokio runtime.
    pub async fn start(
        config: Config,
        identity: SessionIdentity,
        channel: Arc<dyn MessageChannel>,
        inbound: mpsc::Receiver<InboundMessage>,
        engine: Box<dyn MediaEngine>,
    ) -> Result<Self> {
        Self::start_with_clock(
            config,
            identity,
            channel,
            inbound,
            engine,
            Arc::new(MonotonicClock::new()),
        )
        .await
    }

    /// Like [`start`](Self::start) with an explicit local clock
    pub async fn start_with_clock(
        config: Config,
        identity: SessionIdentity,
        channel: Arc<dyn MessageChannel>,
        inbound: mpsc::Receiver<InboundMessage>,
        engine: Box<dyn MediaEngine>,
        local_clock: Arc<dyn LocalClock>,
    ) -> Result<Self> {
        config.validate()?;

        channel
            .send(OutboundMessage::JoinRoom {
                room_id: identity.room_id.clone(),
                username: identity.username.clone(),
            })
            .await?;

        let clock = SynchronizedClock::new(local_clock);
        let executor = CommandExecutor::new(config.executor.clone(), clock.clone(), engine);
        let synchronizer =
            ClockSynchronizer::new(config.sync.clone(), clock.clone(), Arc::clone(&channel))
                .spawn();

        let (status_tx, _) = watch::channel(SessionStatus {
            running: true,
            ..Default::default()
        });
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        info!(
            room = %identity.room_id,
            username = %identity.username,
            "Session started"
        );

        let inner = Arc::new(SessionInner {
            config,
            identity,
            channel,
            clock,
            executor,
            synchronizer,
            room: Mutex::new(RoomModel::default()),
            status_tx,
            shutdown_tx,
            running: AtomicBool::new(true),
        });
        let dispatcher = tokio::spawn(dispatch(Arc::clone(&inner), inbound, shutdown_rx));

        Ok(Self { inner, dispatcher })
    }

    /// Schedule a command on this peer only
    pub fn schedule(&self, command: ScheduledCommand) -> Result<ScheduleOutcome> {
        if !self.inner.is_running() {
            return Err(Error::SessionClosed);
        }
        self.inner.schedule(command)
    }

    /// Update peers, source position or mode and recompute the gain map
    pub fn on_membership_or_position_changed(&self, update: MembershipUpdate) -> GainMap {
        self.inner.update_membership(update)
    }

    /// Ask the room to play, from `position_ms` or where playback is
    pub async fn issue_play(&self, position_ms: Option<f64>) -> Result<ScheduledCommand> {
        let target = self.issue_target()?;
        self.issue(ScheduledCommand::play(target, position_ms)).await
    }

    /// Ask the room to pause
    pub async fn issue_pause(&self, resume_position_ms: Option<f64>) -> Result<ScheduledCommand> {
        let target = self.issue_target()?;
        self.issue(ScheduledCommand::pause(target, resume_position_ms))
            .await
    }

    /// Ask the room to seek
    pub async fn issue_seek(
        &self,
        position_ms: f64,
        resume_playing: Option<bool>,
    ) -> Result<ScheduledCommand> {
        let target = self.issue_target()?;
        self.issue(ScheduledCommand::seek(target, position_ms, resume_playing))
            .await
    }

    fn issue_target(&self) -> Result<f64> {
        if !self.inner.is_running() {
            return Err(Error::SessionClosed);
        }
        let now = self
            .inner
            .clock
            .synchronized_now_ms()
            .ok_or(ScheduleError::NotSynchronized)?;
        Ok(now + self.inner.config.session.lead_time_ms)
    }

    /// Broadcast a command; it comes back through the room like any other
    async fn issue(&self, command: ScheduledCommand) -> Result<ScheduledCommand> {
        self.inner
            .channel
            .send(OutboundMessage::issue(&command, &self.inner.config.session.track))
            .await?;
        info!(kind = %command.kind(), target_ms = command.target_instant_ms, "Issued command");
        Ok(command)
    }

    /// Ask the room to switch spatial mode
    pub async fn toggle_spatial(&self, enable: bool) -> Result<()> {
        if !self.inner.is_running() {
            return Err(Error::SessionClosed);
        }
        self.inner
            .channel
            .send(OutboundMessage::ToggleSpatial {
                room_id: self.inner.identity.room_id.clone(),
                enable,
            })
            .await
    }

    /// Start a new synchronization round
    pub fn resync(&self) {
        self.inner.synchronizer.resync();
    }

    /// The session's synchronized clock
    pub fn clock(&self) -> &SynchronizedClock {
        &self.inner.clock
    }

    /// Current status snapshot
    pub fn status(&self) -> SessionStatus {
        self.inner.publish_status();
        self.inner.status_tx.borrow().clone()
    }

    /// Watch status changes
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Wait until the room answers the join request.
    ///
    /// Fails with [`Error::JoinFailed`] when the room rejects the join and
    /// with [`Error::SessionClosed`] when the session stops first.
    pub async fn wait_joined(&self) -> Result<()> {
        let mut status = self.subscribe();
        loop {
            {
                let current = status.borrow_and_update();
                if let Some(reason) = &current.join_failure {
                    return Err(Error::JoinFailed {
                        reason: reason.clone(),
                    });
                }
                if current.joined {
                    return Ok(());
                }
                if !current.running {
                    return Err(Error::SessionClosed);
                }
            }
            if status.changed().await.is_err() {
                return Err(Error::SessionClosed);
            }
        }
    }

    /// Whether the session is running
    pub fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    /// Leave the room and cancel all timers. Idempotent.
    pub async fn stop(&self) {
        self.inner.teardown(true).await;
        self.dispatcher.abort();
    }
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        if self.inner.running.swap(false, Ordering::SeqCst) {
            self.inner.synchronizer.stop();
            self.inner.executor.shutdown();
        }
        self.dispatcher.abort();
    }
}

impl std::fmt::Debug for SyncSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncSession")
            .field("identity", &self.inner.identity)
            .field("running", &self.inner.is_running())
            .finish_non_exhaustive()
    }
}
