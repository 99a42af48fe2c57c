//! Simulated room for integration tests
//!
//! The room owns a reference clock and answers peers the way a room server
//! would: probe replies, join handshake, room-state snapshots and command
//! broadcast. Every hop is delayed by the peer's link latency on tokio's
//! clock, so tests run under `start_paused = true`.

#![allow(dead_code)]

use roomsync_core::{
    AudioCommand, ClientInfo, InboundMessage, LocalClock, MediaEngine, MediaError,
    MemoryChannel, MessageChannel, MonotonicClock, OutboundMessage, Position,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// One media engine call
#[derive(Debug, Clone, PartialEq)]
pub enum MediaCall {
    Play(Option<f64>),
    Pause,
    Seek(f64),
    Gain(f64),
}

/// Shared log of engine calls with the tokio instant they happened
#[derive(Debug, Clone, Default)]
pub struct MediaLog(Arc<Mutex<Vec<(Instant, MediaCall)>>>);

impl MediaLog {
    pub fn calls(&self) -> Vec<MediaCall> {
        self.0.lock().unwrap().iter().map(|(_, c)| c.clone()).collect()
    }

    pub fn timed_calls(&self) -> Vec<(Instant, MediaCall)> {
        self.0.lock().unwrap().clone()
    }

    pub fn plays(&self) -> Vec<(Instant, Option<f64>)> {
        self.timed_calls()
            .into_iter()
            .filter_map(|(at, call)| match call {
                MediaCall::Play(position) => Some((at, position)),
                _ => None,
            })
            .collect()
    }

    pub fn gains(&self) -> Vec<f64> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                MediaCall::Gain(g) => Some(g),
                _ => None,
            })
            .collect()
    }

    fn push(&self, call: MediaCall) {
        self.0.lock().unwrap().push((Instant::now(), call));
    }
}

/// Media engine that records every call
#[derive(Debug, Clone, Default)]
pub struct RecordingEngine {
    pub log: MediaLog,
}

impl RecordingEngine {
    pub fn new() -> (Self, MediaLog) {
        let engine = Self::default();
        let log = engine.log.clone();
        (engine, log)
    }
}

impl MediaEngine for RecordingEngine {
    fn play_from(&mut self, position_ms: Option<f64>) -> Result<(), MediaError> {
        self.log.push(MediaCall::Play(position_ms));
        Ok(())
    }

    fn pause(&mut self) -> Result<(), MediaError> {
        self.log.push(MediaCall::Pause);
        Ok(())
    }

    fn seek(&mut self, position_ms: f64) -> Result<(), MediaError> {
        self.log.push(MediaCall::Seek(position_ms));
        Ok(())
    }

    fn set_gain(&mut self, gain: f64) -> Result<(), MediaError> {
        self.log.push(MediaCall::Gain(gain));
        Ok(())
    }
}

/// One-way latencies of a peer's link
#[derive(Debug, Clone, Copy)]
pub struct Link {
    pub uplink_ms: u64,
    pub downlink_ms: u64,
}

impl Link {
    pub fn symmetric(one_way_ms: u64) -> Self {
        Self {
            uplink_ms: one_way_ms,
            downlink_ms: one_way_ms,
        }
    }
}

struct Member {
    info: ClientInfo,
    link: Link,
    inbound: mpsc::Sender<InboundMessage>,
}

struct Playback {
    playing: bool,
    anchor_elapsed_ms: f64,
    anchor_reference_ms: f64,
}

struct RoomState {
    members: Vec<Member>,
    playback: Playback,
    spatial_enabled: bool,
    probe_budget: Option<usize>,
    join_failure: Option<String>,
    sent: Vec<(String, OutboundMessage)>,
}

/// Room server stand-in
#[derive(Clone)]
pub struct SimulatedRoom {
    reference: Arc<MonotonicClock>,
    state: Arc<Mutex<RoomState>>,
}

impl SimulatedRoom {
    /// Room whose reference clock reads `reference_epoch_ms` now
    pub fn new(reference_epoch_ms: f64) -> Self {
        Self {
            reference: Arc::new(MonotonicClock::with_epoch_ms(reference_epoch_ms)),
            state: Arc::new(Mutex::new(RoomState {
                members: Vec::new(),
                playback: Playback {
                    playing: false,
                    anchor_elapsed_ms: 0.0,
                    anchor_reference_ms: reference_epoch_ms,
                },
                spatial_enabled: false,
                probe_budget: None,
                join_failure: None,
                sent: Vec::new(),
            })),
        }
    }

    pub fn reference_now_ms(&self) -> f64 {
        self.reference.now_ms()
    }

    /// Room is playing and was at `elapsed_ms` at the current reference time
    pub fn set_playing(&self, elapsed_ms: f64) {
        let now = self.reference_now_ms();
        let mut state = self.state.lock().unwrap();
        state.playback = Playback {
            playing: true,
            anchor_elapsed_ms: elapsed_ms,
            anchor_reference_ms: now,
        };
    }

    /// Room is paused at `elapsed_ms`
    pub fn set_paused(&self, elapsed_ms: f64) {
        let now = self.reference_now_ms();
        let mut state = self.state.lock().unwrap();
        state.playback = Playback {
            playing: false,
            anchor_elapsed_ms: elapsed_ms,
            anchor_reference_ms: now,
        };
    }

    /// Track position the room considers current
    pub fn elapsed_now_ms(&self) -> f64 {
        let now = self.reference_now_ms();
        let state = self.state.lock().unwrap();
        let p = &state.playback;
        if p.playing {
            p.anchor_elapsed_ms + (now - p.anchor_reference_ms)
        } else {
            p.anchor_elapsed_ms
        }
    }

    pub fn set_spatial(&self, enabled: bool) {
        self.state.lock().unwrap().spatial_enabled = enabled;
    }

    /// Answer at most `budget` further probes
    pub fn limit_probe_replies(&self, budget: usize) {
        self.state.lock().unwrap().probe_budget = Some(budget);
    }

    /// Reject the next join with `reason`
    pub fn reject_joins(&self, reason: &str) {
        self.state.lock().unwrap().join_failure = Some(reason.to_string());
    }

    /// Everything peers sent, tagged with the sender's id
    pub fn sent(&self) -> Vec<(String, OutboundMessage)> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn sent_events(&self, client_id: &str) -> Vec<OutboundMessage> {
        self.sent()
            .into_iter()
            .filter(|(id, _)| id == client_id)
            .map(|(_, m)| m)
            .collect()
    }

    /// Deliver `message` to every member after its downlink delay
    pub fn broadcast(&self, message: InboundMessage) {
        let targets: Vec<_> = {
            let state = self.state.lock().unwrap();
            state
                .members
                .iter()
                .map(|m| (m.inbound.clone(), m.link.downlink_ms))
                .collect()
        };
        for (inbound, downlink_ms) in targets {
            deliver(inbound, downlink_ms, message.clone());
        }
    }

    /// Connect a peer; returns its channel and inbound receiver
    pub fn connect(
        &self,
        client_id: &str,
        position: Position,
        link: Link,
    ) -> (Arc<dyn MessageChannel>, mpsc::Receiver<InboundMessage>) {
        let (channel, mut outbound) = MemoryChannel::new();
        let (inbound_tx, inbound_rx) = mpsc::channel(256);

        let room = self.clone();
        let client_id = client_id.to_string();
        tokio::spawn(async move {
            while let Some(message) = outbound.recv().await {
                let room = room.clone();
                let client_id = client_id.clone();
                let inbound = inbound_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(link.uplink_ms)).await;
                    room.on_message(&client_id, position, link, inbound, message);
                });
            }
        });

        (Arc::new(channel), inbound_rx)
    }

    fn on_message(
        &self,
        client_id: &str,
        position: Position,
        link: Link,
        inbound: mpsc::Sender<InboundMessage>,
        message: OutboundMessage,
    ) {
        self.state
            .lock()
            .unwrap()
            .sent
            .push((client_id.to_string(), message.clone()));

        match message {
            OutboundMessage::NtpRequest { t0 } => {
                let answer = {
                    let mut state = self.state.lock().unwrap();
                    match state.probe_budget.as_mut() {
                        Some(0) => false,
                        Some(budget) => {
                            *budget -= 1;
                            true
                        }
                        None => true,
                    }
                };
                if answer {
                    let t1 = self.reference_now_ms();
                    deliver(
                        inbound,
                        link.downlink_ms,
                        InboundMessage::NtpResponse { t0, t1, t2: t1 },
                    );
                }
            }
            OutboundMessage::JoinRoom { username, .. } => {
                let failure = self.state.lock().unwrap().join_failure.take();
                if let Some(reason) = failure {
                    deliver(inbound, link.downlink_ms, InboundMessage::JoinFailed { reason });
                    return;
                }
                deliver(
                    inbound.clone(),
                    link.downlink_ms,
                    InboundMessage::SetClientId {
                        client_id: client_id.to_string(),
                    },
                );
                deliver(inbound.clone(), link.downlink_ms, InboundMessage::RoomJoined);
                let clients = {
                    let mut state = self.state.lock().unwrap();
                    state.members.push(Member {
                        info: ClientInfo {
                            client_id: client_id.to_string(),
                            username,
                            position,
                        },
                        link,
                        inbound,
                    });
                    state.members.iter().map(|m| m.info.clone()).collect()
                };
                self.broadcast(InboundMessage::RoomUpdate { clients });
            }
            OutboundMessage::LeaveRoom => {
                let clients = {
                    let mut state = self.state.lock().unwrap();
                    state.members.retain(|m| m.info.client_id != client_id);
                    state.members.iter().map(|m| m.info.clone()).collect()
                };
                self.broadcast(InboundMessage::RoomUpdate { clients });
            }
            OutboundMessage::GetRoomState => {
                let server_time = self.reference_now_ms();
                let elapsed_time = self.elapsed_now_ms();
                let snapshot = {
                    let state = self.state.lock().unwrap();
                    InboundMessage::RoomState {
                        clients: state.members.iter().map(|m| m.info.clone()).collect(),
                        spatial_enabled: state.spatial_enabled,
                        song_enabled: state.playback.playing,
                        elapsed_time,
                        server_time,
                    }
                };
                deliver(inbound, link.downlink_ms, snapshot);
            }
            OutboundMessage::PlayAudio { .. }
            | OutboundMessage::PauseAudio { .. }
            | OutboundMessage::SeekAudio { .. } => {
                if let Some(command) = message.issued_command() {
                    self.broadcast(InboundMessage::AudioCommand(AudioCommand::from(&command)));
                }
            }
            OutboundMessage::ToggleSpatial { enable, .. } => {
                self.set_spatial(enable);
                self.broadcast(InboundMessage::SpatialToggled { enabled: enable });
            }
        }
    }
}

fn deliver(inbound: mpsc::Sender<InboundMessage>, downlink_ms: u64, message: InboundMessage) {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(downlink_ms)).await;
        let _ = inbound.send(message).await;
    });
}

/// Absolute difference in milliseconds between two tokio instants
pub fn instant_gap_ms(a: Instant, b: Instant) -> f64 {
    let gap = if a > b { a - b } else { b - a };
    gap.as_secs_f64() * 1000.0
}
