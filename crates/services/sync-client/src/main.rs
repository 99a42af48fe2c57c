//! RoomSync client binary
//!
//! Joins a room over WebSocket and follows its synchronized playback with a
//! media engine that only logs.
//!
//! # Usage
//!
//! ```bash
//! cargo run -p roomsync-client -- \
//!   --url ws://localhost:3000 \
//!   --room 123456 \
//!   --username alice \
//!   --config ./roomsync.toml
//! ```

mod engine;

use anyhow::{Context, Result};
use clap::Parser;
use engine::LoggingEngine;
use roomsync_core::{Config, SessionIdentity, SessionStatus, SyncSession};
use roomsync_websocket::WebSocketChannel;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// RoomSync client
///
/// Joins a listening room and plays in lockstep with the other members.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct ClientConfig {
    /// Room server WebSocket URL
    #[arg(long, default_value = "ws://localhost:3000", env = "ROOMSYNC_URL")]
    url: String,

    /// Room to join
    #[arg(long, env = "ROOMSYNC_ROOM")]
    room: String,

    /// Display name
    #[arg(long, env = "ROOMSYNC_USERNAME")]
    username: String,

    /// TOML configuration file; `ROOMSYNC_*` variables apply on top of it
    #[arg(long, env = "ROOMSYNC_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = ClientConfig::parse();
    let config = Config::load(args.config.as_ref())?;

    info!(
        "Configuration: probes_per_round={}, policy={:?}, lead_time_ms={}",
        config.sync.probes_per_round, config.sync.policy, config.session.lead_time_ms
    );

    let (channel, inbound) = WebSocketChannel::connect(&args.url).await?;
    let session = SyncSession::start(
        config,
        SessionIdentity::new(&args.room, &args.username),
        Arc::new(channel.clone()),
        inbound,
        Box::new(LoggingEngine::new()),
    )
    .await?;

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received before the room answered");
            session.stop().await;
            return Ok(());
        }
        joined = session.wait_joined() => {
            if let Err(e) = joined {
                if let Err(close) = channel.close() {
                    warn!("Failed to close connection: {}", close);
                }
                return Err(e).with_context(|| format!("joining room {}", args.room));
            }
        }
    }

    let mut status = session.subscribe();
    let mut last = status.borrow().clone();

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                log_changes(&last, &current);
                if !current.running {
                    break;
                }
                last = current;
            }
        }
    }

    session.stop().await;
    if let Err(e) = channel.close() {
        warn!("Failed to close connection: {}", e);
    }

    info!("RoomSync client shutdown complete");
    Ok(())
}

fn log_changes(previous: &SessionStatus, current: &SessionStatus) {
    if current.joined && !previous.joined {
        info!(peer_id = ?current.local_peer_id, "Joined room");
    }
    if current.current_offset_ms != previous.current_offset_ms {
        info!(
            offset_ms = ?current.current_offset_ms,
            rtt_ms = ?current.current_rtt_ms,
            "Clock estimate updated"
        );
    }
    if current.playback.current_command != previous.playback.current_command {
        info!(
            state = ?current.playback_state(),
            kind = ?current.playback.current_kind,
            position_ms = ?current.playback.position_ms,
            "Playback changed"
        );
    }
    if current.spatial_mode != previous.spatial_mode {
        info!(mode = ?current.spatial_mode, "Spatial mode changed");
    }
    if current.gain_map != previous.gain_map {
        let local = current
            .local_peer_id
            .as_deref()
            .and_then(|id| current.gain_map.get(id));
        info!(peers = current.gain_map.len(), local_gain = ?local, "Gain map updated");
    }
    if let Some(reason) = &current.join_failure {
        warn!(reason = %reason, "Join failed");
    }
}
