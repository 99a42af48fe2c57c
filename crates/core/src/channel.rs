//! Message channel collaborator
//!
//! The session talks to the room through a [`MessageChannel`] for outbound
//! traffic and an `mpsc` receiver of [`InboundMessage`] for inbound traffic.
//! Delivery is at-least-once and unordered; reconnects are the channel's
//! business.

use crate::protocol::OutboundMessage;
use crate::{Error, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Outbound half of a room connection
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Send a message to the room
    async fn send(&self, message: OutboundMessage) -> Result<()>;
}

/// In-process channel that queues outbound messages on an `mpsc` receiver
///
/// Used to embed the core without a network transport, and in tests.
///
/// ```
/// use roomsync_core::{MemoryChannel, MessageChannel, OutboundMessage};
///
/// # tokio_test::block_on(async {
/// let (channel, mut outbound) = MemoryChannel::new();
/// channel.send(OutboundMessage::GetRoomState).await.unwrap();
/// assert_eq!(outbound.recv().await, Some(OutboundMessage::GetRoomState));
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct MemoryChannel {
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl MemoryChannel {
    /// Create a channel and the receiver its messages arrive on
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl MessageChannel for MemoryChannel {
    async fn send(&self, message: OutboundMessage) -> Result<()> {
        self.tx
            .send(message)
            .map_err(|_| Error::channel("outbound receiver dropped"))
    }
}
