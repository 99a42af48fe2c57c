//! WebSocket message channel for RoomSync
//!
//! Carries the room protocol as JSON text frames. [`WebSocketChannel::connect`]
//! splits the socket into a sender task, which drains an unbounded queue of
//! outbound frames, and a receiver task, which decodes inbound frames into
//! [`InboundMessage`]s for the session. Frames that do not decode are logged
//! and skipped. The channel does not reconnect; when the socket closes the
//! inbound receiver ends and the session shuts down.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use roomsync_core::{Error, InboundMessage, MessageChannel, OutboundMessage, Result};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Inbound messages buffered before the receiver task waits on the session
const INBOUND_CAPACITY: usize = 256;

/// Room connection over a WebSocket
#[derive(Debug, Clone)]
pub struct WebSocketChannel {
    url: String,
    tx: mpsc::UnboundedSender<Message>,
}

impl WebSocketChannel {
    /// Connect to the room server at `url` (ws:// or wss://)
    ///
    /// Returns the outbound channel and the receiver inbound messages arrive on.
    pub async fn connect(url: &str) -> Result<(Self, mpsc::Receiver<InboundMessage>)> {
        info!("Connecting to room server: {}", url);

        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| Error::channel(format!("Failed to connect to {}: {}", url, e)))?;

        info!("Connected to room server");

        let (write, read) = ws_stream.split();
        let (tx, rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);

        tokio::spawn(sender_task(write, rx));
        tokio::spawn(receiver_task(read, inbound_tx));

        Ok((
            Self {
                url: url.to_string(),
                tx,
            },
            inbound_rx,
        ))
    }

    /// Server URL this channel is connected to
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send a close frame; the sender task ends once it is written
    pub fn close(&self) -> Result<()> {
        self.tx
            .send(Message::Close(None))
            .map_err(|_| Error::channel("WebSocket sender task has terminated"))
    }
}

#[async_trait]
impl MessageChannel for WebSocketChannel {
    async fn send(&self, message: OutboundMessage) -> Result<()> {
        let text = encode(&message)?;
        self.tx
            .send(Message::Text(text))
            .map_err(|_| Error::channel("WebSocket sender task has terminated"))
    }
}

/// Encode an outbound message as a JSON text frame payload
pub fn encode(message: &OutboundMessage) -> Result<String> {
    Ok(serde_json::to_string(message)?)
}

/// Decode an inbound JSON text frame payload
pub fn decode(text: &str) -> Result<InboundMessage> {
    Ok(serde_json::from_str(text)?)
}

async fn sender_task(
    mut write: SplitSink<WsStream, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        let closing = matches!(msg, Message::Close(_));
        if let Err(e) = write.send(msg).await {
            error!("Failed to send WebSocket message: {}", e);
            break;
        }
        if closing {
            break;
        }
    }

    debug!("Sender task terminated");
}

async fn receiver_task(mut read: SplitStream<WsStream>, inbound: mpsc::Sender<InboundMessage>) {
    while let Some(msg_result) = read.next().await {
        match msg_result {
            Ok(Message::Text(text)) => match decode(&text) {
                Ok(message) => {
                    if inbound.send(message).await.is_err() {
                        debug!("Inbound receiver dropped");
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "Skipping undecodable room message"),
            },
            Ok(Message::Close(_)) => {
                info!("WebSocket connection closed");
                break;
            }
            Err(e) => {
                error!("WebSocket error: {}", e);
                break;
            }
            _ => {}
        }
    }

    debug!("Receiver task terminated");
}
