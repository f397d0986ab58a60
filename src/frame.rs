//! Frame classification and dispatch for established connections.

use crate::connection::Connection;
use crate::relay::BroadcastRelay;
use crate::websocket_trait::{WsError, WsMessage, WsTransport};
use thiserror::Error;
use tracing::{debug, trace};

/// One decoded WebSocket message, classified by what the server does with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Close handshake from the peer, with its optional code and reason
    Close(Option<(u16, String)>),
    Ping(Vec<u8>),
    /// Unsolicited pong; ignored
    Pong(Vec<u8>),
    Text(String),
    /// Any data frame that is not text
    Unsupported { kind: &'static str, len: usize },
}

impl From<WsMessage> for Frame {
    fn from(msg: WsMessage) -> Self {
        match msg {
            WsMessage::Close(reason) => Frame::Close(reason),
            WsMessage::Ping(payload) => Frame::Ping(payload),
            WsMessage::Pong(payload) => Frame::Pong(payload),
            WsMessage::Text(text) => Frame::Text(text),
            WsMessage::Binary(data) => Frame::Unsupported {
                kind: "binary",
                len: data.len(),
            },
        }
    }
}

/// Errors raised while handling a frame. Every variant is fatal for the
/// connection that produced it and for no other.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("{kind} messages are not supported ({len} bytes received)")]
    Unsupported { kind: &'static str, len: usize },

    #[error("failed to write control frame: {0}")]
    Transport(#[from] WsError),
}

/// What the session loop should do after a frame was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// The close handshake was acknowledged; tear the connection down
    Close(Option<(u16, String)>),
}

/// Routes each frame of an established connection to its handler.
#[derive(Clone)]
pub struct FrameDispatcher {
    relay: BroadcastRelay,
}

impl FrameDispatcher {
    pub fn new(relay: BroadcastRelay) -> Self {
        Self { relay }
    }

    /// Handles one frame received on `connection`.
    ///
    /// * `Close` is acknowledged with the echo the transport queued when it
    ///   read the frame, and ends the session.
    /// * `Ping` is answered with a pong carrying the same payload.
    /// * `Text` is handed to the broadcast relay.
    /// * `Unsupported` is a protocol violation and returns an error.
    ///
    /// Control replies are written directly to `transport`, ahead of any
    /// queued broadcast traffic.
    pub async fn dispatch<T: WsTransport>(
        &self,
        transport: &mut T,
        connection: &Connection,
        frame: Frame,
    ) -> Result<Flow, FrameError> {
        match frame {
            Frame::Close(reason) => {
                debug!(
                    "Connection {} sent close frame: {:?}",
                    connection.id(),
                    reason
                );
                // The peer may already be gone; teardown proceeds either way
                if let Err(e) = transport.flush().await {
                    debug!(
                        "Could not acknowledge close on connection {}: {}",
                        connection.id(),
                        e
                    );
                }
                Ok(Flow::Close(reason))
            }
            Frame::Ping(payload) => {
                trace!(
                    "Ping with {} bytes on connection {}",
                    payload.len(),
                    connection.id()
                );
                transport.send(WsMessage::Pong(payload)).await?;
                Ok(Flow::Continue)
            }
            Frame::Pong(payload) => {
                trace!(
                    "Ignoring pong with {} bytes on connection {}",
                    payload.len(),
                    connection.id()
                );
                Ok(Flow::Continue)
            }
            Frame::Text(text) => {
                debug!(
                    "Connection {} sent {} bytes of text",
                    connection.id(),
                    text.len()
                );
                self.relay.relay(connection.id(), &text);
                Ok(Flow::Continue)
            }
            Frame::Unsupported { kind, len } => Err(FrameError::Unsupported { kind, len }),
        }
    }
}
