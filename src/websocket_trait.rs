//! WebSocket transport abstraction
//!
//! The session loop talks to an upgraded socket only through [`WsTransport`],
//! so the same code runs over axum's WebSocket in production and over an
//! in-memory channel pair in tests.

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::pin::Pin;

/// Represents a WebSocket message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsMessage {
    Text(String),
    Binary(Vec<u8>),
    Close(Option<(u16, String)>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
}

/// Error type for WebSocket operations
#[derive(Debug, thiserror::Error)]
pub enum WsError {
    #[error("WebSocket error: {0}")]
    WebSocket(String),
    #[error("Connection closed")]
    ConnectionClosed,
}

/// Future type for stream next operation
pub type WsStreamFuture<'a> =
    Pin<Box<dyn std::future::Future<Output = Option<Result<WsMessage, WsError>>> + Send + 'a>>;

/// An upgraded, bidirectional WebSocket stream.
///
/// `send` writes and flushes one message. `next` yields decoded messages in
/// arrival order and `None` once the peer has gone away.
///
/// Once a close frame has been sent or received, `send` fails. A close
/// received from the peer makes the transport queue the matching reply,
/// which goes out on the next `flush`.
#[async_trait]
pub trait WsTransport: Send + Unpin {
    async fn send(&mut self, msg: WsMessage) -> Result<(), WsError>;

    /// Writes out frames the transport queued on its own.
    async fn flush(&mut self) -> Result<(), WsError>;

    fn next(&mut self) -> WsStreamFuture<'_>;
}

impl From<WsMessage> for Message {
    fn from(msg: WsMessage) -> Self {
        match msg {
            WsMessage::Text(text) => Message::Text(text.into()),
            WsMessage::Binary(data) => Message::Binary(data.into()),
            WsMessage::Close(close) => {
                Message::Close(close.map(|(code, reason)| CloseFrame {
                    code,
                    reason: reason.into(),
                }))
            }
            WsMessage::Ping(data) => Message::Ping(data.into()),
            WsMessage::Pong(data) => Message::Pong(data.into()),
        }
    }
}

impl From<Message> for WsMessage {
    fn from(msg: Message) -> Self {
        match msg {
            Message::Text(text) => WsMessage::Text(text.as_str().to_owned()),
            Message::Binary(data) => WsMessage::Binary(data.to_vec()),
            Message::Close(frame) => {
                WsMessage::Close(frame.map(|f| (f.code, f.reason.as_str().to_owned())))
            }
            Message::Ping(data) => WsMessage::Ping(data.to_vec()),
            Message::Pong(data) => WsMessage::Pong(data.to_vec()),
        }
    }
}

/// [`WsTransport`] over an upgraded axum socket.
pub struct AxumWebSocket {
    socket: WebSocket,
}

impl AxumWebSocket {
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

#[async_trait]
impl WsTransport for AxumWebSocket {
    async fn send(&mut self, msg: WsMessage) -> Result<(), WsError> {
        self.socket
            .send(msg.into())
            .await
            .map_err(|e| WsError::WebSocket(e.to_string()))
    }

    async fn flush(&mut self) -> Result<(), WsError> {
        SinkExt::flush(&mut self.socket)
            .await
            .map_err(|e| WsError::WebSocket(e.to_string()))
    }

    fn next(&mut self) -> WsStreamFuture<'_> {
        Box::pin(async move {
            self.socket.next().await.map(|res| {
                res.map(WsMessage::from)
                    .map_err(|e| WsError::WebSocket(e.to_string()))
            })
        })
    }
}
