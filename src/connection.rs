//! WebSocket connection handling
//!
//! This module contains the per-connection record and the loop that drives a
//! single upgraded socket from establishment to teardown.

use crate::frame::{Flow, Frame, FrameDispatcher};
use crate::lifecycle::ConnectionLifecycleHooks;
use crate::websocket_trait::{WsMessage, WsTransport};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Stable identity of a connection, assigned when the request is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Hands out unique connection ids. Owned by the server, never global.
#[derive(Debug, Default)]
pub struct ConnectionIdGenerator {
    next: AtomicU64,
}

impl ConnectionIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

/// Protocol state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    PreHandshake,
    Established,
    Closing,
    Closed,
}

/// Why a delivery through a [`ConnectionHandle`] failed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("outbound queue for connection {0} is full")]
    QueueFull(ConnectionId),
    #[error("connection {0} is gone")]
    Disconnected(ConnectionId),
}

/// Non-owning send capability for a live connection.
///
/// Cloning the handle never keeps the socket alive: the socket belongs to the
/// connection's session task, which tears it down regardless of how many
/// handles are still around.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    sender: flume::Sender<String>,
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Enqueues `text` for the session task to write and flush.
    ///
    /// Never waits for the peer.
    pub fn send(&self, text: String) -> Result<(), DeliveryError> {
        self.sender.try_send(text).map_err(|e| match e {
            flume::TrySendError::Full(_) => DeliveryError::QueueFull(self.id),
            flume::TrySendError::Disconnected(_) => DeliveryError::Disconnected(self.id),
        })
    }
}

/// Reason for WebSocket disconnection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Close handshake initiated by the peer, with its code and reason
    Closed(Option<(u16, String)>),
    /// The peer went away without a close handshake
    StreamEnded,
    /// Reading from or writing to the socket failed
    TransportError(String),
    /// A frame handler failed; the connection was force-closed
    Fatal(String),
    /// The server is shutting down
    Shutdown,
}

/// A connection from accept to teardown.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    remote_addr: SocketAddr,
    state: ConnectionState,
    handle: ConnectionHandle,
    pub(crate) outbound: flume::Receiver<String>,
}

impl Connection {
    /// Creates a connection in the `PreHandshake` state with an outbound
    /// queue of `channel_size` messages.
    pub fn new(id: ConnectionId, remote_addr: SocketAddr, channel_size: usize) -> Self {
        let (sender, outbound) = flume::bounded(channel_size);
        Self {
            id,
            remote_addr,
            state: ConnectionState::PreHandshake,
            handle: ConnectionHandle { id, sender },
            outbound,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    /// Messages queued for this connection and not yet written.
    pub fn pending(&self) -> usize {
        self.outbound.len()
    }

    /// Discards every queued message, returning how many were dropped.
    pub fn drain_pending(&self) -> usize {
        self.outbound.drain().count()
    }

    /// Marks the handshake as complete.
    pub fn establish(&mut self) {
        debug_assert_eq!(self.state, ConnectionState::PreHandshake);
        self.state = ConnectionState::Established;
    }

    pub(crate) fn begin_close(&mut self) {
        if self.state == ConnectionState::Established {
            self.state = ConnectionState::Closing;
        }
    }

    pub(crate) fn mark_closed(&mut self) {
        self.state = ConnectionState::Closed;
    }
}

/// Drives established connections.
///
/// One `SessionHandler` is shared by every connection; each call to
/// [`SessionHandler::run`] owns exactly one socket.
#[derive(Clone)]
pub struct SessionHandler {
    hooks: ConnectionLifecycleHooks,
    dispatcher: FrameDispatcher,
    shutdown: CancellationToken,
}

impl SessionHandler {
    pub fn new(
        hooks: ConnectionLifecycleHooks,
        dispatcher: FrameDispatcher,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            hooks,
            dispatcher,
            shutdown,
        }
    }

    /// Handle a WebSocket connection
    ///
    /// This function manages the lifecycle of an upgraded connection:
    /// 1. Registers it through the lifecycle hooks
    /// 2. Dispatches inbound frames in arrival order, ahead of queued output
    /// 3. Writes queued broadcast messages to the socket
    /// 4. Sends a close frame when the server shuts down
    /// 5. Deregisters it when the loop ends, whatever the cause
    ///
    /// The transport is dropped on return, which closes the TCP stream.
    pub async fn run<T: WsTransport>(
        &self,
        mut transport: T,
        mut connection: Connection,
    ) -> DisconnectReason {
        self.hooks.on_active(&mut connection);

        let outbound = connection.outbound.clone();

        let reason = loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    connection.begin_close();
                    if let Err(e) = transport.send(WsMessage::Close(None)).await {
                        warn!("Failed to send WebSocket close frame to {}: {}", connection.id(), e);
                    }
                    break DisconnectReason::Shutdown;
                }

                message = transport.next() => {
                    match message {
                        Some(Ok(msg)) => {
                            let frame = Frame::from(msg);
                            match self.dispatcher.dispatch(&mut transport, &connection, frame).await {
                                Ok(Flow::Continue) => {}
                                Ok(Flow::Close(close)) => {
                                    connection.begin_close();
                                    break DisconnectReason::Closed(close);
                                }
                                Err(e) => {
                                    self.hooks.on_fatal(&connection, &e);
                                    break DisconnectReason::Fatal(e.to_string());
                                }
                            }
                        }
                        Some(Err(e)) => {
                            let error_str = e.to_string();
                            // Abrupt client disconnects are routine
                            if error_str.contains("Connection reset")
                                || error_str.contains("without closing handshake")
                            {
                                debug!("Connection {} reset: {}", connection.id(), e);
                            } else {
                                warn!("WebSocket error on connection {}: {}", connection.id(), e);
                            }
                            break DisconnectReason::TransportError(error_str);
                        }
                        None => break DisconnectReason::StreamEnded,
                    }
                }

                queued = outbound.recv_async() => {
                    // The connection holds a sender itself, so the queue never disconnects here.
                    let Ok(text) = queued else {
                        break DisconnectReason::StreamEnded;
                    };
                    if let Err(e) = transport.send(WsMessage::Text(text)).await {
                        error!("Failed to send message to connection {}: {}", connection.id(), e);
                        break DisconnectReason::TransportError(e.to_string());
                    }
                }
            }
        };

        self.hooks.on_inactive(&mut connection, &reason);
        reason
    }
}
