pub mod config;
pub mod connection;
pub mod frame;
pub mod handshake;
pub mod lifecycle;
pub mod registry;
pub mod relay;
pub mod server;
pub mod websocket_trait;

pub use config::{ConfigError, ServerConfig};
pub use connection::{
    Connection, ConnectionHandle, ConnectionId, ConnectionIdGenerator, ConnectionState,
    DeliveryError, DisconnectReason, SessionHandler,
};
pub use frame::{Flow, Frame, FrameDispatcher, FrameError};
pub use handshake::{HandshakeError, HandshakeNegotiator, HandshakeRequest, WebSocketUpgrade};
pub use lifecycle::ConnectionLifecycleHooks;
pub use registry::{BroadcastOutcome, ConnectionRegistry};
pub use relay::{BroadcastMessage, BroadcastRelay, SEPARATOR};
pub use server::{ChatServer, ServerError};
pub use websocket_trait::{AxumWebSocket, WsError, WsMessage, WsStreamFuture, WsTransport};
