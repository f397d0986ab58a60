//! Server bootstrap and request pipeline
//!
//! Every accepted TCP connection passes through the same ordered stages:
//! HTTP decoding and aggregation (hyper), handshake negotiation
//! ([`HandshakeNegotiator`]) and, once upgraded, frame dispatch inside a
//! [`SessionHandler`] task.

use crate::config::{ConfigError, ServerConfig};
use crate::connection::{Connection, ConnectionIdGenerator, SessionHandler};
use crate::frame::FrameDispatcher;
use crate::handshake::{HandshakeError, HandshakeNegotiator, HandshakeRequest, WebSocketUpgrade};
use crate::lifecycle::ConnectionLifecycleHooks;
use crate::registry::ConnectionRegistry;
use crate::relay::BroadcastRelay;
use crate::websocket_trait::AxumWebSocket;
use axum::{
    extract::{ConnectInfo, State},
    http::{HeaderMap, Method, Uri},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// State shared by every request handler.
struct ServerState {
    negotiator: HandshakeNegotiator,
    session: SessionHandler,
    ids: ConnectionIdGenerator,
    channel_size: usize,
}

/// A bound, not yet running, broadcast chat server.
pub struct ChatServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    router: Router,
    endpoint_url: String,
    shutdown: CancellationToken,
}

impl ChatServer {
    /// Validates `config` and binds the listening socket.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let negotiator = HandshakeNegotiator::new(&config)?;
        let endpoint_url = negotiator.endpoint_url().to_string();
        let endpoint_path = negotiator.endpoint_path().to_string();

        let registry = Arc::new(ConnectionRegistry::new());
        let shutdown = CancellationToken::new();

        let session = SessionHandler::new(
            ConnectionLifecycleHooks::new(registry.clone()),
            FrameDispatcher::new(BroadcastRelay::new(registry.clone())),
            shutdown.clone(),
        );

        let state = Arc::new(ServerState {
            negotiator,
            session,
            ids: ConnectionIdGenerator::new(),
            channel_size: config.channel_size,
        });

        let router = Router::new()
            .route(&endpoint_path, any(handshake))
            .fallback(unknown_endpoint)
            .layer(TraceLayer::new_for_http())
            .with_state(state);

        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            local_addr,
            registry,
            router,
            endpoint_url,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The live registry; useful for inspection and tests.
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.registry.clone()
    }

    /// Cancelling this token stops the server and closes every session.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Serves until the shutdown token is cancelled.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(std::future::pending()).await
    }

    /// Serves until `signal` resolves or the shutdown token is cancelled.
    ///
    /// On shutdown the listener stops accepting and every established
    /// session sends a close frame before deregistering.
    pub async fn run_until<F>(self, signal: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!(
            "Listening on {} (endpoint {})",
            self.local_addr, self.endpoint_url
        );

        let token = self.shutdown.clone();
        let shutdown = async move {
            tokio::select! {
                _ = signal => {}
                _ = token.cancelled() => {}
            }
            info!("Shutting down");
            token.cancel();
        };

        axum::serve(
            self.listener,
            self.router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await?;

        Ok(())
    }
}

async fn handshake(
    State(state): State<Arc<ServerState>>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    method: Method,
    headers: HeaderMap,
    upgrade: Option<WebSocketUpgrade>,
) -> Response {
    let id = state.ids.next_id();
    let connection = Connection::new(id, remote_addr, state.channel_size);
    let session = state.session.clone();
    let request = HandshakeRequest::new(&method, &headers);

    let negotiated = state
        .negotiator
        .negotiate(&request, upgrade, move |socket| async move {
            session.run(AxumWebSocket::new(socket), connection).await;
        });

    match negotiated {
        Ok(response) => response,
        Err(e) => {
            warn!(
                "Rejected handshake for connection {} from {}: {}",
                id, remote_addr, e
            );
            e.into_response()
        }
    }
}

async fn unknown_endpoint(
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    uri: Uri,
) -> Response {
    let err = HandshakeError::UnknownEndpoint(uri.path().to_string());
    warn!("Rejected request from {}: {}", remote_addr, err);
    err.into_response()
}
