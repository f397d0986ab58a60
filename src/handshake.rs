//! WebSocket handshake negotiation
//!
//! Decides whether an HTTP request becomes a WebSocket connection. Requests
//! that are not a proper upgrade get `400 Bad Request` (status text as body);
//! requests for a protocol version other than 13 get the RFC 6455
//! `426 Upgrade Required` response advertising version 13. Either way the
//! response carries `Connection: close` so the socket does not linger.

use crate::config::{ConfigError, ServerConfig};
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade as AxumWebSocketUpgrade},
        FromRequestParts, OptionalFromRequestParts,
    },
    http::{header, request::Parts, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
};
use base64::Engine;
use std::future::Future;
use thiserror::Error;
use tracing::warn;

/// The only protocol version the server speaks.
pub const SUPPORTED_VERSION: &str = "13";

/// WebSocket upgrade extractor that can be used with Option<>
///
/// Extraction fails (yielding `None`) when the transport cannot hand over the
/// raw connection; the negotiator turns that into a 400.
pub struct WebSocketUpgrade {
    inner: AxumWebSocketUpgrade,
}

impl<S> FromRequestParts<S> for WebSocketUpgrade
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let inner = AxumWebSocketUpgrade::from_request_parts(parts, state)
            .await
            .map_err(IntoResponse::into_response)?;
        Ok(Self { inner })
    }
}

impl<S> OptionalFromRequestParts<S> for WebSocketUpgrade
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        match AxumWebSocketUpgrade::from_request_parts(parts, state).await {
            Ok(inner) => Ok(Some(Self { inner })),
            Err(_) => Ok(None),
        }
    }
}

/// The decoded HTTP request that precedes an upgrade.
#[derive(Debug, Clone, Copy)]
pub struct HandshakeRequest<'a> {
    method: &'a Method,
    headers: &'a HeaderMap,
}

impl<'a> HandshakeRequest<'a> {
    pub fn new(method: &'a Method, headers: &'a HeaderMap) -> Self {
        Self { method, headers }
    }

    pub fn method(&self) -> &Method {
        self.method
    }

    fn header(&self, name: header::HeaderName) -> Option<&'a str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn upgrade(&self) -> Option<&'a str> {
        self.header(header::UPGRADE)
    }

    pub fn connection(&self) -> Option<&'a str> {
        self.header(header::CONNECTION)
    }

    pub fn version(&self) -> Option<&'a str> {
        self.header(header::SEC_WEBSOCKET_VERSION)
    }

    pub fn key(&self) -> Option<&'a str> {
        self.header(header::SEC_WEBSOCKET_KEY)
    }
}

/// Why a handshake was refused.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("expected GET, got {0}")]
    InvalidMethod(String),

    #[error("missing or invalid Upgrade header")]
    NotAnUpgrade,

    #[error("Connection header does not contain the upgrade token")]
    MissingConnectionUpgrade,

    #[error("unsupported WebSocket version: {0:?}")]
    UnsupportedVersion(Option<String>),

    #[error("missing or malformed Sec-WebSocket-Key")]
    InvalidKey,

    #[error("no WebSocket endpoint at {0}")]
    UnknownEndpoint(String),

    #[error("connection cannot be upgraded")]
    UpgradeUnavailable,
}

impl HandshakeError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::UnsupportedVersion(_) => StatusCode::UPGRADE_REQUIRED,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for HandshakeError {
    fn into_response(self) -> Response {
        let status = self.status();
        let close = (header::CONNECTION, HeaderValue::from_static("close"));

        match self {
            Self::UnsupportedVersion(_) => (
                status,
                [
                    (
                        header::SEC_WEBSOCKET_VERSION,
                        HeaderValue::from_static(SUPPORTED_VERSION),
                    ),
                    close,
                ],
            )
                .into_response(),
            _ => (status, [close], status_text(status)).into_response(),
        }
    }
}

/// `"400 Bad Request"` style status line text.
fn status_text(status: StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => format!("{} {}", status.as_u16(), reason),
        None => status.as_u16().to_string(),
    }
}

/// Validates upgrade requests and completes the handshake for the fixed
/// endpoint.
#[derive(Debug, Clone)]
pub struct HandshakeNegotiator {
    endpoint_url: String,
    endpoint_path: String,
    max_message_size: usize,
}

impl HandshakeNegotiator {
    pub fn new(config: &ServerConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            endpoint_path: config.endpoint_path()?,
            endpoint_url: config.endpoint_url.clone(),
            max_message_size: config.max_message_size,
        })
    }

    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }

    pub fn endpoint_path(&self) -> &str {
        &self.endpoint_path
    }

    /// Checks `request` against the upgrade requirements, first failure wins:
    /// method, `Upgrade` (exactly `websocket`), `Connection`, version, key.
    pub fn validate(&self, request: &HandshakeRequest<'_>) -> Result<(), HandshakeError> {
        if request.method() != Method::GET {
            return Err(HandshakeError::InvalidMethod(request.method().to_string()));
        }

        if request.upgrade() != Some("websocket") {
            return Err(HandshakeError::NotAnUpgrade);
        }

        let has_upgrade_token = request.connection().is_some_and(|value| {
            value
                .split(',')
                .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
        });
        if !has_upgrade_token {
            return Err(HandshakeError::MissingConnectionUpgrade);
        }

        match request.version() {
            Some(SUPPORTED_VERSION) => {}
            other => {
                return Err(HandshakeError::UnsupportedVersion(
                    other.map(str::to_string),
                ))
            }
        }

        let key_is_valid = request.key().is_some_and(|key| {
            base64::engine::general_purpose::STANDARD
                .decode(key.trim())
                .is_ok_and(|decoded| decoded.len() == 16)
        });
        if !key_is_valid {
            return Err(HandshakeError::InvalidKey);
        }

        Ok(())
    }

    /// Validates `request` and, on success, answers with `101 Switching
    /// Protocols` (no sub-protocol, no extensions). `on_established` runs
    /// with the upgraded socket once the response has been written.
    pub fn negotiate<F, Fut>(
        &self,
        request: &HandshakeRequest<'_>,
        upgrade: Option<WebSocketUpgrade>,
        on_established: F,
    ) -> Result<Response, HandshakeError>
    where
        F: FnOnce(WebSocket) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.validate(request)?;

        let upgrade = upgrade.ok_or(HandshakeError::UpgradeUnavailable)?;

        Ok(upgrade
            .inner
            .max_message_size(self.max_message_size)
            .on_failed_upgrade(|e: axum::Error| warn!("WebSocket upgrade failed: {}", e))
            .on_upgrade(on_established))
    }
}
