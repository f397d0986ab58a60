//! Server configuration
//!
//! Values come from builder methods or from `CHAT_*` environment variables.

use axum::http::Uri;
use std::net::SocketAddr;
use thiserror::Error;

/// Default listening address.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:9999";
/// Default WebSocket endpoint the handshake is bound to.
pub const DEFAULT_ENDPOINT_URL: &str = "ws://localhost:9999/websocket";
/// Default per-connection outbound queue size.
pub const DEFAULT_CHANNEL_SIZE: usize = 100;
/// Default maximum size of a single inbound message.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 65536;

/// Errors produced while building a [`ServerConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?} ({reason})")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid endpoint URL {0:?}: expected an absolute URL with a path")]
    InvalidEndpoint(String),
}

/// Configuration for the chat server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the TCP listener binds to
    pub bind_addr: SocketAddr,
    /// Fixed WebSocket endpoint identifier; its path selects the upgrade route
    pub endpoint_url: String,
    /// Outbound queue capacity per connection
    pub channel_size: usize,
    /// Maximum size of an inbound WebSocket message in bytes
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9999)),
            endpoint_url: DEFAULT_ENDPOINT_URL.to_string(),
            channel_size: DEFAULT_CHANNEL_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl ServerConfig {
    /// Loads the configuration from the process environment.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `CHAT_BIND_ADDR` | `0.0.0.0:9999` |
    /// | `CHAT_ENDPOINT_URL` | `ws://localhost:9999/websocket` |
    /// | `CHAT_CHANNEL_SIZE` | `100` |
    /// | `CHAT_MAX_MESSAGE_SIZE` | `65536` |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads the configuration using `lookup` to resolve variable names.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup("CHAT_BIND_ADDR") {
            config.bind_addr = value.parse().map_err(|e: std::net::AddrParseError| {
                ConfigError::InvalidValue {
                    name: "CHAT_BIND_ADDR",
                    value: value.clone(),
                    reason: e.to_string(),
                }
            })?;
        }

        if let Some(value) = lookup("CHAT_ENDPOINT_URL") {
            config.endpoint_url = value;
        }

        if let Some(value) = lookup("CHAT_CHANNEL_SIZE") {
            config.channel_size = parse_size("CHAT_CHANNEL_SIZE", &value)?;
        }

        if let Some(value) = lookup("CHAT_MAX_MESSAGE_SIZE") {
            config.max_message_size = parse_size("CHAT_MAX_MESSAGE_SIZE", &value)?;
        }

        config.endpoint_path()?;
        Ok(config)
    }

    #[must_use]
    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    #[must_use]
    pub fn with_endpoint_url(mut self, url: impl Into<String>) -> Self {
        self.endpoint_url = url.into();
        self
    }

    /// Sets the outbound queue size for each connection.
    ///
    /// When a peer's queue is full, broadcasts to that peer are dropped
    /// instead of blocking the sender.
    #[must_use]
    pub const fn with_channel_size(mut self, size: usize) -> Self {
        self.channel_size = size;
        self
    }

    #[must_use]
    pub const fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Returns the path component of the endpoint URL.
    pub fn endpoint_path(&self) -> Result<String, ConfigError> {
        let uri: Uri = self
            .endpoint_url
            .parse()
            .map_err(|_| ConfigError::InvalidEndpoint(self.endpoint_url.clone()))?;

        if uri.scheme().is_none() || uri.authority().is_none() {
            return Err(ConfigError::InvalidEndpoint(self.endpoint_url.clone()));
        }

        match uri.path() {
            "" => Ok("/".to_string()),
            path => Ok(path.to_string()),
        }
    }
}

fn parse_size(name: &'static str, value: &str) -> Result<usize, ConfigError> {
    match value.trim().parse::<usize>() {
        Ok(0) => Err(ConfigError::InvalidValue {
            name,
            value: value.to_string(),
            reason: "must be greater than zero".to_string(),
        }),
        Ok(size) => Ok(size),
        Err(e) => Err(ConfigError::InvalidValue {
            name,
            value: value.to_string(),
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.to_string(), DEFAULT_BIND_ADDR);
        assert_eq!(config.endpoint_url, DEFAULT_ENDPOINT_URL);
        assert_eq!(config.channel_size, 100);
        assert_eq!(config.max_message_size, 65536);
        assert_eq!(config.endpoint_path().unwrap(), "/websocket");
    }

    #[test]
    fn test_from_lookup_empty_environment() {
        let config = ServerConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.bind_addr.to_string(), DEFAULT_BIND_ADDR);
        assert_eq!(config.channel_size, DEFAULT_CHANNEL_SIZE);
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("CHAT_BIND_ADDR", "127.0.0.1:4000"),
            ("CHAT_ENDPOINT_URL", "ws://chat.example.com:4000/chat"),
            ("CHAT_CHANNEL_SIZE", "16"),
            ("CHAT_MAX_MESSAGE_SIZE", "1024"),
        ]))
        .unwrap();

        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:4000");
        assert_eq!(config.endpoint_path().unwrap(), "/chat");
        assert_eq!(config.channel_size, 16);
        assert_eq!(config.max_message_size, 1024);
    }

    #[test]
    fn test_from_lookup_rejects_bad_values() {
        let err = ServerConfig::from_lookup(lookup_from(&[("CHAT_BIND_ADDR", "nope")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                name: "CHAT_BIND_ADDR",
                ..
            }
        ));

        let err = ServerConfig::from_lookup(lookup_from(&[("CHAT_CHANNEL_SIZE", "0")]))
            .unwrap_err();
        assert!(err.to_string().contains("greater than zero"));

        let err = ServerConfig::from_lookup(lookup_from(&[("CHAT_ENDPOINT_URL", "/relative")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEndpoint(_)));
    }

    #[test]
    fn test_endpoint_without_path_maps_to_root() {
        let config = ServerConfig::default().with_endpoint_url("ws://localhost:9999");
        assert_eq!(config.endpoint_path().unwrap(), "/");
    }

    #[test]
    fn test_builder_methods() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let config = ServerConfig::default()
            .with_bind_addr(addr)
            .with_endpoint_url("ws://127.0.0.1/ws")
            .with_channel_size(8)
            .with_max_message_size(512);
        assert_eq!(config.bind_addr, addr);
        assert_eq!(config.endpoint_path().unwrap(), "/ws");
        assert_eq!(config.channel_size, 8);
        assert_eq!(config.max_message_size, 512);
    }
}
