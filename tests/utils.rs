#[cfg(test)]
use anyhow::Result;
#[cfg(test)]
use broadcast_chat::{ChatServer, ConnectionRegistry, ServerConfig, ServerError};
#[cfg(test)]
use futures_util::StreamExt;
#[cfg(test)]
use std::net::SocketAddr;
#[cfg(test)]
use std::sync::Arc;
#[cfg(test)]
use std::time::Duration;
#[cfg(test)]
use tokio::io::{AsyncReadExt, AsyncWriteExt};
#[cfg(test)]
use tokio::net::TcpStream;
#[cfg(test)]
use tokio::task::JoinHandle;
#[cfg(test)]
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
#[cfg(test)]
use tokio_util::sync::CancellationToken;

#[cfg(test)]
pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[cfg(test)]
#[allow(dead_code)]
pub const ENDPOINT_PATH: &str = "/websocket";

#[cfg(test)]
#[allow(dead_code)]
pub struct TestServer {
    pub addr: SocketAddr,
    pub registry: Arc<ConnectionRegistry>,
    pub shutdown: CancellationToken,
    pub handle: JoinHandle<Result<(), ServerError>>,
}

#[cfg(test)]
#[allow(dead_code)]
impl TestServer {
    /// Starts a server on a dynamically assigned port.
    pub async fn start() -> Result<Self> {
        Self::start_with(ServerConfig::default()).await
    }

    pub async fn start_with(config: ServerConfig) -> Result<Self> {
        let config = config
            .with_bind_addr("127.0.0.1:0".parse()?)
            .with_endpoint_url(format!("ws://127.0.0.1{ENDPOINT_PATH}"));
        let server = ChatServer::bind(config).await?;

        let addr = server.local_addr();
        let registry = server.registry();
        let shutdown = server.shutdown_token();
        let handle = tokio::spawn(server.run());

        Ok(Self {
            addr,
            registry,
            shutdown,
            handle,
        })
    }

    pub fn url(&self) -> String {
        format!("ws://{}{}", self.addr, ENDPOINT_PATH)
    }

    pub async fn connect(&self) -> Result<WsClient> {
        let (ws_stream, response) = connect_async(self.url()).await?;
        assert_eq!(response.status().as_u16(), 101);
        Ok(ws_stream)
    }

    /// Polls the registry until it holds `expected` members.
    pub async fn wait_for_members(&self, expected: usize) {
        for _ in 0..200 {
            if self.registry.len() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "registry has {} members, expected {}",
            self.registry.len(),
            expected
        );
    }

    /// Writes `request` on a raw TCP stream and reads until the server
    /// closes the connection.
    pub async fn raw_request(&self, request: &[u8]) -> Result<String> {
        let mut stream = TcpStream::connect(self.addr).await?;
        stream.write_all(request).await?;

        let mut buf = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut buf))
            .await
            .map_err(|_| anyhow::anyhow!("server did not close the connection"))??;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

/// Waits for the next text message, skipping nothing.
#[cfg(test)]
#[allow(dead_code)]
pub async fn next_text(client: &mut WsClient) -> Result<String> {
    match tokio::time::timeout(Duration::from_secs(5), client.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => Ok(text.as_str().to_owned()),
        Ok(other) => Err(anyhow::anyhow!("Expected text message, got {other:?}")),
        Err(_) => Err(anyhow::anyhow!("Timed out waiting for text message")),
    }
}

/// Asserts that nothing arrives on `client` for a short while.
#[cfg(test)]
#[allow(dead_code)]
pub async fn assert_silent(client: &mut WsClient) {
    if let Ok(msg) = tokio::time::timeout(Duration::from_millis(200), client.next()).await {
        panic!("expected no message, got {msg:?}");
    }
}

/// Reads until the server drops the connection, failing on any text.
#[cfg(test)]
#[allow(dead_code)]
pub async fn assert_closed_without_text(client: &mut WsClient) {
    loop {
        match tokio::time::timeout(Duration::from_secs(5), client.next()).await {
            Ok(None) | Ok(Some(Err(_))) => return,
            Ok(Some(Ok(Message::Close(_)))) => continue,
            Ok(Some(Ok(other))) => panic!("unexpected message before close: {other:?}"),
            Err(_) => panic!("connection was not closed"),
        }
    }
}

/// A complete, valid upgrade request for `path`, optionally overriding
/// header lines.
#[cfg(test)]
#[allow(dead_code)]
pub fn upgrade_request(path: &str, upgrade: &str, version: &str) -> Vec<u8> {
    format!(
        "GET {path} HTTP/1.1\r\n\
         Host: 127.0.0.1\r\n\
         Upgrade: {upgrade}\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
         Sec-WebSocket-Version: {version}\r\n\
         \r\n"
    )
    .into_bytes()
}
