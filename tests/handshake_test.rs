#[cfg(test)]
mod utils;

#[cfg(test)]
mod tests {
    use crate::utils::{upgrade_request, TestServer, ENDPOINT_PATH};
    use anyhow::Result;

    #[tokio::test]
    async fn test_missing_upgrade_header_is_rejected() -> Result<()> {
        let server = TestServer::start().await?;

        let request = format!(
            "GET {ENDPOINT_PATH} HTTP/1.1\r\n\
             Host: 127.0.0.1\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
             Sec-WebSocket-Version: 13\r\n\
             \r\n"
        );
        let response = server.raw_request(request.as_bytes()).await?;

        assert!(
            response.starts_with("HTTP/1.1 400 Bad Request"),
            "unexpected response: {response}"
        );
        assert!(response.ends_with("400 Bad Request"));
        assert!(response.to_ascii_lowercase().contains("connection: close"));
        assert!(server.registry.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_upgrade_value_is_case_sensitive() -> Result<()> {
        let server = TestServer::start().await?;

        let response = server
            .raw_request(&upgrade_request(ENDPOINT_PATH, "WebSocket", "13"))
            .await?;

        assert!(response.starts_with("HTTP/1.1 400 Bad Request"));
        assert!(server.registry.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_unsupported_version_gets_426() -> Result<()> {
        let server = TestServer::start().await?;

        let response = server
            .raw_request(&upgrade_request(ENDPOINT_PATH, "websocket", "8"))
            .await?;

        assert!(
            response.starts_with("HTTP/1.1 426"),
            "unexpected response: {response}"
        );
        assert!(response
            .to_ascii_lowercase()
            .contains("sec-websocket-version: 13"));
        assert!(server.registry.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_path_is_rejected() -> Result<()> {
        let server = TestServer::start().await?;

        let response = server
            .raw_request(&upgrade_request("/elsewhere", "websocket", "13"))
            .await?;

        assert!(response.starts_with("HTTP/1.1 400 Bad Request"));
        assert!(server.registry.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_post_is_rejected() -> Result<()> {
        let server = TestServer::start().await?;

        let request = format!(
            "POST {ENDPOINT_PATH} HTTP/1.1\r\n\
             Host: 127.0.0.1\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
             Sec-WebSocket-Version: 13\r\n\
             Content-Length: 0\r\n\
             \r\n"
        );
        let response = server.raw_request(request.as_bytes()).await?;

        assert!(response.starts_with("HTTP/1.1 400 Bad Request"));
        Ok(())
    }

    #[tokio::test]
    async fn test_malformed_request_is_rejected() -> Result<()> {
        let server = TestServer::start().await?;

        let response = server
            .raw_request(b"GET /websocket HTTP/1.1\r\nthis is not a header\r\n\r\n")
            .await?;

        assert!(
            response.starts_with("HTTP/1.1 400"),
            "unexpected response: {response}"
        );
        assert!(server.registry.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_valid_handshake_registers_connection() -> Result<()> {
        let server = TestServer::start().await?;
        assert!(server.registry.is_empty());

        let _client = server.connect().await?;
        server.wait_for_members(1).await;

        Ok(())
    }
}
