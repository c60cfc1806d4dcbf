//! Transport for the socket engine: direct TCP, or an HTTP-CONNECT tunnel
//! when a proxy is configured.

use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::EngineError;

#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
}

/// Opens a stream to `server:port`, tunnelling through the proxy when given.
pub async fn connect(
    server: &str,
    port: u16,
    proxy: Option<&ProxyConfig>,
) -> Result<TcpStream, EngineError> {
    match proxy {
        None => TcpStream::connect((server, port))
            .await
            .map_err(|e| EngineError::Connect(format!("{server}:{port}: {e}"))),
        Some(p) => {
            let mut stream = TcpStream::connect((p.host.as_str(), p.port))
                .await
                .map_err(|e| EngineError::Proxy(format!("{}:{}: {e}", p.host, p.port)))?;
            tunnel(&mut stream, server, port).await?;
            Ok(stream)
        }
    }
}

/// Performs the CONNECT handshake and leaves the stream positioned at the
/// start of the tunnelled byte stream.
async fn tunnel(stream: &mut TcpStream, server: &str, port: u16) -> Result<(), EngineError> {
    let request = format!("CONNECT {server}:{port} HTTP/1.1\r\nHost: {server}:{port}\r\n\r\n");
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| EngineError::Proxy(format!("sending CONNECT: {e}")))?;

    // Read the response head only; the tunnel payload follows the blank line.
    let mut head = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        let n = stream
            .read(&mut byte)
            .await
            .map_err(|e| EngineError::Proxy(format!("reading CONNECT response: {e}")))?;
        if n == 0 {
            return Err(EngineError::Proxy("proxy closed during CONNECT".into()));
        }
        head.push(byte[0]);
        if head.len() > 8 * 1024 {
            return Err(EngineError::Proxy("oversized CONNECT response".into()));
        }
    }

    let head = String::from_utf8_lossy(&head);
    let status_line = head.lines().next().unwrap_or_default();
    if !status_line.contains(" 200") {
        return Err(EngineError::Proxy(format!(
            "proxy refused tunnel: {status_line}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn connect_tunnels_through_accepting_proxy() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(sock);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            assert!(line.starts_with("CONNECT example.org:7690"));
            // drain headers
            loop {
                let mut hdr = String::new();
                reader.read_line(&mut hdr).await.unwrap();
                if hdr == "\r\n" {
                    break;
                }
            }
            let mut sock = reader.into_inner();
            sock.write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
                .await
                .unwrap();
            sock.write_all(b"tunnelled\n").await.unwrap();
        });

        let proxy = ProxyConfig {
            host: addr.ip().to_string(),
            port: addr.port(),
        };
        let stream = connect("example.org", 7690, Some(&proxy)).await.unwrap();
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line, "tunnelled\n");

        server.await.unwrap();
    }

    #[tokio::test]
    async fn refused_tunnel_is_a_proxy_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = sock.read(&mut buf).await;
            sock.write_all(b"HTTP/1.1 403 Forbidden\r\n\r\n").await.unwrap();
        });

        let proxy = ProxyConfig {
            host: addr.ip().to_string(),
            port: addr.port(),
        };
        let err = connect("example.org", 7690, Some(&proxy)).await.unwrap_err();
        assert!(matches!(err, EngineError::Proxy(_)));
    }
}
