// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

// WebSocket connections to collectors and upload endpoints

use std::net::IpAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::{Host, Url};

use crate::error::{Error, Result};

/// Default bound on establishing a connection
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Non-fatal warning about an endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityWarning {
    /// Plaintext transport to a non-loopback host from a secure context
    PlaintextFromSecureContext { endpoint: String },
}

/// Parse and validate an endpoint URL
pub fn parse_endpoint(endpoint: &str) -> Result<Url> {
    let url = Url::parse(endpoint).map_err(|e| Error::ConnectFailed {
        endpoint: endpoint.to_string(),
        message: format!("invalid endpoint URL: {}", e),
    })?;

    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(Error::ConnectFailed {
            endpoint: endpoint.to_string(),
            message: format!("unsupported scheme {:?}, expected ws or wss", other),
        }),
    }
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => IpAddr::V4(ip).is_loopback(),
        Some(Host::Ipv6(ip)) => IpAddr::V6(ip).is_loopback(),
        None => false,
    }
}

/// Flag plaintext endpoints reached from a secure context
///
/// Loopback targets are never flagged. The connection is not blocked either way.
pub fn check_transport_security(url: &Url, secure_context: bool) -> Option<SecurityWarning> {
    if secure_context && url.scheme() == "ws" && !is_loopback(url) {
        warn!(endpoint = %url, "Plaintext WebSocket endpoint used from a secure context");
        return Some(SecurityWarning::PlaintextFromSecureContext {
            endpoint: url.to_string(),
        });
    }
    None
}

/// Open a WebSocket connection, bounded by `timeout`
pub async fn connect(url: &Url, timeout: Duration) -> Result<WsStream> {
    let endpoint = url.to_string();
    debug!(endpoint = %endpoint, timeout_ms = timeout.as_millis() as u64, "Connecting");

    match tokio::time::timeout(timeout, connect_async(url.as_str())).await {
        Ok(Ok((stream, _response))) => Ok(stream),
        Ok(Err(e)) => Err(Error::ConnectFailed {
            endpoint,
            message: e.to_string(),
        }),
        Err(_) => Err(Error::ConnectTimeout { endpoint, timeout }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_endpoint_schemes() {
        assert!(parse_endpoint("ws://127.0.0.1:6090").is_ok());
        assert!(parse_endpoint("wss://collector.example/upload").is_ok());
        assert!(matches!(
            parse_endpoint("http://collector.example"),
            Err(Error::ConnectFailed { .. })
        ));
        assert!(parse_endpoint("not a url").is_err());
    }

    #[test]
    fn test_plaintext_warning_from_secure_context() {
        let remote = Url::parse("ws://collector.example:6090").unwrap();
        assert!(check_transport_security(&remote, true).is_some());
        assert!(check_transport_security(&remote, false).is_none());

        let tls = Url::parse("wss://collector.example:6090").unwrap();
        assert!(check_transport_security(&tls, true).is_none());
    }

    #[test]
    fn test_loopback_is_never_flagged() {
        for endpoint in ["ws://localhost:6090", "ws://127.0.0.1:6090", "ws://[::1]:6090"] {
            let url = Url::parse(endpoint).unwrap();
            assert!(check_transport_security(&url, true).is_none(), "{}", endpoint);
        }
    }

    #[tokio::test]
    async fn test_connect_refused_is_connect_failed() {
        // Bind then drop to get a port with nothing listening
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let url = Url::parse(&format!("ws://127.0.0.1:{}/", port)).unwrap();
        let err = connect(&url, CONNECT_TIMEOUT).await.unwrap_err();
        assert!(matches!(err, Error::ConnectFailed { .. }));
    }

    #[tokio::test]
    async fn test_wss_attempts_tls_handshake() {
        // Accepts TCP and hangs up, so the handshake fails after TLS setup
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            if let Ok((socket, _)) = listener.accept().await {
                drop(socket);
            }
        });

        let url = Url::parse(&format!("wss://127.0.0.1:{}/", port)).unwrap();
        match connect(&url, CONNECT_TIMEOUT).await {
            Err(Error::ConnectFailed { message, .. }) => {
                assert!(!message.contains("not compiled"), "{}", message);
            }
            other => panic!("Expected handshake failure, got {:?}", other.map(|_| ())),
        }
    }
}
