//! Per-connection establishment: TLS termination, then (for the WebSocket
//! transport) the HTTP upgrade with its origin check.
//!
//! A connection only counts as accepted once everything here has succeeded.
//! Any failure is local to the one connection: the caller logs it and drops
//! the socket, and the server keeps accepting.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{header::ORIGIN, StatusCode};
use tokio_tungstenite::{accept_hdr_async, tungstenite, WebSocketStream};
use tracing::debug;

/// Why one connection failed to establish.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// TLS negotiation failed (protocol error, no certificate, peer hung up).
    #[error("TLS handshake failed: {0}")]
    Tls(#[source] io::Error),

    /// The HTTP upgrade to WebSocket failed.
    #[error("WebSocket upgrade failed: {0}")]
    WebSocket(#[source] tungstenite::Error),

    /// The origin policy refused the upgrade.
    #[error("WebSocket origin not allowed")]
    OriginDenied,

    /// The peer did not complete the handshake in time.
    #[error("handshake timed out after {0:?}")]
    TimedOut(Duration),
}

// ── Origin policy ─────────────────────────────────────────────────────────────

/// Outcome of an [`OriginPolicy`] check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginDecision {
    Allow,
    Deny,
}

/// Decides whether a WebSocket upgrade from `origin` may proceed.
///
/// `origin` is the value of the upgrade request's `Origin` header, or `None`
/// when the peer sent none.
pub trait OriginPolicy: Send + Sync + 'static {
    fn check(&self, origin: Option<&str>) -> OriginDecision;
}

/// Allows every origin.  The default.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAnyOrigin;

impl OriginPolicy for AllowAnyOrigin {
    fn check(&self, origin: Option<&str>) -> OriginDecision {
        debug!(origin = origin.unwrap_or("<none>"), "origin allowed");
        OriginDecision::Allow
    }
}

/// Allows only the listed origins.
///
/// Requests without an `Origin` header come from non-browser clients and are
/// allowed.  Comparison ignores ASCII case and a trailing `/`.
#[derive(Debug, Clone, Default)]
pub struct AllowListOrigins {
    allowed: Vec<String>,
}

fn normalize_origin(origin: &str) -> String {
    origin.trim().trim_end_matches('/').to_ascii_lowercase()
}

impl AllowListOrigins {
    pub fn new<I, T>(origins: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        Self {
            allowed: origins
                .into_iter()
                .map(|o| normalize_origin(o.as_ref()))
                .collect(),
        }
    }
}

impl OriginPolicy for AllowListOrigins {
    fn check(&self, origin: Option<&str>) -> OriginDecision {
        let Some(origin) = origin else {
            return OriginDecision::Allow;
        };
        let origin = normalize_origin(origin);
        let decision = if self.allowed.iter().any(|a| *a == origin) {
            OriginDecision::Allow
        } else {
            OriginDecision::Deny
        };
        debug!(origin = %origin, ?decision, "origin checked");
        decision
    }
}

/// Upgrade callback: applies `policy` to the request's `Origin` header.
fn check_upgrade(
    policy: &dyn OriginPolicy,
    request: &Request,
    response: Response,
) -> Result<Response, ErrorResponse> {
    let origin = request
        .headers()
        .get(ORIGIN)
        .and_then(|value| value.to_str().ok());
    match policy.check(origin) {
        OriginDecision::Allow => Ok(response),
        OriginDecision::Deny => {
            let mut denied = ErrorResponse::new(Some("origin not allowed".to_string()));
            *denied.status_mut() = StatusCode::FORBIDDEN;
            Err(denied)
        }
    }
}

// ── Established connections ───────────────────────────────────────────────────

/// The transport of an established connection.
pub enum TransportStream {
    /// TLS, then a completed WebSocket upgrade.
    WebSocket(WebSocketStream<TlsStream<TcpStream>>),
    /// TLS only; the session speaks directly on the stream.
    RawTls(TlsStream<TcpStream>),
}

/// An accepted, fully established connection.
pub struct Connection {
    pub peer: SocketAddr,
    pub stream: TransportStream,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.stream {
            TransportStream::WebSocket(_) => "websocket",
            TransportStream::RawTls(_) => "raw-tls",
        };
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("transport", &kind)
            .finish()
    }
}

/// Terminates TLS on `tcp`.
pub async fn establish_raw_tls(
    acceptor: &TlsAcceptor,
    tcp: TcpStream,
    peer: SocketAddr,
) -> Result<Connection, HandshakeError> {
    let tls = acceptor.accept(tcp).await.map_err(HandshakeError::Tls)?;
    Ok(Connection {
        peer,
        stream: TransportStream::RawTls(tls),
    })
}

/// Terminates TLS on `tcp`, then performs the WebSocket upgrade.
pub async fn establish_websocket(
    acceptor: &TlsAcceptor,
    tcp: TcpStream,
    peer: SocketAddr,
    origin_policy: &dyn OriginPolicy,
) -> Result<Connection, HandshakeError> {
    let tls = acceptor.accept(tcp).await.map_err(HandshakeError::Tls)?;
    let ws = accept_hdr_async(tls, |request: &Request, response: Response| {
        check_upgrade(origin_policy, request, response)
    })
    .await
    .map_err(|e| match e {
        tungstenite::Error::Http(ref response) if response.status() == StatusCode::FORBIDDEN => {
            HandshakeError::OriginDenied
        }
        other => HandshakeError::WebSocket(other),
    })?;
    Ok(Connection {
        peer,
        stream: TransportStream::WebSocket(ws),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn upgrade_request(origin: Option<&str>) -> Request {
        let mut builder = Request::builder().uri("/");
        if let Some(origin) = origin {
            builder = builder.header(ORIGIN, origin);
        }
        builder.body(()).unwrap()
    }

    #[test]
    fn test_allow_any_origin_allows_everything() {
        let policy = AllowAnyOrigin;
        assert_eq!(policy.check(Some("https://evil.example")), OriginDecision::Allow);
        assert_eq!(policy.check(None), OriginDecision::Allow);
    }

    #[test]
    fn test_allow_list_matches_ignoring_case_and_trailing_slash() {
        let policy = AllowListOrigins::new(["https://Admin.Example.org/"]);
        assert_eq!(
            policy.check(Some("https://admin.example.org")),
            OriginDecision::Allow
        );
        assert_eq!(
            policy.check(Some("https://other.example.org")),
            OriginDecision::Deny
        );
    }

    #[test]
    fn test_allow_list_allows_requests_without_origin() {
        let policy = AllowListOrigins::new(["https://admin.example.org"]);
        assert_eq!(policy.check(None), OriginDecision::Allow);
    }

    #[test]
    fn test_check_upgrade_passes_response_through_when_allowed() {
        // Arrange
        let request = upgrade_request(Some("https://admin.example.org"));

        // Act
        let result = check_upgrade(&AllowAnyOrigin, &request, Response::new(()));

        // Assert
        assert!(result.is_ok());
    }

    #[test]
    fn test_check_upgrade_answers_403_when_denied() {
        // Arrange
        let policy = AllowListOrigins::new(["https://admin.example.org"]);
        let request = upgrade_request(Some("https://evil.example"));

        // Act
        let denied = check_upgrade(&policy, &request, Response::new(())).unwrap_err();

        // Assert
        assert_eq!(denied.status(), StatusCode::FORBIDDEN);
    }
}
