//! EventRelaySession: the session handler the binary ships with.
//!
//! # Protocol
//!
//! 1. The peer's first message is a JSON [`Credentials`] object
//!    (`{"token": "..."}`).  It is handed to the session's [`Authorizer`].
//! 2. The server answers with one auth frame:
//!
//!    ```json
//!    {"namespace":"auth","name":"authenticated","args":{"identity":"token"}}
//!    {"namespace":"auth","name":"error","args":{"reason":"credentials rejected"}}
//!    ```
//!
//!    After an error frame the connection is closed.
//! 3. From then on every published event is sent as
//!    `{"namespace":"events","name":<kind>,"args":<payload>}`.
//!
//! Over WebSocket each frame is one text message.  Over raw TLS each frame is
//! one line of JSON terminated by `\n`.
//!
//! Requests after authentication are outside this handler's job; they are
//! read and ignored so the peer's writes never back up.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use sysadm_core::{Authorizer, Credentials, Event, SessionId};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use crate::application::fanout::Subscription;
use crate::application::session::{ClosingSignal, Session, SessionHandler, SessionParts};
use crate::infrastructure::handshake::{Connection, TransportStream};

/// How long to wait for the peer's Close reply after sending ours.
const CLOSE_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
enum RelayError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

/// How a relay ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RelayEnd {
    PeerClosed,
    ServerClosing,
    Rejected,
    Unsubscribed,
}

#[derive(Serialize)]
struct OutboundFrame<'a> {
    namespace: &'a str,
    name: &'a str,
    args: &'a Value,
}

fn event_frame(event: &Event) -> Result<String, serde_json::Error> {
    serde_json::to_string(&OutboundFrame {
        namespace: "events",
        name: &event.kind,
        args: &event.payload,
    })
}

fn auth_frame(outcome: &Result<String, String>) -> Result<String, serde_json::Error> {
    let (name, args) = match outcome {
        Ok(identity) => ("authenticated", json!({ "identity": identity })),
        Err(reason) => ("error", json!({ "reason": reason })),
    };
    serde_json::to_string(&OutboundFrame {
        namespace: "auth",
        name,
        args: &args,
    })
}

/// Parses and checks the first message.  `Ok` carries the identity name,
/// `Err` the reason reported to the peer.
fn authenticate(id: SessionId, authorizer: &dyn Authorizer, first: &[u8]) -> Result<String, String> {
    let credentials: Credentials = serde_json::from_slice(first).map_err(|e| {
        debug!(session_id = %id, error = %e, "malformed credentials");
        "malformed credentials".to_string()
    })?;
    match authorizer.authorize(&credentials) {
        Ok(identity) => {
            info!(session_id = %id, identity = %identity.name, "session authenticated");
            Ok(identity.name)
        }
        Err(e) => {
            warn!(session_id = %id, error = %e, "authentication failed");
            Err(e.to_string())
        }
    }
}

/// Relays events to authenticated peers on either transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventRelaySession;

#[async_trait]
impl SessionHandler<Connection> for EventRelaySession {
    async fn run(&self, session: Session<Connection>) {
        let SessionParts {
            id,
            connection,
            authorizer,
            mut events,
            mut closing,
        } = session.into_parts();
        let peer = connection.peer;

        let result = match connection.stream {
            TransportStream::WebSocket(ws) => {
                relay_websocket(ws, id, &*authorizer, &mut events, &mut closing).await
            }
            TransportStream::RawTls(tls) => {
                relay_lines(tls, id, &*authorizer, &mut events, &mut closing).await
            }
        };

        match result {
            Ok(end) => debug!(session_id = %id, %peer, ?end, "relay finished"),
            Err(e) => warn!(session_id = %id, %peer, error = %e, "relay ended with error"),
        }
    }
}

// ── WebSocket ─────────────────────────────────────────────────────────────────

/// `true` for errors that only mean the peer went away.
fn is_peer_gone(e: &WsError) -> bool {
    matches!(
        e,
        WsError::ConnectionClosed
            | WsError::AlreadyClosed
            | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake)
    )
}

/// Reads until a data frame arrives; `None` once the peer has closed.
async fn next_data_frame<S>(ws: &mut WebSocketStream<S>) -> Result<Option<Vec<u8>>, WsError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(msg) = ws.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) if is_peer_gone(&e) => return Ok(None),
            Err(e) => return Err(e),
        };
        match msg {
            WsMessage::Text(text) => return Ok(Some(text.into_bytes())),
            WsMessage::Binary(bytes) => return Ok(Some(bytes)),
            WsMessage::Close(_) => return Ok(None),
            WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => {}
        }
    }
    Ok(None)
}

async fn close_websocket<S>(ws: &mut WebSocketStream<S>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if let Err(e) = ws.close(None).await {
        debug!(error = %e, "sending WebSocket Close failed");
        return;
    }
    let _ = tokio::time::timeout(CLOSE_DRAIN_TIMEOUT, async {
        while let Some(Ok(_)) = ws.next().await {}
    })
    .await;
}

async fn relay_websocket<S>(
    mut ws: WebSocketStream<S>,
    id: SessionId,
    authorizer: &dyn Authorizer,
    events: &mut Subscription,
    closing: &mut ClosingSignal,
) -> Result<RelayEnd, RelayError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let first = tokio::select! {
        () = closing.wait() => {
            close_websocket(&mut ws).await;
            return Ok(RelayEnd::ServerClosing);
        }
        first = next_data_frame(&mut ws) => match first? {
            Some(first) => first,
            None => return Ok(RelayEnd::PeerClosed),
        },
    };

    let outcome = authenticate(id, authorizer, &first);
    ws.send(WsMessage::Text(auth_frame(&outcome)?)).await?;
    if outcome.is_err() {
        close_websocket(&mut ws).await;
        return Ok(RelayEnd::Rejected);
    }

    loop {
        tokio::select! {
            () = closing.wait() => {
                close_websocket(&mut ws).await;
                return Ok(RelayEnd::ServerClosing);
            }
            event = events.recv() => match event {
                Some(event) => ws.send(WsMessage::Text(event_frame(&event)?)).await?,
                None => {
                    close_websocket(&mut ws).await;
                    return Ok(RelayEnd::Unsubscribed);
                }
            },
            inbound = ws.next() => match inbound {
                None | Some(Ok(WsMessage::Close(_))) => return Ok(RelayEnd::PeerClosed),
                Some(Ok(WsMessage::Text(_) | WsMessage::Binary(_))) => {
                    debug!(session_id = %id, "ignoring inbound request frame");
                }
                Some(Ok(_)) => {}
                Some(Err(e)) if is_peer_gone(&e) => return Ok(RelayEnd::PeerClosed),
                Some(Err(e)) => return Err(e.into()),
            },
        }
    }
}

// ── Raw TLS (newline-delimited JSON) ──────────────────────────────────────────

async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

async fn relay_lines<S>(
    stream: S,
    id: SessionId,
    authorizer: &dyn Authorizer,
    events: &mut Subscription,
    closing: &mut ClosingSignal,
) -> Result<RelayEnd, RelayError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut lines = BufReader::new(reader).lines();

    let first = tokio::select! {
        () = closing.wait() => {
            writer.shutdown().await?;
            return Ok(RelayEnd::ServerClosing);
        }
        line = lines.next_line() => match line? {
            Some(line) => line,
            None => return Ok(RelayEnd::PeerClosed),
        },
    };

    let outcome = authenticate(id, authorizer, first.as_bytes());
    write_line(&mut writer, &auth_frame(&outcome)?).await?;
    if outcome.is_err() {
        writer.shutdown().await?;
        return Ok(RelayEnd::Rejected);
    }

    loop {
        tokio::select! {
            () = closing.wait() => {
                writer.shutdown().await?;
                return Ok(RelayEnd::ServerClosing);
            }
            event = events.recv() => match event {
                Some(event) => write_line(&mut writer, &event_frame(&event)?).await?,
                None => {
                    writer.shutdown().await?;
                    return Ok(RelayEnd::Unsubscribed);
                }
            },
            line = lines.next_line() => match line? {
                Some(_) => debug!(session_id = %id, "ignoring inbound request line"),
                None => return Ok(RelayEnd::PeerClosed),
            },
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
