//! Infrastructure layer: sockets, TLS and the WebSocket protocol.
//!
//! - [`tls`]       – certificate loading and the rustls server configuration.
//! - [`handshake`] – per-connection TLS / WebSocket establishment and the
//!   origin policy.
//! - [`listener`]  – the accept loop.
//! - [`relay`]     – `EventRelaySession`, the default session handler.
//! - [`status`]    – the periodic `server-status` event feed.
//! - [`server`]    – the `Server` facade tying it all together.

pub mod handshake;
pub mod listener;
pub mod relay;
pub mod server;
pub mod status;
pub mod tls;

pub use handshake::{
    AllowAnyOrigin, AllowListOrigins, Connection, HandshakeError, OriginDecision, OriginPolicy,
    TransportStream,
};
pub use listener::{run_accept_loop, ActiveListener, Listener};
pub use relay::EventRelaySession;
pub use server::Server;
pub use status::spawn_status_feed;
pub use tls::{TlsContext, TlsError};
