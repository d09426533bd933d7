//! # sysadm-server
//!
//! Connection acceptance and session lifecycle for the sysadm API server.
//!
//! The server listens with one of two transports, TLS WebSocket (`wss`) or
//! raw TLS over TCP (`tls`).  Every connection that completes its handshake
//! becomes a session: it gets an id, is subscribed to the process-wide event
//! feed, and is handed to a [`SessionHandler`] that speaks the application
//! protocol.  When the session ends it is deregistered and unsubscribed.
//!
//! # Architecture (for beginners)
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ infrastructure   Server ─► ActiveListener ─► handshake tasks │
//! │                     │                              │         │
//! │                     ▼                  established connections│
//! ├──────────────────────────────────────────────────────────────┤
//! │ application      Supervisor (owns ConnectionRegistry)        │
//! │                     │  subscribe / unsubscribe               │
//! │                     ▼                                        │
//! │                  EventBus ─► Subscription per session        │
//! ├──────────────────────────────────────────────────────────────┤
//! │ domain           ServerConfig   (+ sysadm-core types)        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Dependencies point downwards only.  The application layer is generic over
//! the connection type, so it is tested without sockets.
//!
//! [`SessionHandler`]: application::session::SessionHandler

pub mod application;
pub mod domain;
pub mod error;
pub mod infrastructure;

pub use application::{
    ClosingSignal, EventBus, ServerState, Session, SessionHandler, SessionParts,
    StaticTokenAuthorizer, Subscription,
};
pub use domain::{load_config, ConfigError, ServerConfig};
pub use error::{ServerError, ServerResult};
pub use infrastructure::{
    spawn_status_feed, Connection, EventRelaySession, Server, TransportStream,
};
