//! Application layer: session bookkeeping that does not touch sockets.
//!
//! - [`fanout`]    – `EventBus`, delivering each event to every live session.
//! - [`session`]   – what a protocol handler receives for one connection.
//! - [`lifecycle`] – `ServerState` and the supervisor that owns the registry.
//! - [`auth`]      – a token-based `Authorizer` for the binary.
//!
//! Nothing here knows about TLS or WebSockets; the supervisor is generic over
//! the connection type, which lets its tests drive it with plain channels.

pub mod auth;
pub mod fanout;
pub mod lifecycle;
pub mod session;

pub use auth::StaticTokenAuthorizer;
pub use fanout::{EventBus, Subscription};
pub use lifecycle::{ServerState, ShutdownPolicy, Supervisor};
pub use session::{ClosingSignal, Session, SessionHandler, SessionParts};
