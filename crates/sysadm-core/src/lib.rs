//! # sysadm-core
//!
//! Shared types for the sysadm API server: session identity, transport
//! selection, broadcast events, the credential-validation contract, and the
//! connection registry that tracks every open session.
//!
//! This crate performs no I/O.  It has zero dependencies on sockets, TLS, or
//! an async runtime, so everything in it can be unit-tested in isolation and
//! reused by any front end that accepts sysadm sessions.
//!
//! # Architecture overview (for beginners)
//!
//! The sysadm server accepts clients over one of two transports (a TLS-secured
//! WebSocket listener or a raw TLS-over-TCP listener) and streams a shared,
//! process-wide event feed to every live connection.
//!
//! - **`domain`** – Plain value types: [`SessionId`], [`TransportMode`],
//!   [`Event`], and the [`Authorizer`] trait implemented by the credential
//!   checker that each session consults.
//!
//! - **`registry`** – [`ConnectionRegistry`], the authoritative map from
//!   session identifier to open session, including the policy that hands
//!   out fresh identifiers.

pub mod domain;
pub mod registry;

// Re-export the most-used types at the crate root so callers can write
// `sysadm_core::SessionId` instead of `sysadm_core::domain::session_id::SessionId`.
pub use domain::auth::{AuthError, Authorizer, Credentials, Identity};
pub use domain::event::Event;
pub use domain::session_id::{ParseSessionIdError, SessionId};
pub use domain::transport::{ParseTransportModeError, TransportMode};
pub use registry::{ConnectionRegistry, Identified, RegistryError};

#[cfg(any(test, feature = "mock"))]
pub use domain::auth::MockAuthorizer;
