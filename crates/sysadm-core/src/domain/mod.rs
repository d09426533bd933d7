//! Domain value types shared by every layer of the server.
//!
//! Nothing in here opens a socket, reads a file, or awaits a future.
//!
//! # Sub-modules
//!
//! - **`session_id`** – The identifier handed to each accepted connection.
//! - **`transport`** – The two-valued transport selector.
//! - **`event`** – The opaque `(kind, payload)` pair fanned out to sessions.
//! - **`auth`** – The credential-validation contract.

pub mod auth;
pub mod event;
pub mod session_id;
pub mod transport;
