//! Errors surfaced by [`Server::start`](crate::infrastructure::server::Server::start).
//!
//! Only two conditions stop a server from starting: the TLS stack cannot
//! provide the required protocol at all, or the listening socket cannot be
//! bound.  A missing certificate is not among them; it degrades TLS and the
//! server still listens.  Everything that goes wrong after `Listening` is
//! absorbed where it happens and only logged.

use std::io;

use thiserror::Error;

use crate::application::lifecycle::ServerState;
use crate::infrastructure::tls::TlsError;

/// Why a server could not be started or stopped.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The host offers no usable TLS capability.
    #[error("TLS is unavailable: {0}")]
    TlsUnavailable(#[source] TlsError),

    /// The listening socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    BindFailed {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// `start` was called while a previous run has not fully stopped.
    #[error("server is already running (state: {0})")]
    AlreadyRunning(ServerState),

    /// A server task ended abnormally.
    #[error("internal server error: {0}")]
    Internal(String),
}

impl ServerError {
    /// `true` for the conditions that abort startup.
    pub fn is_fatal_startup(&self) -> bool {
        matches!(self, Self::TlsUnavailable(_) | Self::BindFailed { .. })
    }
}

/// Convenience alias used throughout the server crate.
pub type ServerResult<T> = Result<T, ServerError>;
