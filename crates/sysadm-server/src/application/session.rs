//! Session: one accepted connection as handed to its protocol handler.
//!
//! The server does not speak the per-connection application protocol.  It
//! builds a [`Session`] for every accepted connection and passes it to a
//! [`SessionHandler`], which owns the connection from then on.
//!
//! # Session lifecycle
//!
//! ```text
//! accepted ──► id assigned ──► subscribed ──► registered ──► handler.run()
//!                                                               │
//!                     deregistered + unsubscribed ◄── close notification
//! ```
//!
//! The close notification is a [`CloseGuard`] the session's task creates as
//! soon as the session is registered.
//! Whether `run` returns, panics, or the task is aborted during shutdown, the
//! guard is dropped exactly once and reports the session id back to the
//! supervisor.

use std::sync::Arc;

use async_trait::async_trait;
use sysadm_core::{Authorizer, SessionId};
use tokio::sync::{mpsc, watch};
use tracing::trace;

use crate::application::fanout::Subscription;

/// Protocol logic for one connection of type `C`.
#[async_trait]
pub trait SessionHandler<C>: Send + Sync + 'static {
    /// Drives `session` until its transport closes.
    ///
    /// Returning ends the session.  Handlers should also return promptly once
    /// [`ClosingSignal::wait`] resolves, after closing their transport.
    async fn run(&self, session: Session<C>);
}

/// Everything a handler needs for one connection.
pub struct Session<C> {
    id: SessionId,
    connection: C,
    authorizer: Arc<dyn Authorizer>,
    events: Subscription,
    closing: ClosingSignal,
}

/// A [`Session`] taken apart so each piece can be moved independently.
pub struct SessionParts<C> {
    pub id: SessionId,
    pub connection: C,
    pub authorizer: Arc<dyn Authorizer>,
    pub events: Subscription,
    pub closing: ClosingSignal,
}

impl<C> Session<C> {
    pub(crate) fn new(
        id: SessionId,
        connection: C,
        authorizer: Arc<dyn Authorizer>,
        events: Subscription,
        closing: ClosingSignal,
    ) -> Self {
        Self {
            id,
            connection,
            authorizer,
            events,
            closing,
        }
    }

    /// The id this session is registered under.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The established transport.
    pub fn connection_mut(&mut self) -> &mut C {
        &mut self.connection
    }

    /// The credential-validation collaborator.
    pub fn authorizer(&self) -> &Arc<dyn Authorizer> {
        &self.authorizer
    }

    /// The session's event intake.
    pub fn events_mut(&mut self) -> &mut Subscription {
        &mut self.events
    }

    /// Resolves when the server asks this session to close.
    pub async fn closing(&mut self) {
        self.closing.wait().await;
    }

    /// Splits the session into owned parts.
    pub fn into_parts(self) -> SessionParts<C> {
        SessionParts {
            id: self.id,
            connection: self.connection,
            authorizer: self.authorizer,
            events: self.events,
            closing: self.closing,
        }
    }
}

/// Server-initiated close request shared by every session.
#[derive(Debug, Clone)]
pub struct ClosingSignal {
    rx: watch::Receiver<bool>,
}

impl ClosingSignal {
    pub(crate) fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    /// Returns `true` once the server has asked sessions to close.
    pub fn is_closing(&self) -> bool {
        *self.rx.borrow()
    }

    /// Waits until the server asks sessions to close.
    ///
    /// Also resolves if the server side of the signal is gone.
    pub async fn wait(&mut self) {
        let _ = self.rx.wait_for(|closing| *closing).await;
    }
}

/// Reports a session's closure when dropped.
pub(crate) struct CloseGuard {
    id: SessionId,
    closed_tx: mpsc::UnboundedSender<SessionId>,
}

impl CloseGuard {
    pub(crate) fn new(id: SessionId, closed_tx: mpsc::UnboundedSender<SessionId>) -> Self {
        Self { id, closed_tx }
    }
}

impl Drop for CloseGuard {
    fn drop(&mut self) {
        // The supervisor may already be gone at the very end of shutdown.
        if self.closed_tx.send(self.id).is_err() {
            trace!(session_id = %self.id, "close notification after supervisor exit");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
