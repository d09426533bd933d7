//! Server lifecycle: the state machine and the session supervisor.
//!
//! # State machine
//!
//! ```text
//! Stopped ──start──► Starting ──bind ok──► Listening ──stop──► Closing ──► Stopped
//!                       │
//!                       └── TLS unavailable / bind failed ──► Stopped
//! ```
//!
//! # The supervisor (for beginners)
//!
//! [`Supervisor`] is the single task that owns the [`ConnectionRegistry`].
//! Everything that touches the registry happens inside its `select!` loop:
//!
//! - an established connection arrives → allocate an id, subscribe it to the
//!   [`EventBus`], register it, start its handler;
//! - a close notification arrives → deregister and unsubscribe;
//! - a stop request arrives → shut every session down.
//!
//! Because one task does all of this, the registry needs no lock and id
//! allocation can never race with another registration.  Each pass of the
//! loop re-checks the queue of established connections, so a close
//! notification is always followed by draining anything that arrived
//! meanwhile.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use sysadm_core::{Authorizer, ConnectionRegistry, Identified, SessionId, TransportMode};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use crate::application::fanout::EventBus;
use crate::application::session::{ClosingSignal, CloseGuard, Session, SessionHandler};

/// Where a server instance is in its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerState {
    #[default]
    Stopped,
    Starting,
    Listening,
    Closing,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Listening => "listening",
            Self::Closing => "closing",
        })
    }
}

/// How live sessions are ended when the server stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPolicy {
    /// Ask every session to close and wait for each close notification.
    /// Sessions still open after `grace` are aborted.
    Graceful { grace: Duration },
    /// Abort every session and clear the registry at once.
    Immediate,
}

impl ShutdownPolicy {
    /// The policy each transport uses.
    ///
    /// The WebSocket listener closes asynchronously and reports completion
    /// through its sessions' close notifications; the raw TLS listener has no
    /// such notification and tears down synchronously.
    pub fn for_mode(mode: TransportMode, grace: Duration) -> Self {
        match mode {
            TransportMode::WebSocketSecure => Self::Graceful { grace },
            TransportMode::RawTls => Self::Immediate,
        }
    }
}

/// Registry entry for one running session.
#[derive(Debug)]
pub struct LiveSession {
    id: SessionId,
    task: AbortHandle,
}

impl Identified for LiveSession {
    fn id(&self) -> SessionId {
        self.id
    }
}

/// Resolves once `stop` is raised or its sender is gone.
///
/// The watch guard is released before this returns, so callers may await
/// freely afterwards.
pub(crate) async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}

/// Owns the registry and every session's lifetime.
pub struct Supervisor<C> {
    registry: ConnectionRegistry<LiveSession>,
    handler: Arc<dyn SessionHandler<C>>,
    authorizer: Arc<dyn Authorizer>,
    events: EventBus,
    policy: ShutdownPolicy,
    closing_tx: watch::Sender<bool>,
    closed_tx: mpsc::UnboundedSender<SessionId>,
    closed_rx: mpsc::UnboundedReceiver<SessionId>,
    live_tx: watch::Sender<usize>,
}

impl<C: Send + 'static> Supervisor<C> {
    pub fn new(
        handler: Arc<dyn SessionHandler<C>>,
        authorizer: Arc<dyn Authorizer>,
        events: EventBus,
        policy: ShutdownPolicy,
    ) -> Self {
        let (closing_tx, _) = watch::channel(false);
        let (closed_tx, closed_rx) = mpsc::unbounded_channel();
        let (live_tx, _) = watch::channel(0);
        Self {
            registry: ConnectionRegistry::new(),
            handler,
            authorizer,
            events,
            policy,
            closing_tx,
            closed_tx,
            closed_rx,
            live_tx,
        }
    }

    /// Watches the number of registered sessions.
    pub fn live_sessions(&self) -> watch::Receiver<usize> {
        self.live_tx.subscribe()
    }

    #[cfg(test)]
    pub(crate) fn close_notifier(&self) -> mpsc::UnboundedSender<SessionId> {
        self.closed_tx.clone()
    }

    /// Runs until `stop` is raised (or dropped), then shuts every session
    /// down according to the policy and sets `state` to `Stopped`.
    pub async fn run(
        mut self,
        mut established: mpsc::Receiver<C>,
        mut stop: watch::Receiver<bool>,
        state: Arc<watch::Sender<ServerState>>,
    ) {
        let mut accepting = true;
        loop {
            tokio::select! {
                // Close notifications first: a freed slot is deregistered
                // before the next connection is given an id.
                biased;
                Some(id) = self.closed_rx.recv() => self.on_closed(id),
                () = stop_requested(&mut stop) => break,
                conn = established.recv(), if accepting => match conn {
                    Some(conn) => self.on_established(conn),
                    None => {
                        // Open sessions are still served until stop.
                        debug!("connection source closed");
                        accepting = false;
                    }
                },
            }
        }

        // Connections that finished their handshake but were never
        // registered are dropped with the channel.
        drop(established);
        state.send_replace(ServerState::Closing);
        self.shutdown().await;
        state.send_replace(ServerState::Stopped);
        info!("server stopped");
    }

    fn on_established(&mut self, connection: C) {
        let id = self.registry.next_id();
        if self.registry.contains(id) {
            // `next_id` never returns a live id; refuse rather than disturb
            // the session that holds it.
            error!(session_id = %id, "allocated id is already live; dropping connection");
            return;
        }
        let subscription = self.events.subscribe(id);
        let session = Session::new(
            id,
            connection,
            Arc::clone(&self.authorizer),
            subscription,
            ClosingSignal::new(self.closing_tx.subscribe()),
        );

        // The handler is held back until the session is in the registry, so
        // registration happens-before its first event delivery.
        let (registered_tx, registered_rx) = oneshot::channel::<()>();
        let closed_tx = self.closed_tx.clone();
        let handler = Arc::clone(&self.handler);
        let task = tokio::spawn(async move {
            if registered_rx.await.is_ok() {
                let _guard = CloseGuard::new(id, closed_tx);
                handler.run(session).await;
            }
        });

        match self.registry.register(LiveSession {
            id,
            task: task.abort_handle(),
        }) {
            Ok(()) => {
                let _ = registered_tx.send(());
                info!(session_id = %id, open = self.registry.len(), "new session");
                self.publish_live_count();
            }
            Err(e) => {
                error!(session_id = %id, error = %e, "failed to register session");
                task.abort();
                self.events.unsubscribe(id);
            }
        }
    }

    fn on_closed(&mut self, id: SessionId) {
        if let Some(session) = self.registry.deregister(id) {
            self.events.unsubscribe(id);
            info!(session_id = %session.id, open = self.registry.len(), "session closed");
            self.publish_live_count();
        } else {
            // Duplicate or late notification; nothing to do.
            debug!(session_id = %id, "close notification for unregistered session");
        }
    }

    async fn shutdown(&mut self) {
        match self.policy {
            ShutdownPolicy::Immediate => {
                info!(open = self.registry.len(), "closing all sessions immediately");
                self.abort_all();
            }
            ShutdownPolicy::Graceful { grace } => {
                info!(
                    open = self.registry.len(),
                    grace_secs = grace.as_secs(),
                    "asking sessions to close"
                );
                self.closing_tx.send_replace(true);

                let deadline = tokio::time::sleep(grace);
                tokio::pin!(deadline);
                while !self.registry.is_empty() {
                    tokio::select! {
                        Some(id) = self.closed_rx.recv() => self.on_closed(id),
                        () = &mut deadline => {
                            warn!(
                                open = self.registry.len(),
                                "sessions still open after grace period; aborting"
                            );
                            self.abort_all();
                        }
                    }
                }
            }
        }
    }

    /// Aborts every session task, then deregisters and unsubscribes them.
    fn abort_all(&mut self) {
        for session in self.registry.drain() {
            session.task.abort();
            self.events.unsubscribe(session.id);
        }
        self.publish_live_count();
        // Guards of the aborted tasks still report in; those notifications
        // find nothing to deregister.
    }

    fn publish_live_count(&self) {
        self.live_tx.send_replace(self.registry.len());
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
