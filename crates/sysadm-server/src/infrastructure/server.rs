//! Server facade: start and stop one transport.
//!
//! # Starting
//!
//! [`Server::start`] walks `Stopped → Starting → Listening`:
//!
//! 1. Probe the TLS stack.  No TLS 1.2 at all is fatal
//!    ([`ServerError::TlsUnavailable`]).
//! 2. Load the certificate and key.  Missing or broken files degrade TLS
//!    with a warning; startup continues.
//! 3. Bind the port.  Failure is fatal ([`ServerError::BindFailed`]).
//! 4. Spawn the supervisor and the accept loop.
//!
//! Any fatal error puts the server back in `Stopped`.  Once the server is
//! `Listening`, the event source given to [`Server::with_event_source`] (if
//! any) starts feeding the [`EventBus`].  A failed start never starts it.
//!
//! # Stopping
//!
//! [`Server::stop`] moves to `Closing`, closes the listening socket and waits
//! for the supervisor to reach `Stopped`.  How long that takes depends on the
//! transport's [`ShutdownPolicy`]: a WebSocket server waits for every session
//! to report its close; a raw TLS server aborts its sessions at once.

use std::net::SocketAddr;
use std::sync::Arc;

use sysadm_core::{Authorizer, Event, TransportMode};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::application::fanout::EventBus;
use crate::application::lifecycle::{ServerState, ShutdownPolicy, Supervisor};
use crate::application::session::SessionHandler;
use crate::domain::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::infrastructure::handshake::{
    AllowAnyOrigin, AllowListOrigins, Connection, OriginPolicy,
};
use crate::infrastructure::listener::ActiveListener;
use crate::infrastructure::tls::TlsContext;

/// Established connections waiting for the supervisor.
const ESTABLISHED_BACKLOG: usize = 64;

/// Handles of one run, present from `Listening` until `stop` returns.
struct Running {
    mode: TransportMode,
    local_addr: SocketAddr,
    tls_degraded: bool,
    stop_tx: watch::Sender<bool>,
    live: watch::Receiver<usize>,
    accept_task: JoinHandle<()>,
    supervisor_task: JoinHandle<()>,
}

/// The process's server.
pub struct Server {
    config: Arc<ServerConfig>,
    handler: Arc<dyn SessionHandler<Connection>>,
    authorizer: Arc<dyn Authorizer>,
    origin_policy: Arc<dyn OriginPolicy>,
    events: EventBus,
    state: Arc<watch::Sender<ServerState>>,
    running: Option<Running>,
    event_source: Option<mpsc::Receiver<Event>>,
    forwarder: Option<JoinHandle<()>>,
}

impl Server {
    /// Creates a stopped server.
    ///
    /// The origin policy follows `config.allowed_origins`: empty allows any
    /// origin.
    pub fn new(
        config: Arc<ServerConfig>,
        handler: Arc<dyn SessionHandler<Connection>>,
        authorizer: Arc<dyn Authorizer>,
    ) -> Self {
        let origin_policy: Arc<dyn OriginPolicy> = if config.allowed_origins.is_empty() {
            Arc::new(AllowAnyOrigin)
        } else {
            Arc::new(AllowListOrigins::new(&config.allowed_origins))
        };
        let (state, _) = watch::channel(ServerState::Stopped);
        Self {
            config,
            handler,
            authorizer,
            origin_policy,
            events: EventBus::new(),
            state: Arc::new(state),
            running: None,
            event_source: None,
            forwarder: None,
        }
    }

    /// Publishes everything received on `source` once the server is
    /// listening.  The forwarding outlives individual runs and ends when
    /// `source` closes.
    pub fn with_event_source(mut self, source: mpsc::Receiver<Event>) -> Self {
        self.event_source = Some(source);
        self
    }

    /// Replaces the origin policy used for WebSocket upgrades.
    pub fn with_origin_policy(mut self, policy: Arc<dyn OriginPolicy>) -> Self {
        self.origin_policy = policy;
        self
    }

    /// The bus events are published on.  Clone it for the event source.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Watches state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    /// Number of registered sessions.
    pub fn session_count(&self) -> usize {
        self.running.as_ref().map_or(0, |r| *r.live.borrow())
    }

    /// Watches the number of registered sessions, if running.
    pub fn subscribe_sessions(&self) -> Option<watch::Receiver<usize>> {
        self.running.as_ref().map(|r| r.live.clone())
    }

    /// The bound address, if running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.local_addr)
    }

    /// The active transport, if running.
    pub fn mode(&self) -> Option<TransportMode> {
        self.running.as_ref().map(|r| r.mode)
    }

    /// `true` if the current run has no certificate.
    pub fn tls_degraded(&self) -> bool {
        self.running.as_ref().is_some_and(|r| r.tls_degraded)
    }

    /// Starts listening on `port` with `mode`.  Port 0 picks a free port.
    ///
    /// # Errors
    ///
    /// - [`ServerError::AlreadyRunning`] unless the server is `Stopped`.
    /// - [`ServerError::TlsUnavailable`] if TLS cannot work on this host.
    /// - [`ServerError::BindFailed`] if the port cannot be bound.
    pub async fn start(&mut self, port: u16, mode: TransportMode) -> ServerResult<SocketAddr> {
        let current = self.state();
        if current != ServerState::Stopped {
            return Err(ServerError::AlreadyRunning(current));
        }
        // Leftovers of a run that stopped on its own.
        self.running = None;

        self.state.send_replace(ServerState::Starting);
        match self.launch(port, mode).await {
            Ok(running) => {
                let addr = running.local_addr;
                self.running = Some(running);
                self.state.send_replace(ServerState::Listening);
                if let Some(source) = self.event_source.take() {
                    debug!("event source attached");
                    self.forwarder = Some(self.events.forward_from(source));
                }
                Ok(addr)
            }
            Err(e) => {
                self.state.send_replace(ServerState::Stopped);
                Err(e)
            }
        }
    }

    async fn launch(&self, port: u16, mode: TransportMode) -> ServerResult<Running> {
        TlsContext::probe().map_err(ServerError::TlsUnavailable)?;
        info!("using TLS library rustls (ring provider, TLS 1.2)");

        let tls = TlsContext::load_or_degrade(&self.config.cert_path, &self.config.key_path)
            .map_err(ServerError::TlsUnavailable)?;

        let bind_addr = format!("{}:{}", self.config.bind_address, port);
        let listener = TcpListener::bind(bind_addr.as_str())
            .await
            .map_err(|source| ServerError::BindFailed {
                addr: bind_addr.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::BindFailed {
                addr: bind_addr.clone(),
                source,
            })?;

        let active = match mode {
            TransportMode::WebSocketSecure => ActiveListener::WebSocketSecure {
                listener,
                tls: tls.acceptor(),
                origin_policy: Arc::clone(&self.origin_policy),
            },
            TransportMode::RawTls => ActiveListener::RawTls {
                listener,
                tls: tls.acceptor(),
            },
        };

        let (established_tx, established_rx) = mpsc::channel(ESTABLISHED_BACKLOG);
        let (stop_tx, stop_rx) = watch::channel(false);

        let supervisor = Supervisor::new(
            Arc::clone(&self.handler),
            Arc::clone(&self.authorizer),
            self.events.clone(),
            ShutdownPolicy::for_mode(mode, self.config.shutdown_grace()),
        );
        let live = supervisor.live_sessions();
        let supervisor_task = tokio::spawn(supervisor.run(
            established_rx,
            stop_rx.clone(),
            Arc::clone(&self.state),
        ));
        let accept_task = tokio::spawn(active.run(established_tx, stop_rx));

        info!(
            %mode,
            addr = %local_addr,
            tls_degraded = tls.is_degraded(),
            "server listening"
        );

        Ok(Running {
            mode,
            local_addr,
            tls_degraded: tls.is_degraded(),
            stop_tx,
            live,
            accept_task,
            supervisor_task,
        })
    }

    /// Asks the current run to stop without waiting for it.
    ///
    /// Returns `false` if there is nothing to stop.
    pub fn request_stop(&self) -> bool {
        let Some(running) = &self.running else {
            return false;
        };
        if self.state() == ServerState::Listening {
            info!(mode = %running.mode, "stop requested");
            self.state.send_replace(ServerState::Closing);
        }
        running.stop_tx.send_replace(true);
        true
    }

    /// Stops the current run and waits until the server is `Stopped`.
    ///
    /// Stopping a stopped server does nothing.
    ///
    /// # Errors
    ///
    /// [`ServerError::Internal`] if a server task panicked.
    pub async fn stop(&mut self) -> ServerResult<()> {
        if !self.request_stop() {
            return Ok(());
        }
        let Some(running) = self.running.take() else {
            return Ok(());
        };

        let accept = running.accept_task.await;
        let supervisor = running.supervisor_task.await;
        // A panicked supervisor never reported `Stopped` itself.
        self.state.send_replace(ServerState::Stopped);

        accept.map_err(|e| ServerError::Internal(format!("accept loop failed: {e}")))?;
        supervisor.map_err(|e| ServerError::Internal(format!("supervisor failed: {e}")))?;
        Ok(())
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Some(forwarder) = &self.forwarder {
            forwarder.abort();
        }
        if let Some(running) = &self.running {
            warn!("server dropped while running; stopping in the background");
            running.stop_tx.send_replace(true);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
