//! Accept loop: turns inbound TCP connections into established
//! [`Connection`]s for the supervisor.
//!
//! # Shape
//!
//! ```text
//! Listener::accept ──ok──► handshake task ──ok──► established channel
//!        │                        │
//!        └──err──► warn, retry    └──err──► warn, drop socket
//! ```
//!
//! The loop itself never awaits a handshake, so a slow or hostile peer cannot
//! stall accepts for anyone else.  Accept errors (resource exhaustion, a peer
//! resetting before accept) are logged and the loop yields once before
//! trying again; they never end the loop.
//!
//! Handshake tasks belong to the loop.  When it stops, unfinished handshakes
//! are aborted, so no socket accepted during a run outlives it.
//!
//! The [`Listener`] trait exists so the loop can be driven by a scripted
//! listener in tests.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sysadm_core::TransportMode;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, warn};

use crate::application::lifecycle::stop_requested;
use crate::infrastructure::handshake::{
    establish_raw_tls, establish_websocket, Connection, HandshakeError, OriginPolicy,
};

/// How long a peer gets to finish TLS (and the upgrade) after accept.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// A source of inbound connections.
#[async_trait]
pub trait Listener: Send + 'static {
    type Stream: Send + 'static;

    /// Waits for the next inbound connection.
    async fn accept(&mut self) -> io::Result<(Self::Stream, SocketAddr)>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl Listener for TcpListener {
    type Stream = TcpStream;

    async fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpListener::local_addr(self)
    }
}

fn accept_error_message(mode: TransportMode) -> &'static str {
    match mode {
        TransportMode::WebSocketSecure => "WebSocket listener accept error; retrying",
        TransportMode::RawTls => "TLS listener accept error; retrying",
    }
}

/// Accepts until `stop` is raised (or its sender dropped).
///
/// `on_accept` turns every accepted stream into that connection's handshake,
/// which runs as its own task.  The loop owns those tasks: on return any
/// handshake still in progress is aborted and its socket closed, together
/// with the listening socket.
pub async fn run_accept_loop<L, F, Fut>(
    mut listener: L,
    mode: TransportMode,
    mut on_accept: F,
    mut stop: watch::Receiver<bool>,
) where
    L: Listener,
    F: FnMut(L::Stream, SocketAddr) -> Fut + Send,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut handshakes = JoinSet::new();
    loop {
        tokio::select! {
            biased;
            () = stop_requested(&mut stop) => break,
            // Reap finished handshakes so the set stays small.
            Some(_) = handshakes.join_next(), if !handshakes.is_empty() => {}
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, %mode, "connection accepted");
                    handshakes.spawn(on_accept(stream, peer));
                }
                Err(e) => {
                    warn!(%mode, error = %e, "{}", accept_error_message(mode));
                    tokio::task::yield_now().await;
                }
            },
        }
    }
    drop(listener);
    if !handshakes.is_empty() {
        debug!(%mode, pending = handshakes.len(), "aborting unfinished handshakes");
    }
    handshakes.shutdown().await;
    debug!(%mode, "accept loop stopped; listening socket closed");
}

/// One handshake with a deadline, forwarding the result to the supervisor.
async fn complete_handshake<Fut>(
    handshake: Fut,
    peer: SocketAddr,
    mode: TransportMode,
    established: mpsc::Sender<Connection>,
) where
    Fut: Future<Output = Result<Connection, HandshakeError>>,
{
    let result = match tokio::time::timeout(HANDSHAKE_TIMEOUT, handshake).await {
        Ok(result) => result,
        Err(_) => Err(HandshakeError::TimedOut(HANDSHAKE_TIMEOUT)),
    };
    match result {
        Ok(connection) => {
            if established.send(connection).await.is_err() {
                debug!(%peer, "server stopping; dropping established connection");
            }
        }
        Err(e) => warn!(%peer, %mode, error = %e, "handshake failed; connection dropped"),
    }
}

/// The bound listening socket for whichever transport is active.
pub enum ActiveListener {
    WebSocketSecure {
        listener: TcpListener,
        tls: TlsAcceptor,
        origin_policy: Arc<dyn OriginPolicy>,
    },
    RawTls {
        listener: TcpListener,
        tls: TlsAcceptor,
    },
}

impl ActiveListener {
    pub fn mode(&self) -> TransportMode {
        match self {
            Self::WebSocketSecure { .. } => TransportMode::WebSocketSecure,
            Self::RawTls { .. } => TransportMode::RawTls,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match self {
            Self::WebSocketSecure { listener, .. } | Self::RawTls { listener, .. } => {
                listener.local_addr()
            }
        }
    }

    /// Accepts until `stop`, sending established connections to
    /// `established`.
    pub async fn run(self, established: mpsc::Sender<Connection>, stop: watch::Receiver<bool>) {
        let mode = self.mode();
        match self {
            Self::WebSocketSecure {
                listener,
                tls,
                origin_policy,
            } => {
                let on_accept = move |tcp: TcpStream, peer: SocketAddr| {
                    let tls = tls.clone();
                    let policy = Arc::clone(&origin_policy);
                    let handshake = async move {
                        establish_websocket(&tls, tcp, peer, &*policy).await
                    };
                    complete_handshake(handshake, peer, mode, established.clone())
                };
                run_accept_loop(listener, mode, on_accept, stop).await;
            }
            Self::RawTls { listener, tls } => {
                let on_accept = move |tcp: TcpStream, peer: SocketAddr| {
                    let tls = tls.clone();
                    let handshake = async move { establish_raw_tls(&tls, tcp, peer).await };
                    complete_handshake(handshake, peer, mode, established.clone())
                };
                run_accept_loop(listener, mode, on_accept, stop).await;
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::fanout::EventBus;
    use crate::application::lifecycle::{ServerState, ShutdownPolicy, Supervisor};
    use crate::application::session::{Session, SessionHandler};
    use crate::infrastructure::tls::TlsContext;
    use std::collections::VecDeque;
    use sysadm_core::MockAuthorizer;

    /// Replays a fixed script of accept results, then waits forever.
    struct ScriptedListener {
        script: VecDeque<io::Result<(u32, SocketAddr)>>,
    }

    impl ScriptedListener {
        fn new(script: Vec<io::Result<(u32, SocketAddr)>>) -> Self {
            Self {
                script: script.into(),
            }
        }
    }

    #[async_trait]
    impl Listener for ScriptedListener {
        type Stream = u32;

        async fn accept(&mut self) -> io::Result<(u32, SocketAddr)> {
            match self.script.pop_front() {
                Some(next) => next,
                None => std::future::pending().await,
            }
        }

        fn local_addr(&self) -> io::Result<SocketAddr> {
            Ok(peer())
        }
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    fn accept_error() -> io::Error {
        io::Error::new(io::ErrorKind::ConnectionAborted, "peer reset before accept")
    }

    #[tokio::test]
    async fn test_accept_error_does_not_stall_next_connection() {
        // Arrange: an error, then a valid pending connection
        let listener = ScriptedListener::new(vec![Err(accept_error()), Ok((7, peer()))]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);

        // Act
        let task = tokio::spawn(run_accept_loop(
            listener,
            TransportMode::WebSocketSecure,
            move |stream, _| {
                tx.send(stream).unwrap();
                async {}
            },
            stop_rx,
        ));

        // Assert
        assert_eq!(rx.recv().await, Some(7));
        stop_tx.send_replace(true);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_repeated_accept_errors_never_end_the_loop() {
        // Arrange
        let mut script: Vec<_> = (0..50).map(|_| Err(accept_error())).collect();
        script.push(Ok((1, peer())));
        script.push(Err(accept_error()));
        script.push(Ok((2, peer())));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);

        // Act
        let task = tokio::spawn(run_accept_loop(
            ScriptedListener::new(script),
            TransportMode::RawTls,
            move |stream, _| {
                tx.send(stream).unwrap();
                async {}
            },
            stop_rx,
        ));

        // Assert
        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
        assert!(!task.is_finished());
        stop_tx.send_replace(true);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_ends_loop_while_waiting_for_accept() {
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run_accept_loop(
            ScriptedListener::new(Vec::new()),
            TransportMode::WebSocketSecure,
            |_, _| async { panic!("nothing to accept") },
            stop_rx,
        ));

        stop_tx.send_replace(true);

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("accept loop did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_dropped_stop_sender_ends_loop() {
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run_accept_loop(
            ScriptedListener::new(Vec::new()),
            TransportMode::RawTls,
            |_, _| async {},
            stop_rx,
        ));

        drop(stop_tx);

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_stop_aborts_handshakes_still_in_progress() {
        // Arrange: every handshake holds a sender and never finishes
        let listener = ScriptedListener::new(vec![Ok((1, peer())), Ok((2, peer()))]);
        let (held_tx, mut held_rx) = mpsc::unbounded_channel::<u32>();
        let (started_tx, mut started_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run_accept_loop(
            listener,
            TransportMode::RawTls,
            move |stream, _| {
                let held = held_tx.clone();
                let started = started_tx.clone();
                async move {
                    let _held = held;
                    started.send(stream).unwrap();
                    std::future::pending::<()>().await;
                }
            },
            stop_rx,
        ));
        started_rx.recv().await.unwrap();
        started_rx.recv().await.unwrap();

        // Act
        stop_tx.send_replace(true);
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();

        // Assert: every clone of the sender is gone with its handshake
        let closed = tokio::time::timeout(Duration::from_secs(5), held_rx.recv()).await;
        assert_eq!(closed.ok(), Some(None));
    }

    /// Session handler that holds its session until shutdown.
    struct ParkedSession;

    #[async_trait]
    impl SessionHandler<u32> for ParkedSession {
        async fn run(&self, mut session: Session<u32>) {
            session.closing().await;
        }
    }

    #[tokio::test]
    async fn test_connection_after_accept_error_is_registered() {
        // Arrange
        let listener = ScriptedListener::new(vec![Err(accept_error()), Ok((7, peer()))]);
        let supervisor: Supervisor<u32> = Supervisor::new(
            Arc::new(ParkedSession),
            Arc::new(MockAuthorizer::new()),
            EventBus::new(),
            ShutdownPolicy::Immediate,
        );
        let mut live = supervisor.live_sessions();
        let (established_tx, established_rx) = mpsc::channel(4);
        let (stop_tx, stop_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(ServerState::Listening);
        let supervisor_task = tokio::spawn(supervisor.run(
            established_rx,
            stop_rx.clone(),
            Arc::new(state_tx),
        ));

        // Act
        let accept_task = tokio::spawn(run_accept_loop(
            listener,
            TransportMode::WebSocketSecure,
            move |stream, _| {
                let established = established_tx.clone();
                async move {
                    let _ = established.send(stream).await;
                }
            },
            stop_rx,
        ));

        // Assert
        tokio::time::timeout(Duration::from_secs(5), live.wait_for(|n| *n == 1))
            .await
            .expect("session was never registered")
            .unwrap();
        stop_tx.send_replace(true);
        accept_task.await.unwrap();
        supervisor_task.await.unwrap();
        assert_eq!(*live.borrow(), 0);
        assert_eq!(*state_rx.borrow(), ServerState::Stopped);
    }

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test]
    async fn test_active_listener_future_can_be_spawned() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let active = ActiveListener::RawTls {
            listener,
            tls: TlsContext::degraded().unwrap().acceptor(),
        };
        let (established_tx, _established_rx) = mpsc::channel(1);
        let (_stop_tx, stop_rx) = watch::channel(false);

        let run = active.run(established_tx, stop_rx);

        assert_send(&run);
    }

    #[test]
    fn test_accept_error_messages_name_the_transport() {
        assert!(accept_error_message(TransportMode::WebSocketSecure).contains("WebSocket"));
        assert!(accept_error_message(TransportMode::RawTls).contains("TLS"));
    }
}
