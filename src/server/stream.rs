//! Stream session manager
//!
//! Stream clients get the thread-per-connection treatment: the accept
//! loop and every session's reader run on dedicated threads with
//! blocking I/O, so one stalled client can only ever stall itself.
//! Each session also owns a writer thread draining its outbound
//! channel; routed deliveries from either concurrency domain are just
//! channel pushes (see [`crate::registry`]).
//!
//! Wire format: the first newline-terminated line is the handshake
//! name, every later line is a JSON control message handed to the
//! routing engine.

use std::io::BufReader;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;

use crate::config::RelayConfig;
use crate::protocol::envelope::ControlMessage;
use crate::protocol::framing;
use crate::registry::{ClientRegistry, OutboundHandle, SessionId, SessionKind};
use crate::routing::RoutingEngine;
use crate::server::phase::SessionPhase;

/// Consecutive unparseable messages tolerated before closing a session
const MAX_PARSE_FAILURES: u32 = 3;

/// Accepts and serves stream sessions on the thread domain
pub struct StreamSessionManager {
    registry: Arc<ClientRegistry>,
    router: Arc<RoutingEngine>,
    next_session_id: Arc<AtomicU64>,
    handshake_timeout: Duration,
    tcp_nodelay: bool,
}

impl StreamSessionManager {
    /// Wire up a manager over the shared registry and router
    pub fn new(
        config: &RelayConfig,
        registry: Arc<ClientRegistry>,
        router: Arc<RoutingEngine>,
        next_session_id: Arc<AtomicU64>,
    ) -> Self {
        Self {
            registry,
            router,
            next_session_id,
            handshake_timeout: config.handshake_timeout,
            tcp_nodelay: config.tcp_nodelay,
        }
    }

    /// Spawn the accept loop on its own thread
    pub fn spawn(self, listener: TcpListener) -> std::io::Result<thread::JoinHandle<()>> {
        thread::Builder::new()
            .name("stream-accept".to_string())
            .spawn(move || self.accept_loop(listener))
    }

    fn accept_loop(self, listener: TcpListener) {
        for connection in listener.incoming() {
            match connection {
                Ok(socket) => {
                    let peer = socket.peer_addr().ok();
                    let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
                    let session = StreamSession {
                        registry: Arc::clone(&self.registry),
                        router: Arc::clone(&self.router),
                        handshake_timeout: self.handshake_timeout,
                        tcp_nodelay: self.tcp_nodelay,
                    };

                    tracing::debug!(session_id, peer = ?peer, "Stream connection accepted");

                    let spawned = thread::Builder::new()
                        .name(format!("stream-{session_id}"))
                        .spawn(move || session.run(socket, peer, session_id));
                    if let Err(e) = spawned {
                        tracing::error!(error = %e, "Failed to spawn stream session thread");
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept stream connection");
                }
            }
        }
    }
}

struct StreamSession {
    registry: Arc<ClientRegistry>,
    router: Arc<RoutingEngine>,
    handshake_timeout: Duration,
    tcp_nodelay: bool,
}

impl StreamSession {
    fn run(self, socket: TcpStream, peer: Option<SocketAddr>, session_id: SessionId) {
        let mut phase = SessionPhase::Accepted;

        if self.tcp_nodelay {
            let _ = socket.set_nodelay(true);
        }

        let reader_socket = match socket.try_clone() {
            Ok(clone) => clone,
            Err(e) => {
                tracing::error!(session_id, error = %e, "Failed to clone stream socket");
                return;
            }
        };
        let mut reader = BufReader::new(reader_socket);

        // Handshake must arrive within the grace period; the read
        // timeout is lifted once the session is named
        let _ = socket.set_read_timeout(Some(self.handshake_timeout));
        let name = match framing::read_line_message(&mut reader) {
            Ok(Some(line)) => line,
            Ok(None) | Err(_) => {
                tracing::debug!(session_id, peer = ?peer, "Stream handshake failed");
                let _ = socket.shutdown(Shutdown::Both);
                return;
            }
        };
        let _ = socket.set_read_timeout(None);
        phase.complete_handshake();

        let (tx, rx) = mpsc::channel::<Bytes>();
        let writer_handle = match spawn_writer(socket, session_id, rx) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(session_id, error = %e, "Failed to spawn stream writer");
                return;
            }
        };

        let assigned = self
            .registry
            .register(session_id, OutboundHandle::Stream(tx), &name);
        phase.activate();

        tracing::info!(
            session_id,
            client = %assigned,
            peer = ?peer,
            state = phase.label(),
            "Stream client connected"
        );

        let mut parse_failures = 0u32;
        while phase.is_active() {
            match framing::read_line_message(&mut reader) {
                Ok(Some(line)) => match ControlMessage::parse(line.as_bytes()) {
                    Ok(message) => {
                        parse_failures = 0;
                        tracing::debug!(
                            client = %assigned,
                            message_type = message.message_type().unwrap_or("?"),
                            "Stream message received"
                        );
                        self.router
                            .route(message, &assigned, session_id, SessionKind::Stream);
                    }
                    Err(e) => {
                        parse_failures += 1;
                        tracing::warn!(
                            client = %assigned,
                            error = %e,
                            failures = parse_failures,
                            "Unparseable stream message dropped"
                        );
                        if parse_failures >= MAX_PARSE_FAILURES {
                            phase.close();
                        }
                    }
                },
                Ok(None) => phase.close(),
                Err(e) => {
                    tracing::debug!(client = %assigned, error = %e, "Stream read error");
                    phase.close();
                }
            }
        }

        self.registry.unregister(session_id);
        // Dropping the registry entry drops the last sender; the writer
        // thread drains, shuts the socket down, and exits
        drop(writer_handle);

        tracing::info!(session_id, client = %assigned, "Stream client disconnected");
    }
}

fn spawn_writer(
    socket: TcpStream,
    session_id: SessionId,
    rx: mpsc::Receiver<Bytes>,
) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("stream-writer-{session_id}"))
        .spawn(move || {
            let mut socket = socket;
            while let Ok(payload) = rx.recv() {
                if let Err(e) = framing::write_line_message(&mut socket, &payload) {
                    tracing::debug!(session_id, error = %e, "Stream write failed");
                    break;
                }
            }
            let _ = socket.shutdown(Shutdown::Both);
        })
}
