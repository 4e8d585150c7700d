//! Duplex session managers
//!
//! Two listeners share one session shape but serve different planes:
//!
//! - **Control**: handshake name, then length-prefixed JSON control
//!   messages handed to the routing engine, with an immediate status
//!   acknowledgement after registration.
//! - **Video**: no control plane at all; the session joins the
//!   subscriber set, receives a welcome plus one synthetic test frame,
//!   then only ever receives frames pushed by the broadcaster.
//!
//! Both run entirely in the cooperative domain. Each session splits its
//! socket: the read half drives the session loop, the write half is
//! drained by a writer task fed from the session's outbound channel.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{channel, unbounded_channel, Receiver, UnboundedReceiver};

use crate::config::RelayConfig;
use crate::media;
use crate::protocol::envelope::{self, ControlMessage};
use crate::protocol::framing;
use crate::registry::{
    ClientRegistry, OutboundHandle, SessionId, SessionKind, VideoSubscribers,
};
use crate::routing::RoutingEngine;
use crate::server::phase::SessionPhase;

/// Consecutive unparseable messages tolerated before closing a session
const MAX_PARSE_FAILURES: u32 = 3;

/// Frames a video subscriber may have queued before new ones are shed
const SUBSCRIBER_QUEUE_LEN: usize = 8;

/// Accepts and serves duplex control sessions
pub struct DuplexControlManager {
    registry: Arc<ClientRegistry>,
    router: Arc<RoutingEngine>,
    next_session_id: Arc<AtomicU64>,
    handshake_timeout: Duration,
    tcp_nodelay: bool,
}

impl DuplexControlManager {
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

    /// Run the accept loop forever
    pub async fn run(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((socket, peer)) => {
                    let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
                    let manager = Arc::clone(&self);
                    tokio::spawn(async move {
                        manager.handle_session(socket, peer, session_id).await;
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept control connection");
                }
            }
        }
    }

    async fn handle_session(&self, socket: TcpStream, peer: SocketAddr, session_id: SessionId) {
        let mut phase = SessionPhase::Accepted;
        tracing::debug!(session_id, peer = %peer, "Control connection accepted");

        if self.tcp_nodelay {
            let _ = socket.set_nodelay(true);
        }

        let (mut reader, writer) = socket.into_split();
        let (tx, rx) = unbounded_channel::<Bytes>();
        let writer_task = tokio::spawn(write_loop(writer, session_id, rx));

        let name = match handshake(&mut reader, self.handshake_timeout).await {
            Some(name) => name,
            None => {
                tracing::debug!(session_id, peer = %peer, "Control handshake failed");
                drop(tx);
                let _ = writer_task.await;
                return;
            }
        };
        phase.complete_handshake();

        let assigned =
            self.registry
                .register(session_id, OutboundHandle::Duplex(tx.clone()), &name);
        phase.activate();

        // Handshake acknowledgement
        let _ = tx.send(envelope::status_message(&format!(
            "{assigned} connected successfully"
        )));

        tracing::info!(
            session_id,
            client = %assigned,
            peer = %peer,
            state = phase.label(),
            "Control client connected"
        );

        let mut parse_failures = 0u32;
        while phase.is_active() {
            match framing::read_frame(&mut reader).await {
                Ok(Some(payload)) => match ControlMessage::parse(&payload) {
                    Ok(message) => {
                        parse_failures = 0;
                        tracing::debug!(
                            client = %assigned,
                            message_type = message.message_type().unwrap_or("?"),
                            "Control message received"
                        );
                        self.router.route(
                            message,
                            &assigned,
                            session_id,
                            SessionKind::DuplexControl,
                        );
                    }
                    Err(e) => {
                        parse_failures += 1;
                        tracing::warn!(
                            client = %assigned,
                            error = %e,
                            failures = parse_failures,
                            "Unparseable control message dropped"
                        );
                        if parse_failures >= MAX_PARSE_FAILURES {
                            phase.close();
                        }
                    }
                },
                Ok(None) => phase.close(),
                Err(e) => {
                    tracing::debug!(client = %assigned, error = %e, "Control read error");
                    phase.close();
                }
            }
        }

        self.registry.unregister(session_id);
        drop(tx);
        let _ = writer_task.await;

        tracing::info!(session_id, client = %assigned, "Control client disconnected");
    }
}

/// Accepts and serves duplex video subscribers
pub struct DuplexVideoManager {
    subscribers: Arc<VideoSubscribers>,
    next_session_id: Arc<AtomicU64>,
    tcp_nodelay: bool,
    /// Synthesized once; sent to each new subscriber to prove the
    /// transport before real frames arrive
    test_frame: Option<Bytes>,
}

impl DuplexVideoManager {
    /// Wire up a manager over the shared subscriber set
    pub fn new(
        config: &RelayConfig,
        subscribers: Arc<VideoSubscribers>,
        next_session_id: Arc<AtomicU64>,
    ) -> Self {
        Self {
            subscribers,
            next_session_id,
            tcp_nodelay: config.tcp_nodelay,
            test_frame: media::test_frame(config.jpeg_quality),
        }
    }

    /// Run the accept loop forever
    pub async fn run(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((socket, peer)) => {
                    let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
                    let manager = Arc::clone(&self);
                    tokio::spawn(async move {
                        manager.handle_session(socket, peer, session_id).await;
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept video connection");
                }
            }
        }
    }

    async fn handle_session(&self, socket: TcpStream, peer: SocketAddr, session_id: SessionId) {
        tracing::info!(session_id, peer = %peer, "Video subscriber connected");

        if self.tcp_nodelay {
            let _ = socket.set_nodelay(true);
        }

        let (mut reader, writer) = socket.into_split();
        let (tx, rx) = channel::<Bytes>(SUBSCRIBER_QUEUE_LEN);
        let writer_task = tokio::spawn(video_write_loop(writer, session_id, rx));

        self.subscribers
            .register(session_id, OutboundHandle::Video(tx.clone()));

        let _ = tx.try_send(envelope::video_welcome());
        if let Some(ref jpeg) = self.test_frame {
            let _ = tx.try_send(envelope::video_frame_message(jpeg, 0, true));
        }

        // Subscribers never speak; drain until the peer closes
        let mut scratch = [0u8; 1024];
        loop {
            match reader.read(&mut scratch).await {
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) => {
                    tracing::debug!(session_id, error = %e, "Video read error");
                    break;
                }
            }
        }

        self.subscribers.unregister(session_id);
        drop(tx);
        let _ = writer_task.await;

        tracing::info!(session_id, peer = %peer, "Video subscriber disconnected");
    }
}

/// First inbound message is the client's plain name
async fn handshake(
    reader: &mut (impl tokio::io::AsyncRead + Unpin),
    grace: Duration,
) -> Option<String> {
    let payload = match tokio::time::timeout(grace, framing::read_frame(reader)).await {
        Ok(Ok(Some(payload))) => payload,
        _ => return None,
    };

    let name = String::from_utf8(payload.to_vec()).ok()?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some(name.to_string())
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    session_id: SessionId,
    mut rx: UnboundedReceiver<Bytes>,
) {
    while let Some(payload) = rx.recv().await {
        if let Err(e) = framing::write_frame(&mut writer, &payload).await {
            tracing::debug!(session_id, error = %e, "Duplex write failed");
            break;
        }
    }
    let _ = writer.shutdown().await;
}

async fn video_write_loop(
    mut writer: OwnedWriteHalf,
    session_id: SessionId,
    mut rx: Receiver<Bytes>,
) {
    while let Some(payload) = rx.recv().await {
        if let Err(e) = framing::write_frame(&mut writer, &payload).await {
            tracing::debug!(session_id, error = %e, "Video write failed");
            break;
        }
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    use crate::routing::RoutingTable;
    use crate::stats::RelayCounters;

    struct ControlHarness {
        manager: Arc<DuplexControlManager>,
        registry: Arc<ClientRegistry>,
        table: Arc<RoutingTable>,
    }

    fn control_harness() -> ControlHarness {
        let registry = Arc::new(ClientRegistry::new("control"));
        let stream = Arc::new(ClientRegistry::new("stream"));
        let table = Arc::new(RoutingTable::new());
        let router = Arc::new(RoutingEngine::new(
            Arc::clone(&table),
            stream,
            Arc::clone(&registry),
            Arc::new(RelayCounters::new()),
        ));
        let config = RelayConfig::default().handshake_timeout(Duration::from_millis(500));
        let manager = Arc::new(DuplexControlManager::new(
            &config,
            Arc::clone(&registry),
            router,
            Arc::new(AtomicU64::new(1)),
        ));
        ControlHarness {
            manager,
            registry,
            table,
        }
    }

    async fn connect_named(addr: SocketAddr, name: &str) -> TcpStream {
        let mut client = TcpStream::connect(addr).await.unwrap();
        framing::write_frame(&mut client, name.as_bytes())
            .await
            .unwrap();
        client
    }

    async fn read_json(client: &mut TcpStream) -> Value {
        let payload = framing::read_frame(client).await.unwrap().unwrap();
        serde_json::from_slice(&payload).unwrap()
    }

    #[tokio::test]
    async fn test_control_handshake_acks_and_registers() {
        let h = control_harness();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(Arc::clone(&h.manager).run(listener));

        let mut client = connect_named(addr, "Web").await;

        let ack = read_json(&mut client).await;
        assert_eq!(ack["type"], "status");
        assert_eq!(ack["msg"], "Web connected successfully");

        assert!(h.registry.lookup_by_name("Web").is_some());
    }

    #[tokio::test]
    async fn test_control_routes_between_clients() {
        let h = control_harness();
        h.table.add_route("RobotArm", ["Web"]);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(Arc::clone(&h.manager).run(listener));

        let mut web = connect_named(addr, "Web").await;
        let _ack = read_json(&mut web).await;

        let mut robot = connect_named(addr, "RobotArm").await;
        let _ack = read_json(&mut robot).await;

        framing::write_frame(&mut robot, br#"{"type":"command","value":true}"#)
            .await
            .unwrap();

        let routed = read_json(&mut web).await;
        assert_eq!(routed["type"], "command");
        assert_eq!(routed["value"], true);
        assert_eq!(routed["sender"], "RobotArm");
    }

    #[tokio::test]
    async fn test_control_duplicate_names_suffixed() {
        let h = control_harness();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(Arc::clone(&h.manager).run(listener));

        let mut first = connect_named(addr, "Web").await;
        let ack = read_json(&mut first).await;
        assert_eq!(ack["msg"], "Web connected successfully");

        let mut second = connect_named(addr, "Web").await;
        let ack = read_json(&mut second).await;
        assert_eq!(ack["msg"], "Web_1 connected successfully");

        assert!(h.registry.lookup_by_name("Web").is_some());
        assert!(h.registry.lookup_by_name("Web_1").is_some());
    }

    #[tokio::test]
    async fn test_control_disconnect_unregisters() {
        let h = control_harness();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(Arc::clone(&h.manager).run(listener));

        let mut client = connect_named(addr, "Web").await;
        let _ack = read_json(&mut client).await;
        drop(client);

        for _ in 0..100 {
            if h.registry.is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("client was not unregistered after disconnect");
    }

    #[tokio::test]
    async fn test_video_welcome_and_test_frame() {
        let subscribers = Arc::new(VideoSubscribers::new());
        let config = RelayConfig::default();
        let manager = Arc::new(DuplexVideoManager::new(
            &config,
            Arc::clone(&subscribers),
            Arc::new(AtomicU64::new(1)),
        ));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(Arc::clone(&manager).run(listener));

        let mut client = TcpStream::connect(addr).await.unwrap();

        let welcome = read_json(&mut client).await;
        assert_eq!(welcome["status"], "connected");

        let test = read_json(&mut client).await;
        assert_eq!(test["type"], "video_frame");
        assert_eq!(test["test"], true);
        assert_eq!(test["frame_num"], 0);

        for _ in 0..100 {
            if subscribers.len() == 1 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("subscriber was not registered");
    }
}
