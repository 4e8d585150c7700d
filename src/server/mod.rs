//! Relay server composition
//!
//! `RelayServer` owns the shared state (registries, routing table,
//! frame queue, counters) and wires the transports together:
//!
//! ```text
//!  datagram socket ─► DatagramReceiver ─► BoundedFrameQueue
//!                                              │
//!                                       FrameBroadcaster ─► video subscribers
//!
//!  stream listener ──► StreamSessionManager ─┐
//!                        (worker threads)    ├─► RoutingEngine ─► registries
//!  control listener ─► DuplexControlManager ─┘
//!                        (tokio tasks)
//! ```
//!
//! The stream side runs on its own threads; everything else shares the
//! tokio runtime. The two domains only meet at the mutex-guarded
//! registries and the per-session outbound channels.

pub mod datagram;
pub mod duplex;
pub mod phase;
pub mod stream;

use std::future::Future;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use tokio::net::{TcpListener, UdpSocket};

use crate::broadcast::{BoundedFrameQueue, FrameBroadcaster};
use crate::config::RelayConfig;
use crate::error::Result;
use crate::registry::{ClientRegistry, VideoSubscribers};
use crate::routing::{RoutingEngine, RoutingTable};
use crate::stats::{RelayCounters, TelemetryReporter};

pub use datagram::DatagramReceiver;
pub use duplex::{DuplexControlManager, DuplexVideoManager};
pub use phase::SessionPhase;
pub use stream::StreamSessionManager;

/// The multi-transport relay
pub struct RelayServer {
    config: RelayConfig,
    stream_registry: Arc<ClientRegistry>,
    control_registry: Arc<ClientRegistry>,
    video_subscribers: Arc<VideoSubscribers>,
    routing_table: Arc<RoutingTable>,
    router: Arc<RoutingEngine>,
    queue: Arc<BoundedFrameQueue>,
    counters: Arc<RelayCounters>,
    next_session_id: Arc<AtomicU64>,
}

impl RelayServer {
    /// Create a server with the reference routing policy
    pub fn new(config: RelayConfig) -> Self {
        Self::with_routing_table(config, RoutingTable::with_defaults())
    }

    /// Create a server with a custom routing table
    pub fn with_routing_table(config: RelayConfig, routing_table: RoutingTable) -> Self {
        let stream_registry = Arc::new(ClientRegistry::new("stream"));
        let control_registry = Arc::new(ClientRegistry::new("control"));
        let video_subscribers = Arc::new(VideoSubscribers::new());
        let routing_table = Arc::new(routing_table);
        let counters = Arc::new(RelayCounters::new());

        let router = Arc::new(RoutingEngine::new(
            Arc::clone(&routing_table),
            Arc::clone(&stream_registry),
            Arc::clone(&control_registry),
            Arc::clone(&counters),
        ));

        let queue = Arc::new(BoundedFrameQueue::new(config.frame_queue_capacity));

        Self {
            config,
            stream_registry,
            control_registry,
            video_subscribers,
            routing_table,
            router,
            queue,
            counters,
            next_session_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// The server configuration
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// The routing table, for runtime add/remove of routes
    pub fn routing_table(&self) -> &Arc<RoutingTable> {
        &self.routing_table
    }

    /// The relay counters
    pub fn counters(&self) -> &Arc<RelayCounters> {
        &self.counters
    }

    /// Run the relay
    ///
    /// Binds all four transports, then serves until shut down
    /// externally. Bind failures surface here; accept and session
    /// failures never do.
    pub async fn run(&self) -> Result<()> {
        // Bind everything up front so configuration errors surface
        // before any traffic is served
        let stream_listener = std::net::TcpListener::bind(self.config.stream_addr)?;
        let control_listener = TcpListener::bind(self.config.control_addr).await?;
        let video_listener = TcpListener::bind(self.config.video_addr).await?;
        let datagram_socket = UdpSocket::bind(self.config.datagram_addr).await?;

        tracing::info!(addr = %self.config.stream_addr, "Stream server listening");
        tracing::info!(addr = %self.config.control_addr, "Duplex control server listening");
        tracing::info!(addr = %self.config.video_addr, "Duplex video server listening");
        tracing::info!(addr = %self.config.datagram_addr, "Datagram receiver listening");

        // Thread domain
        let stream_manager = StreamSessionManager::new(
            &self.config,
            Arc::clone(&self.stream_registry),
            Arc::clone(&self.router),
            Arc::clone(&self.next_session_id),
        );
        let _stream_thread = stream_manager.spawn(stream_listener)?;

        // Cooperative domain
        let control_manager = Arc::new(DuplexControlManager::new(
            &self.config,
            Arc::clone(&self.control_registry),
            Arc::clone(&self.router),
            Arc::clone(&self.next_session_id),
        ));
        let video_manager = Arc::new(DuplexVideoManager::new(
            &self.config,
            Arc::clone(&self.video_subscribers),
            Arc::clone(&self.next_session_id),
        ));
        let datagram_receiver = DatagramReceiver::new(
            &self.config,
            Arc::clone(&self.queue),
            Arc::clone(&self.counters),
        );
        let broadcaster = FrameBroadcaster::new(
            Arc::clone(&self.queue),
            Arc::clone(&self.video_subscribers),
            Arc::clone(&self.counters),
            self.config.broadcast_poll_timeout,
            self.config.idle_poll_delay,
        );
        let reporter = TelemetryReporter::new(
            Arc::clone(&self.counters),
            Arc::clone(&self.queue),
            Arc::clone(&self.video_subscribers),
            Arc::clone(&self.stream_registry),
            Arc::clone(&self.control_registry),
            self.config.telemetry_interval,
        );

        tokio::select! {
            _ = control_manager.run(control_listener) => {}
            _ = video_manager.run(video_listener) => {}
            _ = datagram_receiver.run(datagram_socket) => {}
            _ = broadcaster.run() => {}
            _ = reporter.run() => {}
        }

        Ok(())
    }

    /// Run the relay until `shutdown` completes
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = self.run() => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_exposes_shared_state() {
        let server = RelayServer::new(RelayConfig::default());

        assert_eq!(server.config().frame_queue_capacity, 10);
        assert_eq!(server.counters().snapshot().frames_sent, 0);
        assert_eq!(
            server.routing_table().targets_for("RobotArm"),
            vec!["Web".to_string()]
        );
    }

    #[test]
    fn test_custom_routing_table() {
        let table = RoutingTable::new();
        table.add_route("a", ["b"]);
        let server = RelayServer::with_routing_table(RelayConfig::default(), table);

        assert_eq!(server.routing_table().targets_for("a"), vec!["b".to_string()]);
        assert!(server.routing_table().targets_for("RobotArm").is_empty());
    }
}
