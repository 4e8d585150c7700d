//! Relay configuration

use std::net::SocketAddr;
use std::time::Duration;

/// Relay configuration options
///
/// Defaults match the reference deployment: stream clients on 5555,
/// duplex control on 8765, duplex video on 8766, datagram video ingest
/// on 5005.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address for stream (thread-per-connection) sessions
    pub stream_addr: SocketAddr,

    /// Address for duplex control sessions
    pub control_addr: SocketAddr,

    /// Address for duplex video-subscriber sessions
    pub video_addr: SocketAddr,

    /// Address for the datagram (chunked video) receiver
    pub datagram_addr: SocketAddr,

    /// Maximum ready-to-broadcast frames held before eviction
    pub frame_queue_capacity: usize,

    /// How long an incomplete frame buffer may live before the sweep
    /// discards it
    pub reassembly_timeout: Duration,

    /// Grace period for a session to complete its name handshake
    pub handshake_timeout: Duration,

    /// How often the telemetry reporter logs throughput
    pub telemetry_interval: Duration,

    /// How long the broadcaster waits on an empty queue before
    /// rechecking its subscriber set
    pub broadcast_poll_timeout: Duration,

    /// Delay between subscriber-set checks while nobody is watching
    pub idle_poll_delay: Duration,

    /// JPEG re-encode quality for annotated frames (1-100)
    pub jpeg_quality: u8,

    /// Enable TCP_NODELAY on accepted connections
    pub tcp_nodelay: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            stream_addr: "0.0.0.0:5555".parse().unwrap(),
            control_addr: "0.0.0.0:8765".parse().unwrap(),
            video_addr: "0.0.0.0:8766".parse().unwrap(),
            datagram_addr: "0.0.0.0:5005".parse().unwrap(),
            frame_queue_capacity: 10,
            reassembly_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(5),
            telemetry_interval: Duration::from_secs(5),
            broadcast_poll_timeout: Duration::from_millis(500),
            idle_poll_delay: Duration::from_millis(100),
            jpeg_quality: 70,
            tcp_nodelay: true,
        }
    }
}

impl RelayConfig {
    /// Set the stream session address
    pub fn stream_addr(mut self, addr: SocketAddr) -> Self {
        self.stream_addr = addr;
        self
    }

    /// Set the duplex control address
    pub fn control_addr(mut self, addr: SocketAddr) -> Self {
        self.control_addr = addr;
        self
    }

    /// Set the duplex video address
    pub fn video_addr(mut self, addr: SocketAddr) -> Self {
        self.video_addr = addr;
        self
    }

    /// Set the datagram receiver address
    pub fn datagram_addr(mut self, addr: SocketAddr) -> Self {
        self.datagram_addr = addr;
        self
    }

    /// Set the broadcast queue capacity (minimum 1)
    pub fn frame_queue_capacity(mut self, capacity: usize) -> Self {
        self.frame_queue_capacity = capacity.max(1);
        self
    }

    /// Set the reassembly staleness timeout
    pub fn reassembly_timeout(mut self, timeout: Duration) -> Self {
        self.reassembly_timeout = timeout;
        self
    }

    /// Set the handshake grace period
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the telemetry interval
    pub fn telemetry_interval(mut self, interval: Duration) -> Self {
        self.telemetry_interval = interval;
        self
    }

    /// Set the JPEG re-encode quality (clamped to 1-100)
    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }
}
