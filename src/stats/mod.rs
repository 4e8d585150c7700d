//! Relay telemetry
//!
//! Purely observational: shared atomic counters bumped on the hot paths
//! and a reporter task that logs throughput and queue occupancy on a
//! fixed interval. Nothing in the relay depends on this module.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::broadcast::BoundedFrameQueue;
use crate::registry::{ClientRegistry, VideoSubscribers};

/// Cumulative relay counters
#[derive(Debug, Default)]
pub struct RelayCounters {
    datagrams_received: AtomicU64,
    frames_reassembled: AtomicU64,
    frames_dropped: AtomicU64,
    frames_sent: AtomicU64,
    messages_routed: AtomicU64,
    route_failures: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountersSnapshot {
    /// Datagrams pulled off the socket
    pub datagrams_received: u64,
    /// Frames that completed reassembly and decoded
    pub frames_reassembled: u64,
    /// Reassembled frames that failed to decode
    pub frames_dropped: u64,
    /// Individual successful deliveries to video subscribers
    pub frames_sent: u64,
    /// Control messages delivered by the routing engine
    pub messages_routed: u64,
    /// Deliveries that failed and evicted their target
    pub route_failures: u64,
}

impl RelayCounters {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one datagram received
    pub fn record_datagram(&self) {
        self.datagrams_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one frame reassembled and decoded
    pub fn record_frame_reassembled(&self) {
        self.frames_reassembled.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one reassembled frame dropped at decode
    pub fn record_frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one successful delivery to a subscriber
    pub fn record_frame_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one routed control message delivery
    pub fn record_message_routed(&self) {
        self.messages_routed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one failed delivery
    pub fn record_route_failure(&self) {
        self.route_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the current values
    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            frames_reassembled: self.frames_reassembled.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            messages_routed: self.messages_routed.load(Ordering::Relaxed),
            route_failures: self.route_failures.load(Ordering::Relaxed),
        }
    }
}

/// Periodic throughput logger
pub struct TelemetryReporter {
    counters: Arc<RelayCounters>,
    queue: Arc<BoundedFrameQueue>,
    subscribers: Arc<VideoSubscribers>,
    stream_registry: Arc<ClientRegistry>,
    control_registry: Arc<ClientRegistry>,
    interval: Duration,
}

impl TelemetryReporter {
    /// Wire up a reporter over the relay's shared state
    pub fn new(
        counters: Arc<RelayCounters>,
        queue: Arc<BoundedFrameQueue>,
        subscribers: Arc<VideoSubscribers>,
        stream_registry: Arc<ClientRegistry>,
        control_registry: Arc<ClientRegistry>,
        interval: Duration,
    ) -> Self {
        Self {
            counters,
            queue,
            subscribers,
            stream_registry,
            control_registry,
            interval,
        }
    }

    /// Log throughput forever on the configured interval
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        // First tick fires immediately; skip it so the first report
        // covers a full interval
        ticker.tick().await;

        let mut last = self.counters.snapshot();

        loop {
            ticker.tick().await;
            let snapshot = self.counters.snapshot();

            let secs = self.interval.as_secs_f64();
            let fps = (snapshot.frames_sent - last.frames_sent) as f64 / secs;

            tracing::info!(
                fps = (fps * 100.0).round() / 100.0,
                queue = self.queue.len(),
                video_subscribers = self.subscribers.len(),
                stream_clients = self.stream_registry.len(),
                control_clients = self.control_registry.len(),
                datagrams = snapshot.datagrams_received,
                reassembled = snapshot.frames_reassembled,
                dropped = snapshot.frames_dropped,
                sent = snapshot.frames_sent,
                routed = snapshot.messages_routed,
                route_failures = snapshot.route_failures,
                "Relay throughput"
            );

            last = snapshot;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_tracks_increments() {
        let counters = RelayCounters::new();

        counters.record_datagram();
        counters.record_datagram();
        counters.record_frame_reassembled();
        counters.record_frame_sent();
        counters.record_route_failure();

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.datagrams_received, 2);
        assert_eq!(snapshot.frames_reassembled, 1);
        assert_eq!(snapshot.frames_sent, 1);
        assert_eq!(snapshot.route_failures, 1);
        assert_eq!(snapshot.messages_routed, 0);
    }
}
