//! Datagram receiver
//!
//! Pulls chunked video datagrams off the socket, feeds the
//! reassembler, annotates completed frames, and enqueues them for
//! broadcast. Runs as one task in the cooperative domain; the
//! reassembler is owned here and never shared.
//!
//! The staleness sweep runs after every datagram and on a timer tick,
//! so buffers are bounded even when traffic stops mid-frame.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;

use crate::broadcast::{BoundedFrameQueue, ReadyFrame};
use crate::config::RelayConfig;
use crate::media;
use crate::reassembly::FrameReassembler;
use crate::stats::RelayCounters;

/// Largest payload a UDP datagram can carry; the receive buffer is
/// sized for it so oversized datagrams are not silently truncated
const RECV_BUFFER_LEN: usize = 65507;

/// Interval between timer-driven sweeps
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// One task turning datagrams into broadcast-ready frames
pub struct DatagramReceiver {
    queue: Arc<BoundedFrameQueue>,
    counters: Arc<RelayCounters>,
    reassembly_timeout: Duration,
    jpeg_quality: u8,
}

impl DatagramReceiver {
    /// Wire up a receiver over the shared frame queue
    pub fn new(
        config: &RelayConfig,
        queue: Arc<BoundedFrameQueue>,
        counters: Arc<RelayCounters>,
    ) -> Self {
        Self {
            queue,
            counters,
            reassembly_timeout: config.reassembly_timeout,
            jpeg_quality: config.jpeg_quality,
        }
    }

    /// Receive forever
    pub async fn run(self, socket: UdpSocket) {
        let mut reassembler = FrameReassembler::new(self.reassembly_timeout);
        let mut buf = vec![0u8; RECV_BUFFER_LEN];
        let mut sweep_ticker = tokio::time::interval(SWEEP_INTERVAL);

        loop {
            tokio::select! {
                received = socket.recv_from(&mut buf) => {
                    match received {
                        Ok((len, _peer)) => {
                            self.counters.record_datagram();
                            if let Some(frame) = reassembler.ingest(&buf[..len]) {
                                self.process_frame(frame.frame_num, &frame.payload);
                            }
                            reassembler.sweep(Instant::now());
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Datagram receive error");
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                    }
                }
                _ = sweep_ticker.tick() => {
                    reassembler.sweep(Instant::now());
                }
            }
        }
    }

    fn process_frame(&self, frame_num: u32, payload: &[u8]) {
        match media::annotate_frame(payload, frame_num, self.jpeg_quality) {
            Some(jpeg) => {
                self.counters.record_frame_reassembled();
                let evicted = self.queue.push(ReadyFrame { frame_num, jpeg });
                if evicted {
                    tracing::debug!(frame_num, "Broadcast queue full, evicted oldest frame");
                }
            }
            None => {
                // Corrupt reassembly on a lossy transport; drop and move on
                self.counters.record_frame_dropped();
                tracing::debug!(frame_num, "Reassembled frame failed to decode");
            }
        }
    }
}
