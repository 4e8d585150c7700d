//! Bounded frame broadcast
//!
//! Reassembled frames flow through a bounded FIFO into a fan-out loop
//! that pushes each frame to every current video subscriber. The queue
//! sheds load instead of exerting backpressure: a producer that finds
//! it full evicts the oldest frame and inserts, so stale video is
//! dropped in favor of fresh video and the reassembly pipeline is never
//! blocked by slow consumers.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Notify;

use crate::protocol::envelope;
use crate::registry::{SendOutcome, VideoSubscribers};
use crate::stats::RelayCounters;

/// A frame ready for delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyFrame {
    /// Frame sequence number carried into the delivery message
    pub frame_num: u32,
    /// Annotated JPEG bytes
    pub jpeg: Bytes,
}

/// FIFO of at most `capacity` ready frames
///
/// Owned by the cooperative domain. `push` never blocks; `pop` waits
/// only on emptiness, bounded by a timeout so the broadcast loop stays
/// live when no frames arrive.
pub struct BoundedFrameQueue {
    frames: Mutex<VecDeque<ReadyFrame>>,
    capacity: usize,
    notify: Notify,
}

impl BoundedFrameQueue {
    /// Create a queue holding at most `capacity` frames (minimum 1)
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            notify: Notify::new(),
        }
    }

    /// Insert a frame, evicting the oldest entry first when full
    ///
    /// Returns `true` if an eviction was needed.
    pub fn push(&self, frame: ReadyFrame) -> bool {
        let evicted = {
            let mut frames = self.frames.lock().unwrap();
            let evicted = if frames.len() >= self.capacity {
                frames.pop_front();
                true
            } else {
                false
            };
            frames.push_back(frame);
            evicted
        };

        if evicted {
            tracing::trace!("Frame queue full, evicted oldest");
        }
        self.notify.notify_one();
        evicted
    }

    /// Remove the oldest frame, waiting up to `timeout` on emptiness
    pub async fn pop(&self, timeout: Duration) -> Option<ReadyFrame> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            // Arm the notification before checking, so a push between
            // the check and the await is not lost
            let notified = self.notify.notified();

            if let Some(frame) = self.frames.lock().unwrap().pop_front() {
                return Some(frame);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    /// Current number of queued frames
    pub fn len(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    fn contents(&self) -> Vec<ReadyFrame> {
        self.frames.lock().unwrap().iter().cloned().collect()
    }
}

/// Fan-out loop delivering queued frames to every video subscriber
pub struct FrameBroadcaster {
    queue: Arc<BoundedFrameQueue>,
    subscribers: Arc<VideoSubscribers>,
    counters: Arc<RelayCounters>,
    poll_timeout: Duration,
    idle_delay: Duration,
}

impl FrameBroadcaster {
    /// Wire up a broadcaster over the shared queue and subscriber set
    pub fn new(
        queue: Arc<BoundedFrameQueue>,
        subscribers: Arc<VideoSubscribers>,
        counters: Arc<RelayCounters>,
        poll_timeout: Duration,
        idle_delay: Duration,
    ) -> Self {
        Self {
            queue,
            subscribers,
            counters,
            poll_timeout,
            idle_delay,
        }
    }

    /// Run the broadcast loop forever
    pub async fn run(self) {
        loop {
            // Fast path: nobody watching, don't drain the queue
            if self.subscribers.is_empty() {
                tokio::time::sleep(self.idle_delay).await;
                continue;
            }

            let Some(frame) = self.queue.pop(self.poll_timeout).await else {
                continue;
            };

            self.deliver(&frame);
        }
    }

    /// Deliver one frame to every current subscriber
    ///
    /// A subscriber whose outbound channel is gone is removed from the
    /// set; the pass always continues to the remaining subscribers.
    pub fn deliver(&self, frame: &ReadyFrame) {
        let message = envelope::video_frame_message(&frame.jpeg, frame.frame_num, false);

        let mut delivered = 0usize;
        for (id, handle) in self.subscribers.snapshot() {
            match handle.send(message.clone()) {
                Ok(SendOutcome::Delivered) => {
                    delivered += 1;
                    self.counters.record_frame_sent();
                }
                Ok(SendOutcome::Shed) => {
                    tracing::trace!(session_id = id, "Subscriber lagging, frame shed");
                }
                Err(_) => {
                    tracing::warn!(session_id = id, "Video subscriber gone, removing");
                    self.subscribers.unregister(id);
                }
            }
        }

        tracing::trace!(
            frame_num = frame.frame_num,
            delivered,
            queued = self.queue.len(),
            "Frame broadcast"
        );
    }
}
