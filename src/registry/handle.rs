//! Session identity and outbound delivery handles

use bytes::Bytes;
use thiserror::Error;

/// Unique identifier for a live session
///
/// Allocated from one server-wide counter, so an id never collides
/// across registries.
pub type SessionId = u64;

/// The transport kind a session belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    /// Thread-per-connection stream session
    Stream,
    /// Cooperative duplex control session
    DuplexControl,
    /// Cooperative duplex video subscriber
    DuplexVideo,
}

impl SessionKind {
    /// Short label used in log fields
    pub fn label(&self) -> &'static str {
        match self {
            SessionKind::Stream => "stream",
            SessionKind::DuplexControl => "duplex-control",
            SessionKind::DuplexVideo => "duplex-video",
        }
    }
}

/// The session's outbound channel is gone, meaning its writer has
/// exited and the transport is dead
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("session outbound channel closed")]
pub struct DeliveryError;

/// What happened to a queued payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Queued for the session's writer
    Delivered,
    /// Dropped because the session's bounded queue was full; the
    /// session itself is still healthy
    Shed,
}

/// Sending half of a session's outbound queue
///
/// Stream sessions drain a blocking channel on a dedicated writer
/// thread; duplex sessions drain a tokio channel on a writer task.
/// Either way `send` is a non-blocking queue push, safe from both
/// concurrency domains.
///
/// Control-plane handles are unbounded (messages are small and rare).
/// Video handles are bounded and lossy: a subscriber that cannot keep
/// up sheds frames instead of growing a queue without limit.
#[derive(Debug, Clone)]
pub enum OutboundHandle {
    /// Into a stream session's writer thread
    Stream(std::sync::mpsc::Sender<Bytes>),
    /// Into a duplex control session's writer task
    Duplex(tokio::sync::mpsc::UnboundedSender<Bytes>),
    /// Into a duplex video session's writer task
    Video(tokio::sync::mpsc::Sender<Bytes>),
}

impl OutboundHandle {
    /// Queue a payload for delivery
    ///
    /// Fails only when the session's writer has already shut down.
    pub fn send(&self, payload: Bytes) -> Result<SendOutcome, DeliveryError> {
        match self {
            OutboundHandle::Stream(tx) => tx
                .send(payload)
                .map(|_| SendOutcome::Delivered)
                .map_err(|_| DeliveryError),
            OutboundHandle::Duplex(tx) => tx
                .send(payload)
                .map(|_| SendOutcome::Delivered)
                .map_err(|_| DeliveryError),
            OutboundHandle::Video(tx) => match tx.try_send(payload) {
                Ok(()) => Ok(SendOutcome::Delivered),
                Err(tokio::sync::mpsc::error::TrySendError::Full(_)) => Ok(SendOutcome::Shed),
                Err(tokio::sync::mpsc::error::TrySendError::Closed(_)) => Err(DeliveryError),
            },
        }
    }
}
