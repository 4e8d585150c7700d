//! Crate-level error type
//!
//! Most failures in the relay are handled locally by policy (drop the
//! message, evict the frame, close the one affected session) and never
//! surface here. `RelayError` covers the cases a caller can actually act
//! on: startup I/O failures and malformed configuration.

use thiserror::Error;

/// Error type for relay operations
#[derive(Debug, Error)]
pub enum RelayError {
    /// Underlying socket or file I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A control message could not be parsed as a JSON object
    #[error("malformed control message: {0}")]
    Envelope(#[from] serde_json::Error),
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, RelayError>;
