//! Wire formats for the relay
//!
//! Three formats live here:
//!
//! - [`chunk`]: the fixed 8-byte datagram header used by video producers
//!   to split an encoded frame across datagrams.
//! - [`envelope`]: the JSON control message envelope routed between named
//!   clients, plus the relay-originated status and video frame messages.
//! - [`framing`]: the two message delimiters — newline-delimited JSON for
//!   stream sessions, 4-byte length-prefixed JSON for duplex sessions.

pub mod chunk;
pub mod envelope;
pub mod framing;

pub use chunk::{ChunkError, ChunkHeader, CHUNK_HEADER_LEN, MAX_DATAGRAM_LEN};
pub use envelope::ControlMessage;
