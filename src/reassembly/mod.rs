//! Datagram-to-frame reassembly
//!
//! Producers split each encoded frame across datagrams (see
//! [`crate::protocol::chunk`]); this module puts them back together.
//! Chunks arrive out of order and some never arrive at all, so every
//! in-flight frame gets a [`FrameBuffer`] keyed by its sequence number,
//! and a periodic sweep evicts buffers that have not completed within
//! the staleness window.
//!
//! The transport is fire-and-forget, which leaves one inherent hazard:
//! a chunk arriving after its buffer was evicted silently starts a new
//! buffer for the same frame number, and that frame will reassemble
//! incorrectly if the producer has moved on. This is a documented
//! weakness of the datagram design, not something the reassembler tries
//! to repair.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::{BufMut, Bytes, BytesMut};

use crate::protocol::chunk::ChunkHeader;

/// Chunks collected so far for one in-flight frame
#[derive(Debug)]
pub struct FrameBuffer {
    total_chunks: u16,
    chunks: HashMap<u16, Bytes>,
    created_at: Instant,
}

impl FrameBuffer {
    fn new(total_chunks: u16, created_at: Instant) -> Self {
        Self {
            total_chunks,
            chunks: HashMap::new(),
            created_at,
        }
    }

    fn is_complete(&self) -> bool {
        self.chunks.len() == self.total_chunks as usize
    }

    /// Concatenate chunks in index order
    fn assemble(&self) -> Bytes {
        let size: usize = self.chunks.values().map(Bytes::len).sum();
        let mut payload = BytesMut::with_capacity(size);
        for index in 0..self.total_chunks {
            if let Some(chunk) = self.chunks.get(&index) {
                payload.put_slice(chunk);
            }
        }
        payload.freeze()
    }
}

/// A fully reassembled frame payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedFrame {
    /// Frame sequence number from the chunk headers
    pub frame_num: u32,
    /// Reassembled encoded image bytes
    pub payload: Bytes,
}

/// Turns a stream of datagrams into complete frames
///
/// Owned by the datagram receiver task; not shared, so no locking.
pub struct FrameReassembler {
    buffers: HashMap<u32, FrameBuffer>,
    stale_after: Duration,
}

impl FrameReassembler {
    /// Create a reassembler that evicts buffers older than `stale_after`
    pub fn new(stale_after: Duration) -> Self {
        Self {
            buffers: HashMap::new(),
            stale_after,
        }
    }

    /// Feed one datagram; returns a frame when this chunk completes it
    ///
    /// Malformed datagrams are dropped with a debug log. Duplicate
    /// chunks are ignored.
    pub fn ingest(&mut self, datagram: &[u8]) -> Option<CompletedFrame> {
        self.ingest_at(datagram, Instant::now())
    }

    /// `ingest` with an explicit arrival time
    pub fn ingest_at(&mut self, datagram: &[u8], now: Instant) -> Option<CompletedFrame> {
        let (header, chunk) = match ChunkHeader::decode(datagram) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::debug!(error = %e, len = datagram.len(), "Dropping malformed datagram");
                return None;
            }
        };

        let buffer = self
            .buffers
            .entry(header.frame_num)
            .or_insert_with(|| FrameBuffer::new(header.total_chunks, now));

        buffer
            .chunks
            .entry(header.chunk_index)
            .or_insert_with(|| Bytes::copy_from_slice(chunk));

        if !buffer.is_complete() {
            return None;
        }

        let payload = buffer.assemble();
        self.buffers.remove(&header.frame_num);

        tracing::trace!(
            frame_num = header.frame_num,
            chunks = header.total_chunks,
            bytes = payload.len(),
            "Frame complete"
        );

        Some(CompletedFrame {
            frame_num: header.frame_num,
            payload,
        })
    }

    /// Evict buffers older than the staleness window, complete or not
    ///
    /// Returns the number of buffers discarded.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let stale_after = self.stale_after;
        let before = self.buffers.len();

        self.buffers
            .retain(|_, buffer| now.duration_since(buffer.created_at) <= stale_after);

        let evicted = before - self.buffers.len();
        if evicted > 0 {
            tracing::debug!(evicted, pending = self.buffers.len(), "Swept stale frame buffers");
        }
        evicted
    }

    /// Number of in-flight frame buffers
    pub fn pending(&self) -> usize {
        self.buffers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::chunk::split_frame;

    fn datagram(frame_num: u32, index: u16, total: u16, chunk: &[u8]) -> Vec<u8> {
        let header = ChunkHeader {
            frame_num,
            chunk_index: index,
            total_chunks: total,
        };
        let mut out = header.encode().to_vec();
        out.extend_from_slice(chunk);
        out
    }

    #[test]
    fn test_out_of_order_chunks_reassemble_in_index_order() {
        let mut reassembler = FrameReassembler::new(Duration::from_secs(5));

        // Arrival order 2, 0, 1
        assert!(reassembler.ingest(&datagram(1, 2, 3, b"charlie")).is_none());
        assert!(reassembler.ingest(&datagram(1, 0, 3, b"alpha")).is_none());
        let frame = reassembler.ingest(&datagram(1, 1, 3, b"bravo")).unwrap();

        assert_eq!(frame.frame_num, 1);
        assert_eq!(&frame.payload[..], b"alphabravocharlie");
        assert_eq!(reassembler.pending(), 0);
    }

    #[test]
    fn test_all_arrival_permutations_agree() {
        let chunks: [&[u8]; 3] = [b"one", b"two", b"three"];
        let orders: [[u16; 3]; 6] = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];

        for order in orders {
            let mut reassembler = FrameReassembler::new(Duration::from_secs(5));
            let mut result = None;
            for index in order {
                result =
                    reassembler.ingest(&datagram(7, index, 3, chunks[index as usize]));
            }
            let frame = result.expect("last chunk completes the frame");
            assert_eq!(&frame.payload[..], b"onetwothree");
        }
    }

    #[test]
    fn test_duplicate_chunks_ignored() {
        let mut reassembler = FrameReassembler::new(Duration::from_secs(5));

        assert!(reassembler.ingest(&datagram(1, 0, 2, b"first")).is_none());
        assert!(reassembler
            .ingest(&datagram(1, 0, 2, b"overwrite"))
            .is_none());
        let frame = reassembler.ingest(&datagram(1, 1, 2, b"second")).unwrap();

        assert_eq!(&frame.payload[..], b"firstsecond");
    }

    #[test]
    fn test_invalid_datagrams_dropped() {
        let mut reassembler = FrameReassembler::new(Duration::from_secs(5));

        assert!(reassembler.ingest(&[0u8; 3]).is_none());
        assert!(reassembler.ingest(&datagram(1, 0, 0, b"x")).is_none());
        assert_eq!(reassembler.pending(), 0);
    }

    #[test]
    fn test_sweep_evicts_stale_incomplete_buffer() {
        let mut reassembler = FrameReassembler::new(Duration::from_secs(5));
        let start = Instant::now();

        reassembler.ingest_at(&datagram(1, 0, 3, b"only"), start);
        assert_eq!(reassembler.pending(), 1);

        // Not yet stale
        assert_eq!(reassembler.sweep(start + Duration::from_secs(4)), 0);
        assert_eq!(reassembler.pending(), 1);

        // Past the window: gone, and it never produced a frame
        assert_eq!(reassembler.sweep(start + Duration::from_secs(6)), 1);
        assert_eq!(reassembler.pending(), 0);
    }

    #[test]
    fn test_late_chunk_after_eviction_starts_fresh_buffer() {
        let mut reassembler = FrameReassembler::new(Duration::from_secs(5));
        let start = Instant::now();

        reassembler.ingest_at(&datagram(1, 0, 2, b"early"), start);
        reassembler.sweep(start + Duration::from_secs(6));

        // The straggler opens a brand new buffer under the same number
        reassembler.ingest_at(&datagram(1, 1, 2, b"late"), start + Duration::from_secs(7));
        assert_eq!(reassembler.pending(), 1);
    }

    #[test]
    fn test_split_and_reassemble_roundtrip() {
        let payload: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let mut reassembler = FrameReassembler::new(Duration::from_secs(5));

        let mut frame = None;
        for chunk in split_frame(3, &payload, 64) {
            frame = reassembler.ingest(&chunk);
        }

        assert_eq!(&frame.unwrap().payload[..], &payload[..]);
    }
}
