//! Datagram chunk header
//!
//! A video producer splits each encoded frame into chunks so that header
//! plus payload stays under the datagram budget. Every datagram starts
//! with a fixed 8-byte header:
//!
//! ```text
//! ┌────────────────────┬─────────────────────┬──────────────────────┐
//! │ frame_num (u32 BE) │ chunk_index (u16 BE)│ total_chunks (u16 BE)│
//! └────────────────────┴─────────────────────┴──────────────────────┘
//! ```
//!
//! This is the only supported layout. The chunk index makes reassembly
//! order-independent; the frame number keys concurrent in-flight frames.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Size of the fixed chunk header in bytes
pub const CHUNK_HEADER_LEN: usize = 8;

/// Total budget for one datagram (header + payload)
pub const MAX_DATAGRAM_LEN: usize = 65000;

/// Largest chunk payload that fits the datagram budget
pub const MAX_CHUNK_PAYLOAD: usize = MAX_DATAGRAM_LEN - CHUNK_HEADER_LEN;

/// Errors raised while decoding a datagram header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ChunkError {
    /// Datagram shorter than the fixed header
    #[error("datagram shorter than {CHUNK_HEADER_LEN}-byte header")]
    Truncated,

    /// Header declared zero total chunks
    #[error("total_chunks of 0 is invalid")]
    EmptyFrame,

    /// Chunk index not below the declared total
    #[error("chunk_index {index} out of range for total_chunks {total}")]
    IndexOutOfRange {
        /// Offending index
        index: u16,
        /// Declared chunk count
        total: u16,
    },
}

/// Parsed chunk header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    /// Frame sequence number
    pub frame_num: u32,
    /// Position of this chunk within the frame
    pub chunk_index: u16,
    /// Number of chunks the frame was split into
    pub total_chunks: u16,
}

impl ChunkHeader {
    /// Encode the header into its 8-byte wire form
    pub fn encode(&self) -> [u8; CHUNK_HEADER_LEN] {
        let mut buf = [0u8; CHUNK_HEADER_LEN];
        let mut cursor = &mut buf[..];
        cursor.put_u32(self.frame_num);
        cursor.put_u16(self.chunk_index);
        cursor.put_u16(self.total_chunks);
        buf
    }

    /// Decode a datagram into its header and chunk payload
    pub fn decode(datagram: &[u8]) -> Result<(Self, &[u8]), ChunkError> {
        if datagram.len() < CHUNK_HEADER_LEN {
            return Err(ChunkError::Truncated);
        }

        let (mut header_bytes, payload) = datagram.split_at(CHUNK_HEADER_LEN);
        let header = Self {
            frame_num: header_bytes.get_u32(),
            chunk_index: header_bytes.get_u16(),
            total_chunks: header_bytes.get_u16(),
        };

        if header.total_chunks == 0 {
            return Err(ChunkError::EmptyFrame);
        }
        if header.chunk_index >= header.total_chunks {
            return Err(ChunkError::IndexOutOfRange {
                index: header.chunk_index,
                total: header.total_chunks,
            });
        }

        Ok((header, payload))
    }
}

/// Split an encoded frame into ready-to-send datagrams
///
/// All chunks are `max_payload` bytes except the last. Used by producers
/// and by tests exercising the reassembly path.
pub fn split_frame(frame_num: u32, payload: &[u8], max_payload: usize) -> Vec<Bytes> {
    let max_payload = max_payload.max(1);
    let total = payload.len().div_ceil(max_payload).max(1) as u16;

    if payload.is_empty() {
        let header = ChunkHeader {
            frame_num,
            chunk_index: 0,
            total_chunks: 1,
        };
        return vec![Bytes::copy_from_slice(&header.encode())];
    }

    payload
        .chunks(max_payload)
        .enumerate()
        .map(|(index, chunk)| {
            let header = ChunkHeader {
                frame_num,
                chunk_index: index as u16,
                total_chunks: total,
            };
            let mut datagram = BytesMut::with_capacity(CHUNK_HEADER_LEN + chunk.len());
            datagram.put_slice(&header.encode());
            datagram.put_slice(chunk);
            datagram.freeze()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let header = ChunkHeader {
            frame_num: 0xDEAD_BEEF,
            chunk_index: 3,
            total_chunks: 7,
        };

        let mut datagram = header.encode().to_vec();
        datagram.extend_from_slice(b"payload");

        let (decoded, payload) = ChunkHeader::decode(&datagram).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(payload, b"payload");
    }

    #[test]
    fn test_header_is_big_endian() {
        let header = ChunkHeader {
            frame_num: 1,
            chunk_index: 0,
            total_chunks: 2,
        };

        assert_eq!(header.encode(), [0, 0, 0, 1, 0, 0, 0, 2]);
    }

    #[test]
    fn test_truncated_datagram_rejected() {
        assert_eq!(
            ChunkHeader::decode(&[0u8; 5]),
            Err(ChunkError::Truncated)
        );
    }

    #[test]
    fn test_zero_total_rejected() {
        let header = ChunkHeader {
            frame_num: 1,
            chunk_index: 0,
            total_chunks: 0,
        };

        // Bypass the index check by decoding raw bytes
        assert_eq!(
            ChunkHeader::decode(&header.encode()),
            Err(ChunkError::EmptyFrame)
        );
    }

    #[test]
    fn test_index_out_of_range_rejected() {
        let header = ChunkHeader {
            frame_num: 1,
            chunk_index: 2,
            total_chunks: 2,
        };

        assert_eq!(
            ChunkHeader::decode(&header.encode()),
            Err(ChunkError::IndexOutOfRange { index: 2, total: 2 })
        );
    }

    #[test]
    fn test_split_frame_sizes() {
        let payload = vec![0xABu8; 25];
        let datagrams = split_frame(9, &payload, 10);

        assert_eq!(datagrams.len(), 3);
        assert_eq!(datagrams[0].len(), CHUNK_HEADER_LEN + 10);
        assert_eq!(datagrams[1].len(), CHUNK_HEADER_LEN + 10);
        assert_eq!(datagrams[2].len(), CHUNK_HEADER_LEN + 5);

        for (i, datagram) in datagrams.iter().enumerate() {
            let (header, _) = ChunkHeader::decode(datagram).unwrap();
            assert_eq!(header.frame_num, 9);
            assert_eq!(header.chunk_index, i as u16);
            assert_eq!(header.total_chunks, 3);
        }
    }

    #[test]
    fn test_split_empty_frame_yields_one_chunk() {
        let datagrams = split_frame(1, &[], 10);

        assert_eq!(datagrams.len(), 1);
        let (header, payload) = ChunkHeader::decode(&datagrams[0]).unwrap();
        assert_eq!(header.total_chunks, 1);
        assert!(payload.is_empty());
    }
}
