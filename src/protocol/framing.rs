//! Message delimiters for the two connection-oriented transports
//!
//! Stream sessions speak newline-delimited JSON over blocking sockets;
//! duplex sessions speak 4-byte big-endian length-prefixed JSON over the
//! cooperative scheduler. Both sides of each codec live here so the
//! session managers stay free of byte-level concerns.

use std::io::{self, BufRead, Write};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single length-prefixed message
///
/// Large enough for a base64 video frame, small enough to stop a
/// corrupted length prefix from provoking a giant allocation.
pub const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

/// Read one newline-delimited message from a blocking reader
///
/// Returns `Ok(None)` on end of stream. Blank lines are skipped.
pub fn read_line_message<R: BufRead>(reader: &mut R) -> io::Result<Option<String>> {
    let mut line = String::new();
    loop {
        line.clear();
        let bytes = reader.read_line(&mut line)?;
        if bytes == 0 {
            return Ok(None);
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        return Ok(Some(trimmed.to_string()));
    }
}

/// Write one newline-delimited message to a blocking writer
pub fn write_line_message<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    writer.write_all(payload)?;
    writer.write_all(b"\n")?;
    writer.flush()
}

/// Read one length-prefixed message from an async reader
///
/// Returns `Ok(None)` when the peer closed the connection.
pub async fn read_frame<R>(reader: &mut R) -> io::Result<Option<Bytes>>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    };

    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame length {len} exceeds limit {MAX_FRAME_LEN}"),
        ));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(Bytes::from(payload)))
}

/// Write one length-prefixed message to an async writer
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_u32(payload.len() as u32).await?;
    writer.write_all(payload).await?;
    writer.flush().await
}
