//! Incremental framing over a byte stream.
//!
//! Every frame on every link starts with an `i32` length counting the bytes
//! that follow it (code + body). TCP gives no message boundaries, so bytes are
//! accumulated until a whole frame is present; leftovers stay buffered for the
//! next frame.

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{Error, Result};

/// Width of the length prefix on every frame.
pub const LENGTH_PREFIX: usize = 4;

/// Largest declared frame length accepted from a connection.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024; // 16 MiB

const INITIAL_CAPACITY: usize = 65536;

/// Check if the buffer starts with a complete frame.
///
/// Returns the total frame size (including the 4-byte length prefix) if
/// complete, or `None` if more data is needed. A declared length above
/// [`MAX_FRAME_LEN`] is rejected as soon as the prefix is buffered.
pub fn frame_size(buf: &[u8]) -> Result<Option<usize>> {
    if buf.len() < LENGTH_PREFIX {
        return Ok(None);
    }
    let len = i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if len < 0 {
        return Err(Error::InvalidLength(len));
    }
    let len = len as usize;
    if len > MAX_FRAME_LEN {
        return Err(Error::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }
    let total = LENGTH_PREFIX + len;
    Ok((buf.len() >= total).then_some(total))
}

/// Per-connection receive buffer that yields complete frames.
#[derive(Debug)]
pub struct FrameAssembler {
    buf: BytesMut,
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameAssembler {
    pub fn new() -> Self {
        FrameAssembler {
            buf: BytesMut::with_capacity(INITIAL_CAPACITY),
        }
    }

    /// Append raw bytes received from the connection.
    pub fn extend_from_slice(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Number of bytes buffered but not yet handed out as frames.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Pop the next complete frame, without its length prefix.
    ///
    /// A negative or oversized declared length cannot be resynchronized and
    /// is returned as an error; the buffer is left untouched in that case.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>> {
        match frame_size(&self.buf)? {
            Some(total) => {
                let mut frame = self.buf.split_to(total);
                frame.advance(LENGTH_PREFIX);
                Ok(Some(frame.freeze()))
            }
            None => Ok(None),
        }
    }

    /// Read from `reader` until a complete frame is buffered.
    ///
    /// Returns `Ok(None)` once the peer closes the connection (zero-byte
    /// read). Cancel-safe: bytes already read stay in the buffer.
    pub async fn read_frame<R>(&mut self, reader: &mut R) -> Result<Option<Bytes>>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            if let Some(frame) = self.next_frame()? {
                return Ok(Some(frame));
            }
            let n = reader.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Ok(None);
            }
        }
    }
}
