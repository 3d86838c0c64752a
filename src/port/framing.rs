//! Length-prefixed framing for stream ports.
//!
//! Each frame is a 4-byte big-endian payload length followed by the encoded
//! envelope. [`FrameBuffer`] accumulates partial reads and yields complete
//! frames:
//! - `WaitingForLength`: need 4 bytes
//! - `WaitingForBody`: length parsed, need N more bytes
//!
//! # Example
//!
//! ```
//! use portlink::port::{encode_frame, FrameBuffer};
//!
//! let wire = encode_frame(b"hello").unwrap();
//! let mut buffer = FrameBuffer::new();
//!
//! assert!(buffer.push(&wire[..3]).unwrap().is_empty());
//! let frames = buffer.push(&wire[3..]).unwrap();
//! assert_eq!(&frames[0][..], b"hello");
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{CommsError, Result};

/// Size of the length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default maximum frame body (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Prefix `body` with its length.
///
/// # Errors
///
/// Returns `FrameTooLarge` if the length does not fit the 4-byte prefix.
pub fn encode_frame(body: &[u8]) -> Result<Bytes> {
    let size = u32::try_from(body.len()).map_err(|_| CommsError::FrameTooLarge {
        size: body.len(),
        max: u32::MAX as usize,
    })?;
    let mut out = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + body.len());
    out.put_u32(size);
    out.extend_from_slice(body);
    Ok(out.freeze())
}

#[derive(Debug, Clone, Copy)]
enum State {
    WaitingForLength,
    WaitingForBody { remaining: usize },
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
pub struct FrameBuffer {
    buffer: BytesMut,
    state: State,
    max_frame_size: usize,
}

impl FrameBuffer {
    /// Create a buffer with the default frame limit.
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a buffer with a custom frame limit.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::WaitingForLength,
            max_frame_size,
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// # Errors
    ///
    /// Returns `FrameTooLarge` if a length prefix exceeds the limit. The
    /// stream cannot be resynchronised after that.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Bytes>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    fn try_extract_one(&mut self) -> Result<Option<Bytes>> {
        loop {
            match self.state {
                State::WaitingForLength => {
                    if self.buffer.len() < LENGTH_PREFIX_SIZE {
                        return Ok(None);
                    }

                    let prefix = self.buffer.split_to(LENGTH_PREFIX_SIZE);
                    let size = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]])
                        as usize;
                    if size > self.max_frame_size {
                        return Err(CommsError::FrameTooLarge {
                            size,
                            max: self.max_frame_size,
                        });
                    }
                    self.state = State::WaitingForBody { remaining: size };
                }

                State::WaitingForBody { remaining } => {
                    if self.buffer.len() < remaining {
                        return Ok(None);
                    }
                    self.state = State::WaitingForLength;
                    return Ok(Some(self.buffer.split_to(remaining).freeze()));
                }
            }
        }
    }

    /// Number of buffered bytes not yet returned as frames.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
