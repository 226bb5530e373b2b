//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented frames:
//! - `WaitingForHeader`: Need at least 4 bytes of length prefix
//! - `WaitingForBody`: Length parsed, need N more body bytes
//!
//! # Example
//!
//! ```
//! use doozer_client::protocol::{build_frame, FrameBuffer};
//!
//! let mut buffer = FrameBuffer::new();
//! let frame = build_frame(b"body");
//!
//! // Data arrives in chunks from the socket
//! assert!(buffer.push(&frame[..3]).unwrap().is_empty());
//! let bodies = buffer.push(&frame[3..]).unwrap();
//! assert_eq!(&bodies[0][..], b"body");
//! ```

use bytes::{Bytes, BytesMut};

use super::frame::{decode_length, DEFAULT_MAX_FRAME_SIZE, FRAME_HEADER_SIZE};
use crate::error::{DoozerError, Result};

/// State machine for frame parsing.
#[derive(Debug, Clone, Copy)]
enum State {
    WaitingForHeader,
    WaitingForBody { remaining: u32 },
}

/// Buffer for accumulating incoming bytes and extracting complete frame bodies.
pub struct FrameBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
}

impl FrameBuffer {
    /// Create a new frame buffer with default settings.
    ///
    /// Default capacity: 64KB, max body: 64 MiB.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::WaitingForHeader,
        }
    }

    /// Push data into the buffer and extract all complete frame bodies.
    ///
    /// Partial data is kept for the next push.
    ///
    /// # Errors
    ///
    /// Returns [`DoozerError::Framing`] if a length prefix exceeds the maximum
    /// frame size. The stream cannot be resynchronized after that.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Bytes>> {
        self.buffer.extend_from_slice(data);

        let mut bodies = Vec::new();
        while let Some(body) = self.try_extract_one()? {
            bodies.push(body);
        }

        Ok(bodies)
    }

    fn try_extract_one(&mut self) -> Result<Option<Bytes>> {
        loop {
            match self.state {
                State::WaitingForHeader => {
                    let Some(len) = decode_length(&self.buffer) else {
                        return Ok(None);
                    };

                    if len > DEFAULT_MAX_FRAME_SIZE {
                        return Err(DoozerError::Framing(format!(
                            "Frame size {} exceeds maximum {}",
                            len, DEFAULT_MAX_FRAME_SIZE
                        )));
                    }

                    let _ = self.buffer.split_to(FRAME_HEADER_SIZE);
                    self.state = State::WaitingForBody { remaining: len };
                }

                State::WaitingForBody { remaining } => {
                    let remaining = remaining as usize;
                    if self.buffer.len() < remaining {
                        return Ok(None);
                    }

                    let body = self.buffer.split_to(remaining).freeze();
                    self.state = State::WaitingForHeader;
                    return Ok(Some(body));
                }
            }
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match self.state {
            State::WaitingForHeader => "WaitingForHeader",
            State::WaitingForBody { .. } => "WaitingForBody",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
