use std::io::Read;

use bytes::BytesMut;

use crate::codec::{decode_frame, Frame, SeqFilter};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 1024;
const READ_CHUNK_SIZE: usize = 512;

/// Reads complete frames from any `Read` stream.
///
/// Handles partial reads, leading noise and stale frames internally. Errors
/// from the stream are returned unchanged, including `Interrupted`, so that a
/// wrapper stream can use it to cancel a blocked read. Bytes already buffered
/// survive such an error and are reused by the next call.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
}

impl<T: Read> FrameReader<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
        }
    }

    /// Read the reply carrying `expected_seq` (blocking).
    ///
    /// Frames with any other sequence number are discarded silently.
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached.
    pub fn read_reply(&mut self, expected_seq: u8) -> Result<Frame> {
        self.read_matching(SeqFilter::Exactly(expected_seq))
    }

    /// Read the next frame regardless of its sequence number (blocking).
    pub fn read_request(&mut self) -> Result<Frame> {
        self.read_matching(SeqFilter::Any)
    }

    fn read_matching(&mut self, filter: SeqFilter) -> Result<Frame> {
        loop {
            if let Some(frame) = decode_frame(&mut self.buf, filter)? {
                return Ok(frame);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = self.inner.read(&mut chunk).map_err(FrameError::Io)?;
            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

}
