//! Transfers larger than one frame, carried by repeated calls to the
//! device's chunk dispatcher function.
//!
//! Every chunk starts with a 6-byte header:
//!
//! ```text
//! ┌────────────┬─────────┬──────────────────────┬──────────────────┐
//! │ byte 0     │ byte 1  │ bytes 2..6           │ bytes 6..        │
//! │ function / │ isLast  │ stream offset (LE)   │ up to 249 bytes  │
//! │ return     │         │                      │                  │
//! └────────────┴─────────┴──────────────────────┴──────────────────┘
//! ```
//!
//! Requests carry the target function offset in byte 0; replies carry the
//! target function's return value there.

use bytes::{BufMut, Bytes, BytesMut};
use mculink_frame::{write_uint_le, CHUNK_HEADER, CHUNK_PAYLOAD};
use tracing::{debug, trace};

use crate::error::{LinkError, Result};
use crate::packet::Reply;

/// Performs one synchronous call of the chunk dispatcher.
pub trait ChunkCaller {
    fn call_chunk(&self, request: Bytes) -> Result<Reply>;
}

/// One outgoing chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub stream_offset: u32,
    pub is_last: bool,
    /// Header followed by the segment.
    pub bytes: Bytes,
}

/// Splits a payload into chunks.
///
/// An empty payload yields a single, final, empty chunk.
#[derive(Debug, Clone)]
pub struct ChunkPlan<'a> {
    function: u8,
    data: &'a [u8],
    sent: usize,
    finished: bool,
}

impl<'a> ChunkPlan<'a> {
    pub fn new(function: u8, data: &'a [u8]) -> Self {
        Self {
            function,
            data,
            sent: 0,
            finished: false,
        }
    }

    /// Number of chunks the payload needs.
    pub fn chunk_count(&self) -> usize {
        self.data.len().div_ceil(CHUNK_PAYLOAD).max(1)
    }
}

impl Iterator for ChunkPlan<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.finished {
            return None;
        }
        let remaining = self.data.len() - self.sent;
        let is_last = remaining <= CHUNK_PAYLOAD;
        let len = remaining.min(CHUNK_PAYLOAD);
        let stream_offset = self.sent as u32;

        let mut bytes = BytesMut::with_capacity(CHUNK_HEADER + len);
        bytes.put_slice(&header(self.function, is_last, stream_offset));
        bytes.put_slice(&self.data[self.sent..self.sent + len]);

        self.sent += len;
        self.finished = is_last;
        Some(Chunk {
            stream_offset,
            is_last,
            bytes: bytes.freeze(),
        })
    }
}

/// Build a chunk header.
pub fn header(first: u8, is_last: bool, stream_offset: u32) -> [u8; CHUNK_HEADER] {
    let mut header = [0u8; CHUNK_HEADER];
    header[0] = first;
    header[1] = u8::from(is_last);
    write_uint_le(stream_offset, &mut header, 2, 4);
    header
}

/// Progress of a chunked receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// More chunks follow; request the next one at this stream offset.
    More(u32),
    /// The final chunk arrived.
    Done(Vec<u8>),
    /// The device function returned a non-zero code instead of data.
    Aborted(u8),
}

/// Reassembles the replies of a chunked receive.
#[derive(Debug, Default)]
pub struct ChunkAssembler {
    data: Vec<u8>,
}

impl ChunkAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request payload asking for the chunk at the current offset.
    pub fn request(&self, function: u8) -> Bytes {
        Bytes::copy_from_slice(&header(function, false, self.data.len() as u32))
    }

    /// Bytes received so far.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Consume one reply payload.
    ///
    /// A non-zero return byte aborts the transfer even when the reply carries
    /// nothing else.
    pub fn push(&mut self, reply: &[u8]) -> Result<Received> {
        match reply.first() {
            Some(&ret) if ret != 0 => return Ok(Received::Aborted(ret)),
            _ if reply.len() < CHUNK_HEADER => {
                return Err(LinkError::Device(format!(
                    "chunk reply of {} bytes is shorter than its header",
                    reply.len()
                )));
            }
            _ => {}
        }

        let segment = &reply[CHUNK_HEADER..];
        self.data.extend_from_slice(segment);
        if reply[1] != 0 {
            return Ok(Received::Done(std::mem::take(&mut self.data)));
        }
        if segment.is_empty() {
            return Err(LinkError::Device(
                "chunk stream made no progress".to_string(),
            ));
        }
        Ok(Received::More(self.data.len() as u32))
    }
}

/// Send `data` to device function `function` in chunks.
///
/// Returns the function's return byte for the final chunk, or the negated
/// return byte of the first non-final chunk that reported non-zero. The byte
/// is read as unsigned, so the result lies in `-255..=255`: a final `0xFC`
/// comes back as `252`, not `-4`.
pub fn send_long(caller: &impl ChunkCaller, function: u8, data: &[u8]) -> Result<i32> {
    let plan = ChunkPlan::new(function, data);
    debug!(function, len = data.len(), chunks = plan.chunk_count(), "sending chunked payload");

    for chunk in plan {
        let reply = caller.call_chunk(chunk.bytes)?;
        check_dispatcher(&reply)?;
        let ret = reply.payload.first().copied().ok_or_else(|| {
            LinkError::Device("chunk reply carries no return value".to_string())
        })?;
        trace!(offset = chunk.stream_offset, last = chunk.is_last, ret, "chunk acknowledged");

        if chunk.is_last {
            return Ok(i32::from(ret));
        }
        if ret != 0 {
            debug!(offset = chunk.stream_offset, ret, "device aborted chunked send");
            return Ok(-i32::from(ret));
        }
    }
    Err(LinkError::Device("chunk plan ended without a final chunk".to_string()))
}

/// Receive a chunked payload from device function `function`.
///
/// If the function reports a non-zero return value, that single byte is
/// returned instead of the data.
pub fn receive_long(caller: &impl ChunkCaller, function: u8) -> Result<Vec<u8>> {
    let mut assembler = ChunkAssembler::new();
    loop {
        let reply = caller.call_chunk(assembler.request(function))?;
        check_dispatcher(&reply)?;
        match assembler.push(&reply.payload)? {
            Received::More(offset) => trace!(offset, "chunk received"),
            Received::Done(data) => {
                debug!(function, len = data.len(), "chunked receive complete");
                return Ok(data);
            }
            Received::Aborted(ret) => {
                debug!(function, ret, "device aborted chunked receive");
                return Ok(vec![ret]);
            }
        }
    }
}

fn check_dispatcher(reply: &Reply) -> Result<()> {
    if reply.code == 0 {
        Ok(())
    } else {
        Err(LinkError::Device(format!(
            "chunk dispatcher returned {}",
            reply.code
        )))
    }
}
