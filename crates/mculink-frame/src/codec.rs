use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::trace;

use crate::error::{FrameError, Result};

/// Start-of-frame delimiter. Only ever sent unescaped at the start of a frame.
pub const SOF: u8 = 0x12;

/// Escape marker. `ESC x` on the wire stands for the logical byte `x + 1`.
pub const ESC: u8 = 0x7D;

/// Added to the command byte before it enters the checksum.
pub const CRC_CMD: u8 = 11;

/// Added to the length byte before it enters the checksum.
pub const CRC_LEN: u8 = 97;

/// Largest payload one frame can carry (the length field is a single byte).
pub const MAX_PAYLOAD: usize = 255;

/// Chunk header: function offset (1) + last flag (1) + stream offset (4 LE).
pub const CHUNK_HEADER: usize = 6;

/// Payload bytes that fit in one chunk after its header.
pub const CHUNK_PAYLOAD: usize = MAX_PAYLOAD - CHUNK_HEADER;

/// One direction of one link transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Per-transaction sequence number, echoed by the device.
    pub seq: u8,
    /// Function offset on requests, return code on replies.
    pub cmd: u8,
    /// Unescaped payload.
    pub payload: Bytes,
}

/// Returns true for byte values that must be escaped on the wire.
pub fn needs_escape(byte: u8) -> bool {
    byte == SOF || byte == ESC
}

/// Append one logical byte to `dst`, escaping it when required.
pub fn escape_byte(byte: u8, dst: &mut BytesMut) {
    if needs_escape(byte) {
        dst.put_u8(ESC);
        dst.put_u8(byte.wrapping_sub(1));
    } else {
        dst.put_u8(byte);
    }
}

/// Decode the byte that followed an `ESC` marker.
pub fn unescape(follow: u8) -> u8 {
    follow.wrapping_add(1)
}

/// XOR checksum over the unescaped logical values of a frame.
pub fn checksum(seq: u8, cmd: u8, payload: &[u8]) -> u8 {
    let len = payload.len() as u8;
    payload.iter().fold(
        seq ^ CRC_CMD.wrapping_add(cmd) ^ CRC_LEN.wrapping_add(len),
        |acc, byte| acc ^ byte,
    )
}

/// Encode a frame into the wire format.
///
/// Wire format (every field after `SOF` is escaped):
/// ```text
/// ┌──────┬─────┬─────┬─────┬─────────────────┬──────────┐
/// │ SOF  │ seq │ cmd │ len │ payload[len]    │ checksum │
/// │ 0x12 │ 1B  │ 1B  │ 1B  │ 0..=255 bytes   │ 1B XOR   │
/// └──────┴─────┴─────┴─────┴─────────────────┴──────────┘
/// ```
pub fn encode_frame(seq: u8, cmd: u8, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > MAX_PAYLOAD {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD,
        });
    }

    // Worst case every logical byte after SOF is escaped.
    dst.reserve(1 + 2 * (4 + payload.len()));
    dst.put_u8(SOF);
    escape_byte(seq, dst);
    escape_byte(cmd, dst);
    escape_byte(payload.len() as u8, dst);
    for &byte in payload {
        escape_byte(byte, dst);
    }
    escape_byte(checksum(seq, cmd, payload), dst);
    Ok(())
}

/// Which sequence numbers a decoder accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqFilter {
    /// Any sequence number (device side).
    Any,
    /// Only the given sequence number; other frames are skipped silently.
    Exactly(u8),
}

impl SeqFilter {
    fn accepts(self, seq: u8) -> bool {
        match self {
            SeqFilter::Any => true,
            SeqFilter::Exactly(expected) => expected == seq,
        }
    }
}

/// Decode a frame from a buffer.
///
/// Bytes before the next `SOF` are dropped. A frame whose sequence number is
/// rejected by `filter` is skipped and scanning resumes at the next `SOF`.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet. On
/// success the frame bytes are consumed from the buffer. A raw `SOF` inside a
/// frame fails with [`FrameError::UnescapedDelimiter`] and leaves that `SOF`
/// in the buffer so the next call resynchronises on it; a checksum mismatch
/// consumes the bad frame.
pub fn decode_frame(src: &mut BytesMut, filter: SeqFilter) -> Result<Option<Frame>> {
    loop {
        match src.iter().position(|&b| b == SOF) {
            Some(0) => {}
            Some(skip) => {
                trace!(skip, "discarding bytes before start of frame");
                src.advance(skip);
            }
            None => {
                src.clear();
                return Ok(None);
            }
        }

        let mut cursor = LogicalCursor::new(src);
        let Some(seq) = cursor.next()? else {
            return Ok(None);
        };
        if !filter.accepts(seq) {
            trace!(seq, ?filter, "skipping frame with stale sequence number");
            src.advance(1);
            continue;
        }

        let Some(cmd) = cursor.next()? else {
            return Ok(None);
        };
        let Some(len) = cursor.next()? else {
            return Ok(None);
        };
        let mut payload = BytesMut::with_capacity(len as usize);
        for _ in 0..len {
            let Some(byte) = cursor.next()? else {
                return Ok(None);
            };
            payload.put_u8(byte);
        }
        let Some(actual) = cursor.next()? else {
            return Ok(None);
        };

        let consumed = cursor.pos;
        src.advance(consumed);

        let expected = checksum(seq, cmd, &payload);
        if expected != actual {
            return Err(FrameError::Checksum {
                seq,
                expected,
                actual,
            });
        }

        return Ok(Some(Frame {
            seq,
            cmd,
            payload: payload.freeze(),
        }));
    }
}

/// Walks the escaped bytes of one frame, starting just after its `SOF`.
struct LogicalCursor<'a> {
    src: &'a mut BytesMut,
    pos: usize,
}

impl<'a> LogicalCursor<'a> {
    fn new(src: &'a mut BytesMut) -> Self {
        Self { src, pos: 1 }
    }

    /// Next logical byte, `Ok(None)` when more input is needed.
    fn next(&mut self) -> Result<Option<u8>> {
        let Some(&raw) = self.src.get(self.pos) else {
            return Ok(None);
        };
        match raw {
            SOF => Err(self.delimiter_error()),
            ESC => match self.src.get(self.pos + 1) {
                None => Ok(None),
                Some(&SOF) => {
                    self.pos += 1;
                    Err(self.delimiter_error())
                }
                Some(&follow) => {
                    self.pos += 2;
                    Ok(Some(unescape(follow)))
                }
            },
            byte => {
                self.pos += 1;
                Ok(Some(byte))
            }
        }
    }

    /// Drop the broken frame but keep the stray `SOF` for resynchronisation.
    fn delimiter_error(&mut self) -> FrameError {
        self.src.advance(self.pos);
        FrameError::UnescapedDelimiter
    }
}
