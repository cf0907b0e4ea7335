//! Link-level framing for microcontroller RPC.
//!
//! Every transaction direction is one frame:
//! - a `SOF` delimiter (0x12), the only unescaped byte on the wire
//! - sequence number, command and payload length, one byte each
//! - up to 255 payload bytes
//! - a one-byte XOR checksum over the unescaped values
//!
//! Reserved bytes are escaped with `ESC` (0x7D). The reader resynchronises on
//! the next `SOF` after noise, and skips replies whose sequence number does not
//! match the request in flight.

pub mod codec;
pub mod endian;
pub mod error;
pub mod reader;
pub mod status;
pub mod writer;

pub use codec::{
    checksum, decode_frame, encode_frame, Frame, SeqFilter, CHUNK_HEADER,
    CHUNK_PAYLOAD, ESC, MAX_PAYLOAD, SOF,
};
pub use endian::{read_uint_le, write_uint_le};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use status::{ReplyStatus, DEVICE_CHECKSUM, DEVICE_TIMEOUT, OUT_OF_BOUNDS};
pub use writer::FrameWriter;
