//! Device side of the protocol, for tests and demos without hardware.
//!
//! A [`DeviceEmulator`] owns a function table whose first entries are the
//! well-known functions every firmware exposes:
//!
//! | offset | name               | behavior                                  |
//! |--------|--------------------|-------------------------------------------|
//! | 0      | `a2jGetMapping`    | NUL-terminated list of all function names |
//! | 1      | `a2jGetProperties` | NUL-terminated key/value pairs            |
//! | 2      | `a2jMany`          | chunk dispatcher                          |
//! | 3      | `a2jEcho`          | returns the request payload               |
//! | 4      | `a2jEchoMany`      | chunked echo: stores a send, replays it   |
//!
//! Further functions are appended with [`DeviceEmulator::with_function`] and
//! [`DeviceEmulator::with_chunked`].

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use mculink_frame::{
    read_uint_le, FrameError, FrameReader, FrameWriter, CHUNK_HEADER, CHUNK_PAYLOAD,
    DEVICE_CHECKSUM, OUT_OF_BOUNDS,
};
use mculink_transport::{LinkStream, Transport};
use tracing::{debug, trace, warn};

use crate::chunked::header;
use crate::functions::{CHUNK_DISPATCH, GET_PROPERTIES};

/// Name of the built-in function at offset 0.
pub const GET_MAPPING: &str = "a2jGetMapping";
/// Built-in single-frame echo.
pub const ECHO: &str = "a2jEcho";
/// Built-in chunked echo.
pub const ECHO_MANY: &str = "a2jEchoMany";

/// Reply code of the chunk dispatcher for a malformed chunk header.
pub const DISPATCH_MALFORMED: u8 = 1;
/// Reply code of the chunk dispatcher for a target that takes no chunks.
pub const DISPATCH_NOT_CHUNKED: u8 = 2;

/// What a device function answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceReply {
    Reply { code: u8, payload: Vec<u8> },
    /// Send nothing; the host will time out.
    Silent,
}

impl DeviceReply {
    pub fn ok(payload: impl Into<Vec<u8>>) -> Self {
        DeviceReply::Reply {
            code: 0,
            payload: payload.into(),
        }
    }
}

/// One chunk addressed to a chunked function.
///
/// A request without data and without the last flag asks the device for
/// data; anything else carries host data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkRequest<'a> {
    Write {
        stream_offset: u32,
        is_last: bool,
        data: &'a [u8],
    },
    Read {
        stream_offset: u32,
    },
}

/// The chunked function's answer: its return byte plus any data for a read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkResponse {
    pub ret: u8,
    pub is_last: bool,
    pub data: Vec<u8>,
}

type Handler = Box<dyn FnMut(&[u8]) -> DeviceReply + Send>;
type ChunkHandler = Box<dyn FnMut(ChunkRequest<'_>) -> ChunkResponse + Send>;

enum Entry {
    Mapping,
    Properties,
    Dispatch,
    Call(Handler),
    Chunked(ChunkHandler),
}

/// Emulated device firmware.
pub struct DeviceEmulator {
    names: Vec<String>,
    entries: Vec<Entry>,
    properties: Vec<(String, String)>,
}

impl DeviceEmulator {
    /// An emulator with only the built-in functions.
    pub fn new() -> Self {
        let emulator = Self {
            names: Vec::new(),
            entries: Vec::new(),
            properties: Vec::new(),
        };
        let mut echo_buffer = Vec::new();
        emulator
            .with_entry(GET_MAPPING, Entry::Mapping)
            .with_entry(GET_PROPERTIES, Entry::Properties)
            .with_entry(CHUNK_DISPATCH, Entry::Dispatch)
            .with_function(ECHO, |payload| DeviceReply::ok(payload))
            .with_chunked(ECHO_MANY, move |request| echo_many(&mut echo_buffer, request))
    }

    fn with_entry(mut self, name: &str, entry: Entry) -> Self {
        self.names.push(name.to_string());
        self.entries.push(entry);
        self
    }

    /// Append a single-frame function at the next free offset.
    pub fn with_function(
        self,
        name: &str,
        handler: impl FnMut(&[u8]) -> DeviceReply + Send + 'static,
    ) -> Self {
        self.with_entry(name, Entry::Call(Box::new(handler)))
    }

    /// Append a function reached through the chunk dispatcher.
    pub fn with_chunked(
        self,
        name: &str,
        handler: impl FnMut(ChunkRequest<'_>) -> ChunkResponse + Send + 'static,
    ) -> Self {
        self.with_entry(name, Entry::Chunked(Box::new(handler)))
    }

    pub fn with_property(mut self, key: &str, value: &str) -> Self {
        self.properties.push((key.to_string(), value.to_string()));
        self
    }

    /// Offset of `name` in this emulator's table.
    pub fn offset_of(&self, name: &str) -> Option<u8> {
        self.names
            .iter()
            .position(|n| n == name)
            .and_then(|i| u8::try_from(i).ok())
    }

    /// Answer requests until the host closes the stream.
    pub fn serve<R: Read, W: Write>(&mut self, reader: R, writer: W) -> Result<(), FrameError> {
        let mut reader = FrameReader::new(reader);
        let mut writer = FrameWriter::new(writer);

        loop {
            let request = match reader.read_request() {
                Ok(frame) => frame,
                Err(FrameError::ConnectionClosed) => return Ok(()),
                Err(FrameError::Checksum { seq, .. }) => {
                    warn!(seq, "request failed checksum");
                    writer.write_frame(seq, DEVICE_CHECKSUM, &[])?;
                    continue;
                }
                Err(err) if err.is_framing() => {
                    warn!(error = %err, "dropping malformed request");
                    continue;
                }
                Err(err) => return Err(err),
            };

            trace!(seq = request.seq, offset = request.cmd, len = request.payload.len(), "request");
            match self.dispatch(request.cmd, &request.payload) {
                DeviceReply::Reply { code, payload } => {
                    writer.write_frame(request.seq, code, &payload)?
                }
                DeviceReply::Silent => debug!(seq = request.seq, "staying silent"),
            }
        }
    }

    fn dispatch(&mut self, offset: u8, payload: &[u8]) -> DeviceReply {
        let index = usize::from(offset);
        if matches!(self.entries.get(index), Some(Entry::Dispatch)) {
            return self.dispatch_chunk(payload);
        }
        let Some(entry) = self.entries.get_mut(index) else {
            return DeviceReply::Reply {
                code: OUT_OF_BOUNDS,
                payload: Vec::new(),
            };
        };
        match entry {
            Entry::Mapping => DeviceReply::ok(nul_joined(self.names.iter())),
            Entry::Properties => DeviceReply::ok(nul_joined(
                self.properties.iter().flat_map(|(k, v)| [k, v]),
            )),
            Entry::Call(handler) => handler(payload),
            Entry::Chunked(_) | Entry::Dispatch => DeviceReply::Reply {
                code: DISPATCH_NOT_CHUNKED,
                payload: Vec::new(),
            },
        }
    }

    fn dispatch_chunk(&mut self, payload: &[u8]) -> DeviceReply {
        if payload.len() < CHUNK_HEADER {
            return DeviceReply::Reply {
                code: DISPATCH_MALFORMED,
                payload: Vec::new(),
            };
        }
        let target = payload[0];
        let is_last = payload[1] != 0;
        let stream_offset = read_uint_le(payload, 2, 4);
        let data = &payload[CHUNK_HEADER..];

        let Some(Entry::Chunked(handler)) = self.entries.get_mut(usize::from(target)) else {
            return DeviceReply::Reply {
                code: DISPATCH_NOT_CHUNKED,
                payload: Vec::new(),
            };
        };
        let request = if data.is_empty() && !is_last {
            ChunkRequest::Read { stream_offset }
        } else {
            ChunkRequest::Write {
                stream_offset,
                is_last,
                data,
            }
        };

        let response = handler(request);
        let len = response.data.len().min(CHUNK_PAYLOAD);
        let mut reply = header(response.ret, response.is_last, stream_offset).to_vec();
        reply.extend_from_slice(&response.data[..len]);
        DeviceReply::ok(reply)
    }
}

impl Default for DeviceEmulator {
    fn default() -> Self {
        Self::new()
    }
}

fn nul_joined<'a>(items: impl Iterator<Item = &'a String>) -> Vec<u8> {
    let mut out = Vec::new();
    for item in items {
        out.extend_from_slice(item.as_bytes());
        out.push(0);
    }
    out
}

fn echo_many(buffer: &mut Vec<u8>, request: ChunkRequest<'_>) -> ChunkResponse {
    match request {
        ChunkRequest::Write {
            stream_offset,
            is_last,
            data,
        } => {
            if stream_offset == 0 {
                buffer.clear();
            }
            buffer.extend_from_slice(data);
            ChunkResponse {
                is_last,
                ..ChunkResponse::default()
            }
        }
        ChunkRequest::Read { stream_offset } => {
            let start = (stream_offset as usize).min(buffer.len());
            let end = (start + CHUNK_PAYLOAD).min(buffer.len());
            ChunkResponse {
                ret: 0,
                is_last: end == buffer.len(),
                data: buffer[start..end].to_vec(),
            }
        }
    }
}

/// Builds a fresh emulator for each connection.
pub type EmulatorFactory = Arc<dyn Fn() -> DeviceEmulator + Send + Sync>;

/// A transport whose far end is a [`DeviceEmulator`] on an in-process socket pair.
pub struct LoopbackTransport {
    address: String,
    factory: EmulatorFactory,
    host: Option<UnixStream>,
    device: Option<JoinHandle<()>>,
}

impl LoopbackTransport {
    pub fn new(
        address: impl Into<String>,
        factory: impl Fn() -> DeviceEmulator + Send + Sync + 'static,
    ) -> Self {
        Self {
            address: address.into(),
            factory: Arc::new(factory),
            host: None,
            device: None,
        }
    }
}

impl Transport for LoopbackTransport {
    fn kind(&self) -> &'static str {
        "loopback"
    }

    fn address(&self) -> &str {
        &self.address
    }

    fn open(&mut self) -> mculink_transport::Result<(LinkStream, LinkStream)> {
        self.close();
        let (host, device) = UnixStream::pair()?;
        let device_reader = device.try_clone()?;
        let mut emulator = (self.factory)();
        let handle = thread::Builder::new()
            .name(format!("{}-emulator", self.address))
            .spawn(move || {
                if let Err(err) = emulator.serve(device_reader, device) {
                    debug!(error = %err, "emulator stopped");
                }
            })?;

        let reader = host.try_clone()?;
        let writer = host.try_clone()?;
        self.host = Some(host);
        self.device = Some(handle);
        Ok((LinkStream::from_unix(reader), LinkStream::from_unix(writer)))
    }

    fn close(&mut self) {
        if let Some(host) = self.host.take() {
            let _ = host.shutdown(std::net::Shutdown::Both);
        }
        if let Some(device) = self.device.take() {
            let _ = device.join();
        }
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use mculink_frame::Frame;

    use super::*;

    /// Drive the emulator over a socket pair and return the host side.
    fn spawn(emulator: DeviceEmulator) -> (FrameReader<UnixStream>, FrameWriter<UnixStream>) {
        let (host, device) = UnixStream::pair().unwrap();
        let mut emulator = emulator;
        let device_reader = device.try_clone().unwrap();
        thread::spawn(move || emulator.serve(device_reader, device));
        (
            FrameReader::new(host.try_clone().unwrap()),
            FrameWriter::new(host),
        )
    }

    fn call(
        io: &mut (FrameReader<UnixStream>, FrameWriter<UnixStream>),
        seq: u8,
        offset: u8,
        payload: &[u8],
    ) -> Frame {
        io.1.write_frame(seq, offset, payload).unwrap();
        io.0.read_reply(seq).unwrap()
    }

    #[test]
    fn mapping_lists_builtins_in_order() {
        let mut io = spawn(DeviceEmulator::new().with_function("blink", |_| DeviceReply::ok(Vec::new())));
        let reply = call(&mut io, 0, 0, b"");
        assert_eq!(reply.cmd, 0);
        assert_eq!(
            reply.payload.as_ref(),
            b"a2jGetMapping\0a2jGetProperties\0a2jMany\0a2jEcho\0a2jEchoMany\0blink\0"
        );
    }

    #[test]
    fn properties_and_echo() {
        let emulator = DeviceEmulator::new().with_property("board", "emu");
        assert_eq!(emulator.offset_of(ECHO), Some(3));
        let mut io = spawn(emulator);

        assert_eq!(call(&mut io, 1, 1, b"").payload.as_ref(), b"board\0emu\0");
        assert_eq!(call(&mut io, 2, 3, b"ping").payload.as_ref(), b"ping");
    }

    #[test]
    fn unknown_offset_is_out_of_bounds() {
        let mut io = spawn(DeviceEmulator::new());
        assert_eq!(call(&mut io, 9, 200, b"").cmd, OUT_OF_BOUNDS);
    }

    #[test]
    fn corrupt_request_gets_checksum_reply() {
        let (host, device) = UnixStream::pair().unwrap();
        let device_reader = device.try_clone().unwrap();
        thread::spawn(move || DeviceEmulator::new().serve(device_reader, device));

        let mut raw = host.try_clone().unwrap();
        raw.write_all(&[mculink_frame::SOF, 7, 3, 0, 0xAA]).unwrap();
        let mut reader = FrameReader::new(host);
        let reply = reader.read_reply(7).unwrap();
        assert_eq!(reply.cmd, DEVICE_CHECKSUM);
    }

    #[test]
    fn dispatcher_rejects_bad_chunks() {
        let mut io = spawn(DeviceEmulator::new());
        assert_eq!(call(&mut io, 0, 2, &[4, 0]).cmd, DISPATCH_MALFORMED);
        // a2jEcho is not a chunked function
        assert_eq!(call(&mut io, 1, 2, &header(3, true, 0)).cmd, DISPATCH_NOT_CHUNKED);
        // chunked functions are only reachable through the dispatcher
        assert_eq!(call(&mut io, 2, 4, b"").cmd, DISPATCH_NOT_CHUNKED);
    }

    #[test]
    fn echo_many_stores_and_replays() {
        let mut io = spawn(DeviceEmulator::new());

        let mut first = header(4, false, 0).to_vec();
        first.extend_from_slice(&[1u8; CHUNK_PAYLOAD]);
        assert_eq!(call(&mut io, 0, 2, &first).payload[0], 0);
        let mut last = header(4, true, CHUNK_PAYLOAD as u32).to_vec();
        last.extend_from_slice(&[2u8; 10]);
        assert_eq!(call(&mut io, 1, 2, &last).payload[0], 0);

        let reply = call(&mut io, 2, 2, &header(4, false, 0));
        assert_eq!(reply.payload[1], 0);
        assert_eq!(&reply.payload[CHUNK_HEADER..], &[1u8; CHUNK_PAYLOAD][..]);

        let reply = call(&mut io, 3, 2, &header(4, false, CHUNK_PAYLOAD as u32));
        assert_eq!(reply.payload[1], 1);
        assert_eq!(&reply.payload[CHUNK_HEADER..], &[2u8; 10][..]);
    }

    #[test]
    fn silent_function_sends_nothing() {
        let emulator = DeviceEmulator::new()
            .with_function("mute", |_| DeviceReply::Silent)
            .with_function("loud", |_| DeviceReply::ok(*b"here"));
        let mut io = spawn(emulator);
        io.1.write_frame(0, 5, b"").unwrap();
        let reply = call(&mut io, 1, 6, b"");
        assert_eq!(reply.seq, 1);
        assert_eq!(reply.payload.as_ref(), b"here");
    }

    #[test]
    fn loopback_transport_reopens() {
        let mut transport = LoopbackTransport::new("emu-0", DeviceEmulator::new);
        assert_eq!(transport.kind(), "loopback");
        for _ in 0..2 {
            let (reader, writer) = transport.open().unwrap();
            let mut reader = FrameReader::new(reader);
            let mut writer = FrameWriter::new(writer);
            writer.write_frame(0, 3, b"again").unwrap();
            assert_eq!(reader.read_reply(0).unwrap().payload.as_ref(), b"again");
            transport.close();
        }
    }
}
