//! Request/reply sessions with a microcontroller.
//!
//! A [`Session`] owns one link. Callers on any thread invoke device functions
//! by name; requests are queued and a per-link worker thread runs them one at
//! a time, matching each reply to its request by sequence number.
//!
//! - [`Session`]: connect, call, chunked transfer, disconnect
//! - [`FunctionMap`] / [`PropertyMap`]: tables fetched from the device on connect
//! - [`chunked`]: transfers larger than one frame
//! - [`DeviceEmulator`]: the device side, for tests and demos

pub mod activity;
pub mod chunked;
pub mod config;
#[cfg(unix)]
pub mod emulator;
pub mod error;
pub mod functions;
pub mod interrupt;
pub mod packet;
pub mod properties;
pub mod queue;
pub mod session;
mod sync;
pub mod worker;

pub use activity::{Activity, Observer, Observers};
pub use chunked::{receive_long, send_long, Chunk, ChunkAssembler, ChunkCaller, ChunkPlan, Received};
pub use config::{
    LinkConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_PACKET_TIMEOUT, DEFAULT_QUEUE_CAPACITY,
};
#[cfg(unix)]
pub use emulator::{ChunkRequest, ChunkResponse, DeviceEmulator, DeviceReply, LoopbackTransport};
pub use error::{LinkError, Result};
pub use functions::{
    FunctionMap, FunctionTable, CHUNK_DISPATCH, GET_PROPERTIES, MAPPING_OFFSET, MAX_FUNCTIONS,
};
pub use interrupt::{InterruptibleReader, WorkerControl};
pub use packet::{Callback, Outcome, Packet, Reply, PENDING};
pub use properties::PropertyMap;
pub use queue::RequestQueue;
pub use session::{Session, SessionState};
pub use worker::{LinkWorker, WorkerExit};
