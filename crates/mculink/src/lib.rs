//! Host-side RPC to microcontrollers over serial and socket links.
//!
//! # Crate Structure
//!
//! - [`transport`]: byte-stream transports (serial tty, Unix socket) and their registry
//! - [`frame`]: SOF/ESC framing with an XOR checksum
//! - [`rpc`]: sessions, function and property tables, chunked transfer, device emulator

/// Re-export transport types.
pub mod transport {
    pub use mculink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use mculink_frame::*;
}

/// Re-export session types.
pub mod rpc {
    pub use mculink_rpc::*;
}

pub use mculink_rpc::{LinkConfig, LinkError, Reply, Session, SessionState};
