use std::io::ErrorKind;
use std::time::Duration;

use mculink_frame::FrameError;

/// Errors that can occur in link operations.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Transport-level error while opening or using the link.
    #[error("transport error: {0}")]
    Transport(#[from] mculink_transport::TransportError),

    /// Frame-level error (corrupt frame or stream failure).
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Request timed out locally.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The device gave up receiving the request.
    #[error("device receive timeout (firmware line {line})")]
    DeviceTimeout { line: u16 },

    /// The function offset is outside the device's table.
    #[error("function offset out of bounds")]
    OutOfBounds,

    /// The device saw a checksum mismatch on the request.
    #[error("device reported a checksum mismatch")]
    DeviceChecksum,

    /// Other device-reported failure.
    #[error("device error: {0}")]
    Device(String),

    /// The link was torn down before the request completed.
    #[error("link closed")]
    LinkClosed,

    /// The request was rejected before it was queued.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The session is not connected.
    #[error("not connected")]
    NotConnected,

    /// The function name is not in the function table.
    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    /// JSON error while loading a function mapping.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LinkError {
    /// True for local timeouts and interrupted or timed-out I/O.
    pub fn is_transient(&self) -> bool {
        match self {
            LinkError::Timeout(_) => true,
            LinkError::Frame(FrameError::Io(err)) => is_transient_io(err.kind()),
            LinkError::Transport(mculink_transport::TransportError::Io(err)) => {
                is_transient_io(err.kind())
            }
            _ => false,
        }
    }
}

fn is_transient_io(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::Interrupted | ErrorKind::TimedOut | ErrorKind::WouldBlock
    )
}

pub type Result<T> = std::result::Result<T, LinkError>;
