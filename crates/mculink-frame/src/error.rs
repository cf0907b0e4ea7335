/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The received checksum does not match the frame contents.
    #[error("checksum mismatch in frame {seq} (expected {expected:#04x}, got {actual:#04x})")]
    Checksum { seq: u8, expected: u8, actual: u8 },

    /// A raw start-of-frame byte appeared where a data byte was expected.
    #[error("unescaped start-of-frame inside a frame")]
    UnescapedDelimiter,

    /// The payload exceeds what the one-byte length field can express.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

impl FrameError {
    /// True for corruption on the wire, as opposed to stream failures.
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            FrameError::Checksum { .. } | FrameError::UnescapedDelimiter
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
