//! Reply command codes with special meaning.

/// The requested function offset is outside the device's table.
pub const OUT_OF_BOUNDS: u8 = 0xF0;

/// The device timed out receiving the request. The payload carries the
/// firmware source line as a 2-byte big-endian number.
pub const DEVICE_TIMEOUT: u8 = 0xF2;

/// The device saw a checksum mismatch on the request.
pub const DEVICE_CHECKSUM: u8 = 0xF3;

/// Classification of a reply's command byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStatus {
    /// Normal return code.
    Ok(u8),
    OutOfBounds,
    /// `line` is 0 when the device sent no diagnostic payload.
    DeviceTimeout { line: u16 },
    DeviceChecksum,
}

impl ReplyStatus {
    pub fn classify(cmd: u8, payload: &[u8]) -> Self {
        match cmd {
            OUT_OF_BOUNDS => ReplyStatus::OutOfBounds,
            DEVICE_TIMEOUT => {
                let line = match payload {
                    [hi, lo, ..] => u16::from_be_bytes([*hi, *lo]),
                    _ => 0,
                };
                ReplyStatus::DeviceTimeout { line }
            }
            DEVICE_CHECKSUM => ReplyStatus::DeviceChecksum,
            code => ReplyStatus::Ok(code),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ReplyStatus::Ok(_))
    }
}
