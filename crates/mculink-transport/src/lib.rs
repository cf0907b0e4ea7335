//! Byte-stream transports for microcontroller links.
//!
//! A transport is the external collaborator of a link session: it knows how
//! to open a readable and a writable byte stream to one device and how to
//! release it again. Nothing above this layer cares whether the bytes travel
//! over a serial tty, a Bluetooth RFCOMM device node or a Unix socket.
//!
//! - [`LinkStream`]: the concrete Read + Write stream handed to the framing layer
//! - [`Transport`]: `open()` / `close()` contract
//! - [`TransportRegistry`]: explicit mapping from a transport kind to its factory

pub mod error;
pub mod registry;
pub mod traits;

#[cfg(unix)]
pub mod serial;
#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use registry::{TransportFactory, TransportRegistry};
pub use traits::{LinkStream, Transport};

#[cfg(unix)]
pub use serial::{SerialConfig, SerialPort};
#[cfg(unix)]
pub use uds::{UnixSocketListener, UnixSocketTransport};
