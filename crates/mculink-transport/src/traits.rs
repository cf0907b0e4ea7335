use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;
#[cfg(unix)]
use crate::serial::SerialStream;

/// The external collaborator that owns the physical link to one device.
///
/// A session calls [`Transport::open`] once per connection attempt and
/// [`Transport::close`] when the connection is torn down. The two returned
/// streams are moved into the link worker; `close` must release whatever the
/// transport still holds and should unblock a reader stuck on the old streams
/// where the platform allows it.
pub trait Transport: Send {
    /// Short identifier of the transport kind, e.g. `"serial"`.
    fn kind(&self) -> &'static str;

    /// Unique address of the device behind this transport.
    fn address(&self) -> &str;

    /// Open the link and return `(reader, writer)`.
    fn open(&mut self) -> Result<(LinkStream, LinkStream)>;

    /// Release the link. Must be safe to call when not open.
    fn close(&mut self);
}

/// A connected byte stream to a device: implements Read + Write.
///
/// This is the I/O type returned by [`Transport::open`]. On Unix it wraps
/// either a Unix domain socket or a serial device file descriptor.
pub struct LinkStream {
    inner: LinkStreamInner,
}

enum LinkStreamInner {
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
    #[cfg(unix)]
    Serial(SerialStream),
}

impl Read for LinkStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => stream.read(buf),
            #[cfg(unix)]
            LinkStreamInner::Serial(stream) => stream.read(buf),
        }
    }
}

impl Write for LinkStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => stream.write(buf),
            #[cfg(unix)]
            LinkStreamInner::Serial(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => stream.flush(),
            #[cfg(unix)]
            LinkStreamInner::Serial(stream) => stream.flush(),
        }
    }
}

impl LinkStream {
    /// Wrap a connected Unix domain socket.
    #[cfg(unix)]
    pub fn from_unix(stream: std::os::unix::net::UnixStream) -> Self {
        Self {
            inner: LinkStreamInner::Unix(stream),
        }
    }

    #[cfg(unix)]
    pub(crate) fn from_serial(stream: SerialStream) -> Self {
        Self {
            inner: LinkStreamInner::Serial(stream),
        }
    }

    /// Set read timeout on the underlying stream.
    ///
    /// A timed-out read surfaces as `WouldBlock` or `TimedOut`.
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        match &mut self.inner {
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
            #[cfg(unix)]
            LinkStreamInner::Serial(stream) => {
                stream.set_read_timeout(timeout);
                Ok(())
            }
        }
    }

    /// Set write timeout on the underlying stream.
    pub fn set_write_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        match &mut self.inner {
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
            #[cfg(unix)]
            LinkStreamInner::Serial(stream) => {
                stream.set_write_timeout(timeout);
                Ok(())
            }
        }
    }

    /// Try to clone this stream (creates a new file descriptor).
    pub fn try_clone(&self) -> Result<Self> {
        match &self.inner {
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => Ok(Self::from_unix(stream.try_clone()?)),
            #[cfg(unix)]
            LinkStreamInner::Serial(stream) => Ok(Self::from_serial(stream.try_clone()?)),
        }
    }

    /// Shut the stream down so that blocked readers on any clone return.
    ///
    /// Serial devices have no half-close; pending input is discarded instead.
    pub fn shutdown(&self) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => match stream.shutdown(std::net::Shutdown::Both) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotConnected => Ok(()),
                Err(err) => Err(err.into()),
            },
            #[cfg(unix)]
            LinkStreamInner::Serial(stream) => stream.discard_input().map_err(Into::into),
        }
    }
}

impl std::fmt::Debug for LinkStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            #[cfg(unix)]
            LinkStreamInner::Unix(_) => f.debug_struct("LinkStream").field("type", &"unix").finish(),
            #[cfg(unix)]
            LinkStreamInner::Serial(_) => {
                f.debug_struct("LinkStream").field("type", &"serial").finish()
            }
        }
    }
}
