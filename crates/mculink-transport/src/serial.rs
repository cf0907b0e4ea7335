use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::{LinkStream, Transport};

/// Line settings for a serial device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialConfig {
    /// Baud rate. Ignored by Bluetooth RFCOMM nodes but required by USB-serial bridges.
    pub baud_rate: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self { baud_rate: 115_200 }
    }
}

/// Serial tty transport (USB CDC-ACM, FTDI bridges, `/dev/rfcomm*` nodes).
///
/// The device is put into raw 8N1 mode on open. Read timeouts are implemented
/// with `poll(2)` so that a blocked reader can be woken periodically.
pub struct SerialPort {
    path: PathBuf,
    address: String,
    config: SerialConfig,
    held: Option<LinkStream>,
}

impl SerialPort {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self::with_config(path, SerialConfig::default())
    }

    pub fn with_config(path: impl AsRef<Path>, config: SerialConfig) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            address: path.display().to_string(),
            path,
            config,
            held: None,
        }
    }

    /// Device node path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Line settings applied on open.
    pub fn config(&self) -> &SerialConfig {
        &self.config
    }
}

impl Transport for SerialPort {
    fn kind(&self) -> &'static str {
        "serial"
    }

    fn address(&self) -> &str {
        &self.address
    }

    fn open(&mut self) -> Result<(LinkStream, LinkStream)> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY)
            .open(&self.path)
            .map_err(|source| TransportError::Open {
                address: self.address.clone(),
                source,
            })?;

        configure_raw(&file, self.config.baud_rate).map_err(|source| {
            TransportError::Configure {
                address: self.address.clone(),
                source,
            }
        })?;

        let writer = LinkStream::from_serial(SerialStream::new(file));
        let reader = writer.try_clone()?;
        self.held = Some(writer.try_clone()?);

        info!(path = ?self.path, baud = self.config.baud_rate, "opened serial device");
        Ok((reader, writer))
    }

    fn close(&mut self) {
        if let Some(stream) = self.held.take() {
            let _ = stream.shutdown();
            debug!(path = ?self.path, "closed serial device");
        }
    }
}

/// A serial device file descriptor with poll-based timeouts.
pub(crate) struct SerialStream {
    file: File,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
}

impl SerialStream {
    fn new(file: File) -> Self {
        Self {
            file,
            read_timeout: None,
            write_timeout: None,
        }
    }

    pub(crate) fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.read_timeout = timeout;
    }

    pub(crate) fn set_write_timeout(&mut self, timeout: Option<Duration>) {
        self.write_timeout = timeout;
    }

    pub(crate) fn try_clone(&self) -> std::io::Result<Self> {
        Ok(Self {
            file: self.file.try_clone()?,
            read_timeout: self.read_timeout,
            write_timeout: self.write_timeout,
        })
    }

    pub(crate) fn discard_input(&self) -> std::io::Result<()> {
        // SAFETY: the descriptor is owned by `self.file` and stays open for the call.
        let rc = unsafe { libc::tcflush(self.file.as_raw_fd(), libc::TCIFLUSH) };
        if rc == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    }

    fn wait_ready(&self, events: libc::c_short, timeout: Duration) -> std::io::Result<()> {
        let mut pfd = libc::pollfd {
            fd: self.file.as_raw_fd(),
            events,
            revents: 0,
        };
        let millis = timeout.as_millis().clamp(1, i32::MAX as u128) as libc::c_int;

        // SAFETY: `pfd` is a valid pollfd for the duration of the call and nfds is 1.
        let rc = unsafe { libc::poll(&mut pfd, 1, millis) };
        match rc {
            0 => Err(std::io::Error::from(ErrorKind::TimedOut)),
            n if n > 0 => Ok(()),
            _ => Err(std::io::Error::last_os_error()),
        }
    }
}

impl Read for SerialStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if let Some(timeout) = self.read_timeout {
            self.wait_ready(libc::POLLIN, timeout)?;
        }
        self.file.read(buf)
    }
}

impl Write for SerialStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Some(timeout) = self.write_timeout {
            self.wait_ready(libc::POLLOUT, timeout)?;
        }
        self.file.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

fn configure_raw(file: &File, baud_rate: u32) -> std::io::Result<()> {
    let speed = baud_constant(baud_rate).ok_or_else(|| {
        std::io::Error::new(
            ErrorKind::InvalidInput,
            format!("unsupported baud rate {baud_rate}"),
        )
    })?;
    let fd = file.as_raw_fd();

    // SAFETY: termios is plain old data; tcgetattr fully initialises it on success.
    let mut tio: libc::termios = unsafe { std::mem::zeroed() };
    // SAFETY: `fd` is an open descriptor owned by `file`, `tio` is a valid pointer.
    if unsafe { libc::tcgetattr(fd, &mut tio) } != 0 {
        return Err(std::io::Error::last_os_error());
    }

    // SAFETY: `tio` was initialised by tcgetattr above.
    unsafe {
        libc::cfmakeraw(&mut tio);
        if libc::cfsetispeed(&mut tio, speed) != 0 || libc::cfsetospeed(&mut tio, speed) != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    tio.c_cflag |= libc::CLOCAL | libc::CREAD;
    tio.c_cc[libc::VMIN] = 1;
    tio.c_cc[libc::VTIME] = 0;

    // SAFETY: `fd` is open and `tio` is a fully initialised termios.
    if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &tio) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

fn baud_constant(baud_rate: u32) -> Option<libc::speed_t> {
    let speed = match baud_rate {
        1_200 => libc::B1200,
        2_400 => libc::B2400,
        4_800 => libc::B4800,
        9_600 => libc::B9600,
        19_200 => libc::B19200,
        38_400 => libc::B38400,
        57_600 => libc::B57600,
        115_200 => libc::B115200,
        230_400 => libc::B230400,
        _ => return None,
    };
    Some(speed)
}
