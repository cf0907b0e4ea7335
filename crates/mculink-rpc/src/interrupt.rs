use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::sync::lock;

/// Shared switchboard between the link worker and the threads that may
/// need to stop it or cancel its current transaction.
#[derive(Debug, Default)]
pub struct WorkerControl {
    shutdown: AtomicBool,
    in_flight: Mutex<InFlight>,
}

#[derive(Debug, Default)]
struct InFlight {
    id: Option<u64>,
    deadline: Option<Instant>,
    cancelled: bool,
}

/// Why a blocked read should give up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Abort {
    Shutdown,
    Cancelled,
    Expired,
}

impl WorkerControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the packet now on the wire and when its reply is due.
    pub fn begin(&self, id: u64, deadline: Option<Instant>) {
        *lock(&self.in_flight) = InFlight {
            id: Some(id),
            deadline,
            cancelled: false,
        };
    }

    /// Clear the in-flight record after the transaction finished.
    pub fn finish(&self) {
        *lock(&self.in_flight) = InFlight::default();
    }

    /// Cancel the transaction for packet `id` if it is the one in flight.
    ///
    /// Returns false when some other packet (or none) is in flight, so a
    /// late cancel never hits a later transaction.
    pub fn cancel(&self, id: u64) -> bool {
        let mut in_flight = lock(&self.in_flight);
        if in_flight.id == Some(id) {
            in_flight.cancelled = true;
            true
        } else {
            false
        }
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn should_abort(&self) -> Option<Abort> {
        if self.is_shutdown() {
            return Some(Abort::Shutdown);
        }
        let in_flight = lock(&self.in_flight);
        if in_flight.cancelled {
            Some(Abort::Cancelled)
        } else if in_flight.deadline.is_some_and(|d| Instant::now() >= d) {
            Some(Abort::Expired)
        } else {
            None
        }
    }
}

/// A reader that waits in short polls so that it can be cancelled.
///
/// The inner stream must have a read timeout; its `WouldBlock`/`TimedOut`
/// results are treated as "nothing yet". Cancellation and shutdown surface as
/// `Interrupted`, an expired reply deadline as `TimedOut`.
pub struct InterruptibleReader<R> {
    inner: R,
    control: Arc<WorkerControl>,
}

impl<R: Read> InterruptibleReader<R> {
    pub fn new(inner: R, control: Arc<WorkerControl>) -> Self {
        Self { inner, control }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for InterruptibleReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        loop {
            match self.control.should_abort() {
                Some(Abort::Shutdown) => {
                    return Err(std::io::Error::new(ErrorKind::Interrupted, "link shutting down"))
                }
                Some(Abort::Cancelled) => {
                    return Err(std::io::Error::new(ErrorKind::Interrupted, "request cancelled"))
                }
                Some(Abort::Expired) => {
                    return Err(std::io::Error::new(ErrorKind::TimedOut, "reply deadline passed"))
                }
                None => {}
            }

            match self.inner.read(buf) {
                Ok(n) => return Ok(n),
                Err(err)
                    if matches!(
                        err.kind(),
                        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                    ) =>
                {
                    continue
                }
                Err(err) => return Err(err),
            }
        }
    }
}
