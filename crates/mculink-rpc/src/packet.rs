use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use mculink_frame::MAX_PAYLOAD;

use crate::error::{LinkError, Result};
use crate::sync::lock;

/// Offset added to the command of a synchronous request until it completes.
pub const PENDING: u16 = 0x100;

static NEXT_PACKET_ID: AtomicU64 = AtomicU64::new(1);

/// A completed device reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Return code sent by the device function.
    pub code: u8,
    pub payload: Bytes,
}

impl Reply {
    pub fn new(code: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            code,
            payload: payload.into(),
        }
    }
}

/// What a packet resolves to.
pub type Outcome = Result<Reply>;

/// Completion callback. Runs on the worker thread before waiters are woken.
pub type Callback = Box<dyn FnOnce(&Outcome) + Send>;

/// One request/reply transaction.
///
/// Created by the caller, completed exactly once by the link worker (or by
/// teardown), then read by the caller and/or its callback.
pub struct Packet {
    id: u64,
    command: u8,
    payload: Bytes,
    timeout: Option<Duration>,
    callback: Mutex<Option<Callback>>,
    state: Mutex<PacketState>,
    done: Condvar,
}

struct PacketState {
    /// Request command, `+ PENDING` while a synchronous caller waits, then the reply code.
    command: u16,
    outcome: Option<Outcome>,
    completed: bool,
    abandoned: bool,
}

impl Packet {
    /// Build a request, rejecting a command or payload that cannot go on the wire.
    pub fn new(command: u16, payload: impl Into<Bytes>) -> Result<Self> {
        let payload = payload.into();
        verify(command, payload.len())?;
        Ok(Self {
            id: NEXT_PACKET_ID.fetch_add(1, Ordering::Relaxed),
            command: command as u8,
            payload,
            timeout: None,
            callback: Mutex::new(None),
            state: Mutex::new(PacketState {
                command,
                outcome: None,
                completed: false,
                abandoned: false,
            }),
            done: Condvar::new(),
        })
    }

    /// Attach a completion callback.
    pub fn with_callback(self, callback: impl FnOnce(&Outcome) + Send + 'static) -> Self {
        *lock(&self.callback) = Some(Box::new(callback));
        self
    }

    /// Bound the worker's wait for the reply. Without it the link's
    /// packet timeout applies.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Reply deadline requested by the caller, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Unique id, used to target cancellation at this packet only.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The function offset this request invokes.
    pub fn command(&self) -> u8 {
        self.command
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Tag the packet as awaited by a synchronous caller.
    pub fn mark_pending(&self) {
        let mut state = lock(&self.state);
        if !state.completed {
            state.command = u16::from(self.command) + PENDING;
        }
    }

    /// True while a synchronous caller is still waiting for the reply.
    pub fn is_pending(&self) -> bool {
        lock(&self.state).command >= PENDING
    }

    pub fn is_completed(&self) -> bool {
        lock(&self.state).completed
    }

    /// True once the synchronous caller gave up on this packet.
    pub fn is_abandoned(&self) -> bool {
        lock(&self.state).abandoned
    }

    /// Current command value: the request offset, the pending tag, or the reply code.
    pub fn current_command(&self) -> u16 {
        lock(&self.state).command
    }

    /// Store the outcome, run the callback, then wake waiters.
    ///
    /// Only the first completion takes effect.
    pub fn complete(&self, outcome: Outcome) {
        if lock(&self.state).completed {
            return;
        }

        let callback = lock(&self.callback).take();
        if let Some(callback) = callback {
            callback(&outcome);
        }

        let mut state = lock(&self.state);
        if state.completed {
            return;
        }
        state.command = match &outcome {
            Ok(reply) => u16::from(reply.code),
            Err(_) => u16::from(self.command),
        };
        state.outcome = Some(outcome);
        state.completed = true;
        drop(state);
        self.done.notify_all();
    }

    /// Wait for completion and take the outcome.
    ///
    /// Returns `None` if `timeout` elapses first; the packet is then marked
    /// abandoned so the worker can skip it if it has not been sent yet.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Outcome> {
        let state = lock(&self.state);
        let (mut state, _) = self
            .done
            .wait_timeout_while(state, timeout, |state| !state.completed)
            .unwrap_or_else(PoisonError::into_inner);

        if !state.completed {
            state.abandoned = true;
            return None;
        }
        state.outcome.take()
    }

    /// Take the outcome of a completed packet without waiting.
    pub fn take_outcome(&self) -> Option<Outcome> {
        lock(&self.state).outcome.take()
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("Packet")
            .field("id", &self.id)
            .field("command", &self.command)
            .field("payload_len", &self.payload.len())
            .field("state_command", &state.command)
            .field("completed", &state.completed)
            .field("abandoned", &state.abandoned)
            .finish()
    }
}

/// Check that a request fits the wire format.
pub fn verify(command: u16, payload_len: usize) -> Result<()> {
    if command > u16::from(u8::MAX) {
        return Err(LinkError::InvalidArgument(format!(
            "command {command} outside 0..=255"
        )));
    }
    if payload_len > MAX_PAYLOAD {
        return Err(LinkError::InvalidArgument(format!(
            "payload of {payload_len} bytes exceeds {MAX_PAYLOAD}"
        )));
    }
    Ok(())
}
