use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use bytes::Bytes;
use mculink_transport::{LinkStream, Transport, TransportError};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::activity::{Activity, Observers};
use crate::chunked::{self, ChunkCaller};
use crate::config::LinkConfig;
use crate::error::{LinkError, Result};
use crate::functions::{FunctionMap, CHUNK_DISPATCH, GET_PROPERTIES, MAPPING_OFFSET};
use crate::interrupt::WorkerControl;
use crate::packet::{self, Outcome, Packet, Reply};
use crate::properties::PropertyMap;
use crate::queue::RequestQueue;
use crate::sync::lock;
use crate::worker::{LinkWorker, WorkerExit};

/// Connection state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// A link to one device.
///
/// Cheap to clone; all clones share the same connection. Requests from any
/// number of threads are queued and served strictly in order by a single
/// worker thread that owns the streams.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    address: String,
    name: String,
    config: LinkConfig,
    transport: Mutex<Box<dyn Transport>>,
    state: Mutex<SessionState>,
    link: Mutex<Option<LinkHandle>>,
    functions: ArcSwap<FunctionMap>,
    properties: PropertyMap,
    observers: Observers,
}

struct LinkHandle {
    queue: Arc<RequestQueue<Arc<Packet>>>,
    control: Arc<WorkerControl>,
    thread: JoinHandle<()>,
}

impl Session {
    /// Create a disconnected session over `transport`.
    pub fn new(transport: Box<dyn Transport>, config: LinkConfig) -> Self {
        let address = transport.address().to_string();
        Self::with_name(transport, config, address)
    }

    /// Like [`Session::new`] with a human-readable name.
    pub fn with_name(
        transport: Box<dyn Transport>,
        config: LinkConfig,
        name: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                address: transport.address().to_string(),
                name: name.into(),
                config,
                transport: Mutex::new(transport),
                state: Mutex::new(SessionState::Disconnected),
                link: Mutex::new(None),
                functions: ArcSwap::from_pointee(FunctionMap::fetched()),
                properties: PropertyMap::new(),
                observers: Observers::new(),
            }),
        }
    }

    /// Unique address of the device.
    pub fn address(&self) -> &str {
        &self.inner.address
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &LinkConfig {
        &self.inner.config
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.inner.state)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Register an activity observer. Observers run in registration order on
    /// the thread that caused the activity.
    pub fn add_observer(&self, observer: impl Fn(Activity) + Send + Sync + 'static) {
        self.inner.observers.add(observer);
    }

    /// Function table of the current connection.
    pub fn functions(&self) -> Arc<FunctionMap> {
        self.inner.functions.load_full()
    }

    pub fn properties(&self) -> &PropertyMap {
        &self.inner.properties
    }

    /// Open the link, start the worker and fetch the device tables.
    ///
    /// With `fixed_mapping` the function table is taken as given instead of
    /// being fetched. Returns `Ok(false)` if the session was not disconnected.
    /// On any failure the session is torn down again and the error returned.
    pub fn connect(&self, fixed_mapping: Option<HashMap<String, u8>>) -> Result<bool> {
        {
            let mut state = lock(&self.inner.state);
            if *state != SessionState::Disconnected {
                return Ok(false);
            }
            *state = SessionState::Connecting;
        }

        let functions = match fixed_mapping.map(FunctionMap::fixed).transpose() {
            Ok(functions) => functions.unwrap_or_else(FunctionMap::fetched),
            Err(err) => {
                *lock(&self.inner.state) = SessionState::Disconnected;
                return Err(err);
            }
        };
        self.inner.functions.store(Arc::new(functions));

        info!(address = %self.inner.address, "connecting");
        if let Err(err) = self.establish() {
            warn!(address = %self.inner.address, error = %err, "connect failed");
            self.disconnect();
            return Err(err);
        }

        {
            let mut state = lock(&self.inner.state);
            if *state != SessionState::Connecting {
                return Err(LinkError::LinkClosed);
            }
            *state = SessionState::Connected;
        }
        info!(
            address = %self.inner.address,
            functions = self.inner.functions.load().len(),
            properties = self.inner.properties.len(),
            "connected"
        );
        self.inner.observers.notify(Activity::Connected);
        Ok(true)
    }

    fn establish(&self) -> Result<()> {
        let config = &self.inner.config;
        let deadline = Instant::now() + config.connect_timeout;

        self.inner.observers.notify(Activity::Active);
        let opened = lock(&self.inner.transport).open();
        self.inner.observers.notify(Activity::Inactive);
        let (mut reader, mut writer) = opened?;

        reader.set_read_timeout(Some(config.poll_interval))?;
        writer.set_write_timeout(config.write_timeout)?;
        self.start_worker(reader, writer)?;
        self.fetch_tables(deadline)
    }

    fn start_worker(&self, reader: LinkStream, writer: LinkStream) -> Result<()> {
        let config = &self.inner.config;
        let queue = Arc::new(RequestQueue::new(config.queue_capacity));
        let control = Arc::new(WorkerControl::new());
        let worker = LinkWorker::new(
            Arc::clone(&queue),
            Arc::clone(&control),
            reader,
            writer,
            self.inner.observers.clone(),
            config.packet_timeout,
        );

        let session: Weak<SessionInner> = Arc::downgrade(&self.inner);
        let thread = thread::Builder::new()
            .name(format!("{}-worker", self.inner.address))
            .spawn(move || {
                if let WorkerExit::Fatal(reason) = worker.run() {
                    if let Some(inner) = session.upgrade() {
                        warn!(address = %inner.address, %reason, "link lost");
                        Session { inner }.disconnect();
                    }
                }
            })
            .map_err(TransportError::from)?;

        *lock(&self.inner.link) = Some(LinkHandle {
            queue,
            control,
            thread,
        });
        Ok(())
    }

    fn fetch_tables(&self, deadline: Instant) -> Result<()> {
        let attempts = self.inner.config.connect_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.fetch_once(deadline) {
                Ok(()) => return Ok(()),
                Err(err) if err.is_transient() && attempt < attempts => {
                    warn!(attempt, error = %err, "table fetch failed; retrying");
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn fetch_once(&self, deadline: Instant) -> Result<()> {
        let functions = self.inner.functions.load_full();
        if !functions.is_fixed() {
            let reply = self.transact(MAPPING_OFFSET, Bytes::new(), self.remaining(deadline)?)?;
            functions.install(FunctionMap::parse_name_table(&reply.payload));
            debug!(count = functions.len(), "function table fetched");
        }

        match functions.get(GET_PROPERTIES) {
            Some(offset) => {
                let reply = self.transact(offset, Bytes::new(), self.remaining(deadline)?)?;
                self.inner
                    .properties
                    .install(PropertyMap::parse_pairs(&reply.payload));
                debug!(count = self.inner.properties.len(), "properties fetched");
            }
            None => debug!("device has no property function"),
        }
        Ok(())
    }

    /// Time left of the connect budget.
    fn remaining(&self, deadline: Instant) -> Result<Duration> {
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            Err(LinkError::Timeout(self.inner.config.connect_timeout))
        } else {
            Ok(left)
        }
    }

    /// Stop the worker, close the transport and clear the tables.
    ///
    /// Idempotent. Safe to call from an observer or callback running on the
    /// worker thread; the worker is then not joined.
    pub fn disconnect(&self) {
        let previous = std::mem::replace(&mut *lock(&self.inner.state), SessionState::Disconnected);
        self.inner.release_link();
        lock(&self.inner.transport).close();
        self.inner.functions.load().clear();
        self.inner.properties.clear();

        if previous != SessionState::Disconnected {
            info!(address = %self.inner.address, "disconnected");
            self.inner.observers.notify(Activity::Disconnected);
        }
    }

    /// Check a request before it is queued.
    pub fn verify(&self, command: u16, payload_len: usize) -> Result<()> {
        packet::verify(command, payload_len)?;
        if self.state() == SessionState::Disconnected {
            return Err(LinkError::NotConnected);
        }
        Ok(())
    }

    /// Call device function `function` and wait for the reply.
    pub fn call(&self, function: &str, payload: impl Into<Bytes>) -> Result<Reply> {
        self.call_with_timeout(function, payload, self.inner.config.packet_timeout)
    }

    /// Like [`Session::call`] with an explicit wait. A zero timeout fails at once.
    pub fn call_with_timeout(
        &self,
        function: &str,
        payload: impl Into<Bytes>,
        timeout: Duration,
    ) -> Result<Reply> {
        let offset = self.functions().resolve(function)?;
        self.call_offset_with_timeout(u16::from(offset), payload, timeout)
    }

    /// Call by raw function offset.
    pub fn call_offset(&self, command: u16, payload: impl Into<Bytes>) -> Result<Reply> {
        self.call_offset_with_timeout(command, payload, self.inner.config.packet_timeout)
    }

    pub fn call_offset_with_timeout(
        &self,
        command: u16,
        payload: impl Into<Bytes>,
        timeout: Duration,
    ) -> Result<Reply> {
        let payload = payload.into();
        self.verify(command, payload.len())?;
        // `verify` bounds the command to one byte.
        self.transact(command as u8, payload, timeout)
    }

    /// Queue a call without waiting. The outcome reaches only `callback`,
    /// which runs on the worker thread.
    pub fn call_async(
        &self,
        function: &str,
        payload: impl Into<Bytes>,
        callback: impl FnOnce(&Outcome) + Send + 'static,
    ) -> Result<()> {
        let offset = self.functions().resolve(function)?;
        let payload = payload.into();
        self.verify(u16::from(offset), payload.len())?;

        let packet = Packet::new(u16::from(offset), payload)?.with_callback(callback);
        let (queue, _) = self.link_parts()?;
        queue.put(Arc::new(packet))
    }

    /// Send a payload of any size to `function` through the chunk dispatcher.
    ///
    /// See [`chunked::send_long`] for the return value.
    pub fn send_long(&self, function: &str, data: &[u8]) -> Result<i32> {
        let target = self.functions().resolve(function)?;
        chunked::send_long(&self.chunk_link()?, target, data)
    }

    /// Receive a payload of any size from `function` through the chunk dispatcher.
    pub fn receive_long(&self, function: &str) -> Result<Vec<u8>> {
        let target = self.functions().resolve(function)?;
        chunked::receive_long(&self.chunk_link()?, target)
    }

    fn chunk_link(&self) -> Result<ChunkLink<'_>> {
        if self.state() == SessionState::Disconnected {
            return Err(LinkError::NotConnected);
        }
        Ok(ChunkLink {
            session: self,
            dispatcher: self.functions().resolve(CHUNK_DISPATCH)?,
        })
    }

    fn link_parts(&self) -> Result<(Arc<RequestQueue<Arc<Packet>>>, Arc<WorkerControl>)> {
        lock(&self.inner.link)
            .as_ref()
            .map(|link| (Arc::clone(&link.queue), Arc::clone(&link.control)))
            .ok_or(LinkError::NotConnected)
    }

    /// Queue one synchronous request and wait for its outcome.
    fn transact(&self, command: u8, payload: Bytes, timeout: Duration) -> Result<Reply> {
        if timeout.is_zero() {
            return Err(LinkError::Timeout(timeout));
        }
        let (queue, control) = self.link_parts()?;
        let packet = Arc::new(Packet::new(u16::from(command), payload)?.with_timeout(timeout));
        packet.mark_pending();
        queue.put(Arc::clone(&packet))?;

        match packet.wait_timeout(timeout) {
            Some(outcome) => outcome,
            None => {
                if control.cancel(packet.id()) {
                    debug!(id = packet.id(), "interrupted in-flight request");
                }
                Err(LinkError::Timeout(timeout))
            }
        }
    }
}

impl SessionInner {
    fn release_link(&self) {
        let Some(link) = lock(&self.link).take() else {
            return;
        };
        link.control.request_shutdown();
        link.queue.wake_consumers();

        if link.thread.thread().id() != thread::current().id() && link.thread.join().is_err() {
            warn!(address = %self.address, "link worker panicked");
        }
        for packet in link.queue.disable() {
            packet.complete(Err(LinkError::LinkClosed));
        }
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if let Some(link) = lock(&self.link).take() {
            link.control.request_shutdown();
            link.queue.wake_consumers();
        }
        lock(&self.transport).close();
    }
}

struct ChunkLink<'a> {
    session: &'a Session,
    dispatcher: u8,
}

impl ChunkCaller for ChunkLink<'_> {
    fn call_chunk(&self, request: Bytes) -> Result<Reply> {
        self.session.transact(
            self.dispatcher,
            request,
            self.session.inner.config.packet_timeout,
        )
    }
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        self.inner.address == other.inner.address
    }
}

impl Eq for Session {}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("address", &self.inner.address)
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;
    use crate::emulator::{DeviceEmulator, DeviceReply, LoopbackTransport, ECHO, ECHO_MANY};

    fn session_with(factory: impl Fn() -> DeviceEmulator + Send + Sync + 'static) -> Session {
        let transport = LoopbackTransport::new("emu-test", factory);
        Session::new(
            Box::new(transport),
            LinkConfig::default().with_packet_timeout(Duration::from_millis(500)),
        )
    }

    fn connected() -> Session {
        let session = session_with(|| DeviceEmulator::new().with_property("board", "emu"));
        assert!(session.connect(None).unwrap());
        session
    }

    #[test]
    fn connect_fetches_tables() {
        let session = connected();
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(session.functions().lookup(ECHO), 3);
        assert_eq!(session.properties().get("board").as_deref(), Some("emu"));
        assert!(!session.connect(None).unwrap(), "second connect is a no-op");
        session.disconnect();
    }

    #[test]
    fn observers_see_lifecycle() {
        let session = session_with(DeviceEmulator::new);
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            session.add_observer(move |a| seen.lock().unwrap().push(a));
        }

        session.connect(None).unwrap();
        session.disconnect();
        session.disconnect();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.first(), Some(&Activity::Active));
        assert_eq!(seen.get(1), Some(&Activity::Inactive));
        assert!(seen.contains(&Activity::Connected));
        assert_eq!(seen.last(), Some(&Activity::Disconnected));
        assert_eq!(seen.iter().filter(|a| **a == Activity::Disconnected).count(), 1);
    }

    #[test]
    fn call_by_name_and_offset() {
        let session = connected();
        let reply = session.call(ECHO, &b"hello"[..]).unwrap();
        assert_eq!(reply.code, 0);
        assert_eq!(reply.payload.as_ref(), b"hello");

        let reply = session.call_offset(3, Bytes::from_static(b"raw")).unwrap();
        assert_eq!(reply.payload.as_ref(), b"raw");
        session.disconnect();
    }

    #[test]
    fn verify_rejects_bad_requests() {
        let session = connected();
        assert!(matches!(
            session.call_offset(256, Bytes::new()),
            Err(LinkError::InvalidArgument(_))
        ));
        assert!(matches!(
            session.call(ECHO, vec![0u8; 256]),
            Err(LinkError::InvalidArgument(_))
        ));
        assert!(matches!(
            session.call("missing", Bytes::new()),
            Err(LinkError::UnknownFunction(_))
        ));
        assert!(matches!(
            session.call_offset(200, Bytes::new()),
            Err(LinkError::OutOfBounds)
        ));
        session.disconnect();
        assert!(matches!(session.verify(1, 0), Err(LinkError::NotConnected)));
        assert!(matches!(
            session.call_offset(3, Bytes::new()),
            Err(LinkError::NotConnected)
        ));
    }

    #[test]
    fn zero_timeout_fails_immediately() {
        let session = connected();
        assert!(matches!(
            session.call_with_timeout(ECHO, Bytes::new(), Duration::ZERO),
            Err(LinkError::Timeout(_))
        ));
        session.disconnect();
    }

    #[test]
    fn silent_device_times_out_and_link_survives() {
        let session = session_with(|| {
            DeviceEmulator::new().with_function("mute", |_| DeviceReply::Silent)
        });
        session.connect(None).unwrap();

        let err = session
            .call_with_timeout("mute", Bytes::new(), Duration::from_millis(50))
            .unwrap_err();
        assert!(matches!(err, LinkError::Timeout(_)));

        let reply = session.call(ECHO, &b"still here"[..]).unwrap();
        assert_eq!(reply.payload.as_ref(), b"still here");
        session.disconnect();
    }

    #[test]
    fn caller_timeout_outlasts_packet_timeout() {
        let transport = LoopbackTransport::new("emu-slow", || {
            DeviceEmulator::new().with_function("slow", |payload| {
                thread::sleep(Duration::from_millis(300));
                DeviceReply::ok(payload)
            })
        });
        let session = Session::new(
            Box::new(transport),
            LinkConfig::default().with_packet_timeout(Duration::from_millis(100)),
        );
        session.connect(None).unwrap();

        let reply = session
            .call_with_timeout("slow", &b"x"[..], Duration::from_secs(3))
            .unwrap();
        assert_eq!(reply.payload.as_ref(), b"x");

        let err = session
            .call_with_timeout("slow", &b"y"[..], Duration::from_millis(150))
            .unwrap_err();
        assert!(matches!(err, LinkError::Timeout(t) if t == Duration::from_millis(150)));
        session.disconnect();
    }

    #[test]
    fn concurrent_callers_get_their_own_replies() {
        let session = connected();
        let callers: Vec<_> = (0..16u8)
            .map(|i| {
                let session = session.clone();
                thread::spawn(move || {
                    let payload = vec![i; usize::from(i) + 1];
                    let reply = session
                        .call_with_timeout(ECHO, payload.clone(), Duration::from_secs(5))
                        .unwrap();
                    (payload, reply.payload.to_vec())
                })
            })
            .collect();

        for caller in callers {
            let (sent, received) = caller.join().unwrap();
            assert_eq!(sent, received);
        }
        session.disconnect();
    }

    #[test]
    fn async_call_reports_via_callback() {
        let session = connected();
        let (tx, rx) = mpsc::channel();
        session
            .call_async(ECHO, &b"later"[..], move |outcome| {
                let payload = outcome.as_ref().map(|r| r.payload.clone()).ok();
                tx.send(payload).unwrap();
            })
            .unwrap();

        let payload = rx.recv_timeout(Duration::from_secs(2)).unwrap().unwrap();
        assert_eq!(payload.as_ref(), b"later");
        session.disconnect();
    }

    #[test]
    fn chunked_echo_round_trip() {
        let session = connected();
        let data: Vec<u8> = (0..1000u32).map(|i| (i * 7) as u8).collect();

        assert_eq!(session.send_long(ECHO_MANY, &data).unwrap(), 0);
        assert_eq!(session.receive_long(ECHO_MANY).unwrap(), data);

        assert_eq!(session.send_long(ECHO_MANY, &[]).unwrap(), 0);
        assert!(session.receive_long(ECHO_MANY).unwrap().is_empty());
        session.disconnect();
    }

    #[test]
    fn fixed_mapping_skips_fetch() {
        let session = session_with(|| {
            DeviceEmulator::new().with_function("blink", |_| DeviceReply::ok(Vec::new()))
        });

        let mapping = HashMap::from([("echo".to_string(), 3u8)]);
        assert!(session.connect(Some(mapping)).unwrap());
        assert!(session.functions().is_fixed());
        assert!(!session.functions().contains(ECHO));
        assert!(session.properties().is_empty());
        assert_eq!(session.call("echo", &b"x"[..]).unwrap().payload.as_ref(), b"x");
        session.disconnect();

        assert!(session.connect(None).unwrap());
        assert!(!session.functions().is_fixed());
        assert_eq!(session.functions().lookup("blink"), 5);
        session.disconnect();
    }

    #[test]
    fn oversized_fixed_mapping_is_rejected() {
        let session = session_with(DeviceEmulator::new);
        let mapping: HashMap<String, u8> = (0..300).map(|i| (format!("f{i}"), 0u8)).collect();
        assert!(matches!(
            session.connect(Some(mapping)),
            Err(LinkError::InvalidArgument(_))
        ));
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[test]
    fn connect_times_out_against_silent_device() {
        let session = Session::new(
            Box::new(SilentTransport::default()),
            LinkConfig::default().with_connect_timeout(Duration::from_millis(100)),
        );
        let started = Instant::now();
        let err = session.connect(None).unwrap_err();
        assert!(err.is_transient(), "{err}");
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[test]
    fn disconnect_fails_waiting_callers() {
        let session = session_with(|| {
            DeviceEmulator::new().with_function("mute", |_| DeviceReply::Silent)
        });
        session.connect(None).unwrap();

        let caller = {
            let session = session.clone();
            thread::spawn(move || session.call_with_timeout("mute", Bytes::new(), Duration::from_secs(10)))
        };
        thread::sleep(Duration::from_millis(50));
        session.disconnect();

        let result = caller.join().unwrap();
        assert!(matches!(result, Err(LinkError::LinkClosed)), "{result:?}");
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(session.functions().is_empty());
    }

    #[test]
    fn device_loss_tears_session_down() {
        let session = session_with(|| {
            DeviceEmulator::new().with_function("crash", |_| panic!("firmware crashed"))
        });
        let (tx, rx) = mpsc::channel();
        session.add_observer(move |a| {
            if a == Activity::Disconnected {
                let _ = tx.send(());
            }
        });
        session.connect(None).unwrap();

        let result = session.call("crash", Bytes::new());
        assert!(result.is_err());
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(matches!(session.call(ECHO, Bytes::new()), Err(LinkError::UnknownFunction(_) | LinkError::NotConnected)));
    }

    #[test]
    fn sessions_compare_by_address() {
        let a = session_with(DeviceEmulator::new);
        let b = Session::with_name(
            Box::new(LoopbackTransport::new("emu-test", DeviceEmulator::new)),
            LinkConfig::default(),
            "bench board",
        );
        assert_eq!(a, b);
        assert_eq!(b.name(), "bench board");
        assert_eq!(a.name(), a.address());
    }

    /// Opens a socket pair whose far end never answers.
    #[derive(Default)]
    struct SilentTransport {
        peer: Option<std::os::unix::net::UnixStream>,
    }

    impl Transport for SilentTransport {
        fn kind(&self) -> &'static str {
            "silent"
        }

        fn address(&self) -> &str {
            "silent"
        }

        fn open(&mut self) -> mculink_transport::Result<(LinkStream, LinkStream)> {
            let (host, peer) = std::os::unix::net::UnixStream::pair()?;
            self.peer = Some(peer);
            Ok((
                LinkStream::from_unix(host.try_clone()?),
                LinkStream::from_unix(host),
            ))
        }

        fn close(&mut self) {
            self.peer = None;
        }
    }
}
