use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mculink_frame::{Frame, FrameError, FrameReader, FrameWriter, ReplyStatus};
use tracing::{debug, trace, warn};

use crate::activity::{Activity, Observers};
use crate::error::LinkError;
use crate::interrupt::{InterruptibleReader, WorkerControl};
use crate::packet::{Outcome, Packet, Reply};
use crate::queue::RequestQueue;

/// Why the worker loop ended.
#[derive(Debug)]
pub enum WorkerExit {
    /// Shutdown was requested.
    Shutdown,
    /// The link failed; the session must be torn down.
    Fatal(String),
}

/// What a single transaction left behind.
enum Step {
    Done(Outcome),
    Shutdown,
    Fatal(LinkError),
}

/// Owns the link streams and performs one transaction at a time.
pub struct LinkWorker<R, W> {
    queue: Arc<RequestQueue<Arc<Packet>>>,
    control: Arc<WorkerControl>,
    reader: FrameReader<InterruptibleReader<R>>,
    writer: FrameWriter<W>,
    observers: Observers,
    packet_timeout: Duration,
    seq: u8,
}

impl<R: Read, W: Write> LinkWorker<R, W> {
    /// `reader` must have a short read timeout so the worker can notice
    /// cancellation; see [`InterruptibleReader`].
    pub fn new(
        queue: Arc<RequestQueue<Arc<Packet>>>,
        control: Arc<WorkerControl>,
        reader: R,
        writer: W,
        observers: Observers,
        packet_timeout: Duration,
    ) -> Self {
        let reader = FrameReader::new(InterruptibleReader::new(reader, Arc::clone(&control)));
        Self {
            queue,
            control,
            reader,
            writer: FrameWriter::new(writer),
            observers,
            packet_timeout,
            seq: 0,
        }
    }

    /// Serve the queue until shutdown or a fatal link error.
    ///
    /// On return the queue is disabled and every packet still in it has been
    /// completed with [`LinkError::LinkClosed`].
    pub fn run(mut self) -> WorkerExit {
        let exit = loop {
            let control = Arc::clone(&self.control);
            let Some(packet) = self.queue.take_while(|| !control.is_shutdown()) else {
                break WorkerExit::Shutdown;
            };

            let reply_timeout = packet.timeout().unwrap_or(self.packet_timeout);
            self.control
                .begin(packet.id(), Some(Instant::now() + reply_timeout));
            if packet.is_abandoned() {
                trace!(id = packet.id(), "skipping abandoned request");
                self.control.finish();
                continue;
            }

            let step = self.transact(&packet, reply_timeout);
            self.control.finish();

            match step {
                Step::Done(outcome) => {
                    packet.complete(outcome);
                    self.observers.notify(Activity::Inactive);
                }
                Step::Shutdown => {
                    packet.complete(Err(LinkError::LinkClosed));
                    self.observers.notify(Activity::Inactive);
                    break WorkerExit::Shutdown;
                }
                Step::Fatal(err) => {
                    let reason = err.to_string();
                    warn!(error = %reason, "link failed; tearing down");
                    packet.complete(Err(err));
                    self.observers.notify(Activity::Inactive);
                    break WorkerExit::Fatal(reason);
                }
            }
        };

        let drained = self.queue.disable();
        if !drained.is_empty() {
            debug!(count = drained.len(), "failing queued requests");
        }
        for packet in drained {
            packet.complete(Err(LinkError::LinkClosed));
        }
        exit
    }

    fn next_seq(&mut self) -> u8 {
        let seq = self.seq;
        self.seq = self.seq.wrapping_add(1);
        seq
    }

    fn transact(&mut self, packet: &Packet, reply_timeout: Duration) -> Step {
        let seq = self.next_seq();
        debug!(
            seq,
            command = packet.command(),
            len = packet.payload().len(),
            "sending request"
        );

        self.observers.notify(Activity::Active);
        if let Err(err) = self
            .writer
            .write_frame(seq, packet.command(), packet.payload())
        {
            return self.classify_failure(seq, err, reply_timeout);
        }

        match self.reader.read_reply(seq) {
            Ok(frame) => Step::Done(reply_outcome(frame)),
            Err(err) => self.classify_failure(seq, err, reply_timeout),
        }
    }

    fn classify_failure(&self, seq: u8, err: FrameError, reply_timeout: Duration) -> Step {
        match err {
            FrameError::Io(io) if io.kind() == ErrorKind::Interrupted => {
                if self.control.is_shutdown() {
                    Step::Shutdown
                } else {
                    debug!(seq, "request cancelled by caller");
                    Step::Done(Err(LinkError::Frame(FrameError::Io(io))))
                }
            }
            FrameError::Io(io) if matches!(io.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                warn!(seq, timeout = ?reply_timeout, "no reply from device");
                Step::Done(Err(LinkError::Timeout(reply_timeout)))
            }
            err if err.is_framing() => {
                warn!(seq, error = %err, "corrupt reply frame");
                Step::Done(Err(LinkError::Frame(err)))
            }
            err @ FrameError::PayloadTooLarge { .. } => Step::Done(Err(LinkError::Frame(err))),
            err => Step::Fatal(LinkError::Frame(err)),
        }
    }
}

/// Map a reply frame to the caller's outcome, turning special codes into errors.
fn reply_outcome(frame: Frame) -> Outcome {
    match ReplyStatus::classify(frame.cmd, &frame.payload) {
        ReplyStatus::Ok(code) => {
            trace!(seq = frame.seq, code, len = frame.payload.len(), "reply received");
            Ok(Reply {
                code,
                payload: frame.payload,
            })
        }
        ReplyStatus::OutOfBounds => Err(LinkError::OutOfBounds),
        ReplyStatus::DeviceTimeout { line } => Err(LinkError::DeviceTimeout { line }),
        ReplyStatus::DeviceChecksum => Err(LinkError::DeviceChecksum),
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::net::UnixStream;
    use std::sync::Mutex;
    use std::thread;

    use bytes::Bytes;
    use mculink_frame::FrameReader as DeviceReader;
    use mculink_frame::FrameWriter as DeviceWriter;

    use super::*;

    struct Harness {
        queue: Arc<RequestQueue<Arc<Packet>>>,
        control: Arc<WorkerControl>,
        activity: Arc<Mutex<Vec<Activity>>>,
        worker: thread::JoinHandle<WorkerExit>,
        device: UnixStream,
    }

    fn start(packet_timeout: Duration) -> Harness {
        let (host, device) = UnixStream::pair().unwrap();
        host.set_read_timeout(Some(Duration::from_millis(5)))
            .unwrap();
        let reader = host.try_clone().unwrap();

        let queue = Arc::new(RequestQueue::new(8));
        let control = Arc::new(WorkerControl::new());
        let observers = Observers::new();
        let activity = Arc::new(Mutex::new(Vec::new()));
        {
            let activity = Arc::clone(&activity);
            observers.add(move |a| activity.lock().unwrap().push(a));
        }

        let worker = LinkWorker::new(
            Arc::clone(&queue),
            Arc::clone(&control),
            reader,
            host,
            observers,
            packet_timeout,
        );
        let worker = thread::spawn(move || worker.run());

        Harness {
            queue,
            control,
            activity,
            worker,
            device,
        }
    }

    fn submit(queue: &RequestQueue<Arc<Packet>>, command: u16, payload: &'static [u8]) -> Arc<Packet> {
        let packet = Arc::new(Packet::new(command, Bytes::from_static(payload)).unwrap());
        packet.mark_pending();
        queue.put(Arc::clone(&packet)).unwrap();
        packet
    }

    fn stop(h: Harness) -> WorkerExit {
        h.control.request_shutdown();
        h.queue.wake_consumers();
        h.worker.join().unwrap()
    }

    #[test]
    fn round_trip_with_sequence_numbers() {
        let h = start(Duration::from_secs(2));
        let mut device_rx = DeviceReader::new(h.device.try_clone().unwrap());
        let mut device_tx = DeviceWriter::new(h.device.try_clone().unwrap());

        let device = thread::spawn(move || {
            for expected_seq in 0..3u8 {
                let req = device_rx.read_request().unwrap();
                assert_eq!(req.seq, expected_seq);
                // A stale reply first; the worker must skip it.
                device_tx
                    .write_frame(req.seq.wrapping_sub(1), 9, b"stale")
                    .unwrap();
                device_tx.write_frame(req.seq, 0, &req.payload).unwrap();
            }
        });

        for payload in [&b"a"[..], &b"bb"[..], &b"ccc"[..]] {
            let packet = submit(&h.queue, 4, payload);
            let reply = packet
                .wait_timeout(Duration::from_secs(2))
                .unwrap()
                .unwrap();
            assert_eq!(reply.code, 0);
            assert_eq!(reply.payload.as_ref(), payload);
            assert!(!packet.is_pending());
        }

        device.join().unwrap();
        let activity = Arc::clone(&h.activity);
        assert!(matches!(stop(h), WorkerExit::Shutdown));
        let activity = activity.lock().unwrap();
        assert_eq!(
            activity.as_slice(),
            &[
                Activity::Active,
                Activity::Inactive,
                Activity::Active,
                Activity::Inactive,
                Activity::Active,
                Activity::Inactive
            ]
        );
    }

    #[test]
    fn device_error_codes_fail_only_that_packet() {
        let h = start(Duration::from_secs(2));
        let mut device_rx = DeviceReader::new(h.device.try_clone().unwrap());
        let mut device_tx = DeviceWriter::new(h.device.try_clone().unwrap());

        let device = thread::spawn(move || {
            let req = device_rx.read_request().unwrap();
            device_tx.write_frame(req.seq, 0xF0, b"").unwrap();
            let req = device_rx.read_request().unwrap();
            device_tx.write_frame(req.seq, 0xF2, &[0x00, 0x2A]).unwrap();
            let req = device_rx.read_request().unwrap();
            device_tx.write_frame(req.seq, 0xF3, b"").unwrap();
            let req = device_rx.read_request().unwrap();
            device_tx.write_frame(req.seq, 1, b"fine").unwrap();
        });

        let oob = submit(&h.queue, 200, b"");
        let to = submit(&h.queue, 1, b"");
        let cs = submit(&h.queue, 1, b"");
        let ok = submit(&h.queue, 1, b"");

        fn wait(p: &Packet) -> Outcome {
            p.wait_timeout(Duration::from_secs(2)).unwrap()
        }
        assert!(matches!(wait(&oob), Err(LinkError::OutOfBounds)));
        assert!(matches!(wait(&to), Err(LinkError::DeviceTimeout { line: 42 })));
        assert!(matches!(wait(&cs), Err(LinkError::DeviceChecksum)));
        assert_eq!(wait(&ok).unwrap().code, 1);

        device.join().unwrap();
        stop(h);
    }

    #[test]
    fn corrupt_reply_keeps_link_up() {
        let h = start(Duration::from_secs(2));
        let mut device_rx = DeviceReader::new(h.device.try_clone().unwrap());
        let mut raw = h.device.try_clone().unwrap();
        let mut device_tx = DeviceWriter::new(h.device.try_clone().unwrap());

        let device = thread::spawn(move || {
            let req = device_rx.read_request().unwrap();
            // seq, cmd 0, len 0, wrong checksum
            raw.write_all(&[mculink_frame::SOF, req.seq, 0, 0, 0x00]).unwrap();
            let req = device_rx.read_request().unwrap();
            device_tx.write_frame(req.seq, 0, b"ok").unwrap();
        });

        let bad = submit(&h.queue, 1, b"");
        let good = submit(&h.queue, 1, b"");
        let err = bad.wait_timeout(Duration::from_secs(2)).unwrap().unwrap_err();
        assert!(matches!(err, LinkError::Frame(FrameError::Checksum { .. })));
        assert_eq!(
            good.wait_timeout(Duration::from_secs(2))
                .unwrap()
                .unwrap()
                .payload
                .as_ref(),
            b"ok"
        );

        device.join().unwrap();
        stop(h);
    }

    #[test]
    fn unanswered_request_times_out_and_link_continues() {
        let h = start(Duration::from_millis(60));
        let mut device_rx = DeviceReader::new(h.device.try_clone().unwrap());
        let mut device_tx = DeviceWriter::new(h.device.try_clone().unwrap());

        let device = thread::spawn(move || {
            let _ignored = device_rx.read_request().unwrap();
            let req = device_rx.read_request().unwrap();
            device_tx.write_frame(req.seq, 0, b"second").unwrap();
        });

        let (tx, rx) = std::sync::mpsc::channel();
        let silent = Arc::new(
            Packet::new(1, Bytes::new())
                .unwrap()
                .with_callback(move |outcome| {
                    tx.send(matches!(outcome, Err(LinkError::Timeout(_)))).unwrap();
                }),
        );
        h.queue.put(silent).unwrap();
        let answered = submit(&h.queue, 1, b"");

        assert!(rx.recv_timeout(Duration::from_secs(2)).unwrap());
        let reply = answered
            .wait_timeout(Duration::from_secs(2))
            .unwrap()
            .unwrap();
        assert_eq!(reply.payload.as_ref(), b"second");

        device.join().unwrap();
        stop(h);
    }

    #[test]
    fn packet_timeout_overrides_link_default() {
        let h = start(Duration::from_millis(50));
        let mut device_rx = DeviceReader::new(h.device.try_clone().unwrap());
        let mut device_tx = DeviceWriter::new(h.device.try_clone().unwrap());

        let device = thread::spawn(move || {
            let req = device_rx.read_request().unwrap();
            thread::sleep(Duration::from_millis(200));
            device_tx.write_frame(req.seq, 0, b"late but wanted").unwrap();
        });

        let packet = Arc::new(
            Packet::new(1, Bytes::new())
                .unwrap()
                .with_timeout(Duration::from_secs(2)),
        );
        packet.mark_pending();
        h.queue.put(Arc::clone(&packet)).unwrap();

        let reply = packet
            .wait_timeout(Duration::from_secs(3))
            .unwrap()
            .unwrap();
        assert_eq!(reply.payload.as_ref(), b"late but wanted");

        device.join().unwrap();
        stop(h);
    }

    #[test]
    fn cancel_fails_in_flight_packet_only() {
        let h = start(Duration::from_secs(5));
        let mut device_rx = DeviceReader::new(h.device.try_clone().unwrap());
        let mut device_tx = DeviceWriter::new(h.device.try_clone().unwrap());

        let device = thread::spawn(move || {
            let _stalled = device_rx.read_request().unwrap();
            let req = device_rx.read_request().unwrap();
            device_tx.write_frame(req.seq, 0, b"next").unwrap();
        });

        let stalled = submit(&h.queue, 1, b"");
        assert!(stalled.wait_timeout(Duration::from_millis(50)).is_none());
        assert!(h.control.cancel(stalled.id()));

        let next = submit(&h.queue, 1, b"");
        let reply = next.wait_timeout(Duration::from_secs(2)).unwrap().unwrap();
        assert_eq!(reply.payload.as_ref(), b"next");
        let err = stalled.take_outcome().unwrap().unwrap_err();
        assert!(matches!(err, LinkError::Frame(FrameError::Io(ref e)) if e.kind() == ErrorKind::Interrupted));

        device.join().unwrap();
        stop(h);
    }

    #[test]
    fn abandoned_packet_is_not_sent() {
        let h = start(Duration::from_secs(2));
        let mut device_rx = DeviceReader::new(h.device.try_clone().unwrap());
        let mut device_tx = DeviceWriter::new(h.device.try_clone().unwrap());

        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let device = thread::spawn(move || {
            let first = device_rx.read_request().unwrap();
            release_rx.recv().unwrap();
            device_tx.write_frame(first.seq, 0, b"first").unwrap();
            let next = device_rx.read_request().unwrap();
            device_tx.write_frame(next.seq, 0, &next.payload).unwrap();
            next.payload
        });

        let first = submit(&h.queue, 1, b"1");
        let abandoned = submit(&h.queue, 1, b"2");
        assert!(abandoned.wait_timeout(Duration::from_millis(10)).is_none());
        let last = submit(&h.queue, 1, b"3");

        release_tx.send(()).unwrap();
        assert!(first.wait_timeout(Duration::from_secs(2)).unwrap().is_ok());
        assert!(last.wait_timeout(Duration::from_secs(2)).unwrap().is_ok());
        assert_eq!(device.join().unwrap().as_ref(), b"3");
        assert!(!abandoned.is_completed());

        stop(h);
    }

    #[test]
    fn connection_loss_is_fatal_and_drains_queue() {
        let h = start(Duration::from_secs(2));
        let mut device_rx = DeviceReader::new(h.device.try_clone().unwrap());

        let first = submit(&h.queue, 1, b"");
        let queued = submit(&h.queue, 1, b"");

        let _req = device_rx.read_request().unwrap();
        h.device.shutdown(std::net::Shutdown::Both).unwrap();
        drop(device_rx);

        let exit = h.worker.join().unwrap();
        assert!(matches!(exit, WorkerExit::Fatal(_)));
        assert!(matches!(
            first.wait_timeout(Duration::from_secs(1)),
            Some(Err(LinkError::Frame(FrameError::ConnectionClosed)))
        ));
        assert!(matches!(
            queued.wait_timeout(Duration::from_secs(1)),
            Some(Err(LinkError::LinkClosed))
        ));
        assert!(!h.queue.is_enabled());
        assert!(matches!(
            h.queue.put(Arc::new(Packet::new(1, Bytes::new()).unwrap())),
            Err(LinkError::LinkClosed)
        ));
    }

    #[test]
    fn shutdown_interrupts_blocked_read() {
        let h = start(Duration::from_secs(30));
        let mut device_rx = DeviceReader::new(h.device.try_clone().unwrap());
        let packet = submit(&h.queue, 1, b"");
        let _req = device_rx.read_request().unwrap();

        let queue = Arc::clone(&h.queue);
        let exit = stop(h);
        assert!(matches!(exit, WorkerExit::Shutdown));
        assert!(matches!(
            packet.wait_timeout(Duration::from_secs(1)),
            Some(Err(LinkError::LinkClosed))
        ));
        assert!(!queue.is_enabled());
    }

    #[test]
    fn sequence_wraps() {
        let queue = Arc::new(RequestQueue::new(1));
        let (a, _b) = UnixStream::pair().unwrap();
        let mut worker = LinkWorker::new(
            queue,
            Arc::new(WorkerControl::new()),
            a.try_clone().unwrap(),
            a,
            Observers::new(),
            Duration::from_secs(1),
        );
        worker.seq = 255;
        assert_eq!(worker.next_seq(), 255);
        assert_eq!(worker.next_seq(), 0);
    }
}
