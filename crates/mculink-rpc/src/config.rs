use std::time::Duration;

/// Default time a synchronous call waits for its reply.
pub const DEFAULT_PACKET_TIMEOUT: Duration = Duration::from_millis(2500);

/// Default budget for fetching the function and property tables on connect.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(3000);

/// Default number of requests that may wait for the worker.
pub const DEFAULT_QUEUE_CAPACITY: usize = 8;

/// Configuration for a link session.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Timeout for synchronous calls.
    pub packet_timeout: Duration,
    /// Overall budget for the table fetches performed by `connect`.
    pub connect_timeout: Duration,
    /// Request queue capacity; producers block once it is full.
    pub queue_capacity: usize,
    /// How many times `connect` tries when it fails with a transient error.
    pub connect_attempts: u32,
    /// Granularity at which a blocked worker read notices cancellation.
    pub poll_interval: Duration,
    /// Write timeout applied to the outgoing stream.
    pub write_timeout: Option<Duration>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            packet_timeout: DEFAULT_PACKET_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            connect_attempts: 1,
            poll_interval: Duration::from_millis(50),
            write_timeout: Some(DEFAULT_PACKET_TIMEOUT),
        }
    }
}

impl LinkConfig {
    pub fn with_packet_timeout(mut self, timeout: Duration) -> Self {
        self.packet_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_connect_attempts(mut self, attempts: u32) -> Self {
        self.connect_attempts = attempts.max(1);
        self
    }
}
