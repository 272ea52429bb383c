//! Public types for the upload worker.

use std::time::Duration;

use partup_protocol::DEFAULT_PROXY_PORT;

/// Default transfer buffer size: 1 MiB.
pub const DEFAULT_TRANSMISSION_UNIT: usize = 1024 * 1024;

/// Connection state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport.
    Disconnected,
    /// TCP connect in progress.
    Connecting,
    /// Connected to the proxy, sending the CONNECT request.
    ProxyHandshaking,
    /// Ready to carry parts.
    Connected,
}

/// Events emitted by a worker.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// Connection state changed.
    StateChanged { worker: usize, state: ConnectionState },
    /// A part was dequeued and its file opened.
    PartStarted {
        worker: usize,
        file_id: u64,
        part_number: u64,
    },
    /// Every byte of a part was handed to the transport.
    PartCompleted {
        worker: usize,
        file_id: u64,
        part_number: u64,
        bytes: u64,
    },
    /// A part was abandoned (or requeued) after an I/O failure.
    PartFailed {
        worker: usize,
        job: String,
        error: String,
        requeued: bool,
    },
    /// A job string could not be parsed and was dropped.
    JobRejected {
        worker: usize,
        job: String,
        error: String,
    },
}

/// What happens to a part whose file could not be read or whose bytes
/// could not be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Log and drop the part.
    #[default]
    Abandon,
    /// Push the original job string back onto the queue.
    Requeue,
}

/// HTTP forward proxy used to tunnel to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
}

impl ProxyConfig {
    /// A proxy listening on the default port (80).
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PROXY_PORT,
        }
    }
}

/// Configuration for one upload worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Size of the transfer buffer; the largest part a worker can carry.
    pub transmission_unit: usize,
    /// Upload server host (IP or name).
    pub server_host: String,
    /// Upload server port.
    pub server_port: u16,
    /// Tunnel through this proxy when set.
    pub proxy: Option<ProxyConfig>,
    /// Tick delay after connecting and after each part.
    pub connected_interval: Duration,
    /// Tick delay when the queue is empty.
    pub idle_interval: Duration,
    /// Tick delay after a failed connection attempt.
    pub retry_interval: Duration,
    /// Consecutive failed connection attempts before the worker stops.
    /// `None` retries forever.
    pub max_connect_attempts: Option<u32>,
    /// Per-attempt connect timeout. `None` waits as long as the OS does.
    pub connect_timeout: Option<Duration>,
    /// Per-write timeout. `None` waits indefinitely.
    pub write_timeout: Option<Duration>,
    /// Handling of parts that fail after dequeue.
    pub failure_policy: FailurePolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            transmission_unit: DEFAULT_TRANSMISSION_UNIT,
            server_host: "127.0.0.1".into(),
            server_port: 9000,
            proxy: None,
            connected_interval: Duration::from_millis(100),
            idle_interval: Duration::from_millis(500),
            retry_interval: Duration::from_millis(500),
            max_connect_attempts: None,
            connect_timeout: None,
            write_timeout: None,
            failure_policy: FailurePolicy::Abandon,
        }
    }
}

impl WorkerConfig {
    /// Direct connection to `host:port` with default intervals.
    pub fn direct(host: impl Into<String>, port: u16) -> Self {
        Self {
            server_host: host.into(),
            server_port: port,
            ..Self::default()
        }
    }

    /// Address the worker dials first: the proxy when configured,
    /// the server otherwise.
    pub fn dial_target(&self) -> (&str, u16) {
        match &self.proxy {
            Some(proxy) => (proxy.host.as_str(), proxy.port),
            None => (self.server_host.as_str(), self.server_port),
        }
    }
}
