//! Connection manager: owns the worker's transport and drives it from
//! `Disconnected` to `Connected`, directly or through an HTTP proxy.

use std::future::Future;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use partup_protocol::wire::write_connect_request;

use crate::error::WorkerError;
use crate::types::{ConnectionState, ProxyConfig, WorkerConfig, WorkerEvent};

/// Awaits `fut`, bounded by `limit` when one is set.
pub(crate) async fn with_timeout<F, T, E>(
    limit: Option<Duration>,
    fut: F,
) -> Result<T, WorkerError>
where
    F: Future<Output = Result<T, E>>,
    WorkerError: From<E>,
{
    match limit {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => result.map_err(WorkerError::from),
            Err(_) => Err(WorkerError::Timeout),
        },
        None => fut.await.map_err(WorkerError::from),
    }
}

/// Owns one worker's TCP transport.
pub struct ConnectionManager {
    worker: usize,
    dial_host: String,
    dial_port: u16,
    server_host: String,
    server_port: u16,
    proxy: Option<ProxyConfig>,
    connect_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    state: ConnectionState,
    stream: Option<TcpStream>,
    events_tx: Option<mpsc::Sender<WorkerEvent>>,
}

impl ConnectionManager {
    pub fn new(worker: usize, config: &WorkerConfig) -> Self {
        let (dial_host, dial_port) = config.dial_target();
        Self {
            worker,
            dial_host: dial_host.to_string(),
            dial_port,
            server_host: config.server_host.clone(),
            server_port: config.server_port,
            proxy: config.proxy.clone(),
            connect_timeout: config.connect_timeout,
            write_timeout: config.write_timeout,
            state: ConnectionState::Disconnected,
            stream: None,
            events_tx: None,
        }
    }

    /// Reports state changes on `events_tx`.
    pub fn with_events(mut self, events_tx: mpsc::Sender<WorkerEvent>) -> Self {
        self.events_tx = Some(events_tx);
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// The transport, once connected.
    pub fn stream_mut(&mut self) -> Option<&mut TcpStream> {
        if self.is_connected() {
            self.stream.as_mut()
        } else {
            None
        }
    }

    /// Attempts one connection.
    ///
    /// In proxy mode the CONNECT request is written and the tunnel is
    /// assumed open; the proxy's reply is never read. On failure the
    /// manager is left `Disconnected` and the caller decides when to
    /// try again.
    pub async fn connect(&mut self) -> Result<(), WorkerError> {
        if self.is_connected() {
            return Ok(());
        }
        self.stream = None;

        let (host, port) = (self.dial_host.clone(), self.dial_port);

        self.set_state(ConnectionState::Connecting);
        debug!(worker = self.worker, %host, port, "connecting");

        let mut stream = match with_timeout(
            self.connect_timeout,
            TcpStream::connect((host.as_str(), port)),
        )
        .await
        {
            Ok(s) => s,
            Err(e) => {
                warn!(worker = self.worker, %host, port, error = %e, "connect failed");
                self.set_state(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        if self.proxy.is_some() {
            self.set_state(ConnectionState::ProxyHandshaking);
            let handshake = with_timeout(
                self.write_timeout,
                write_connect_request(&mut stream, &self.server_host, self.server_port),
            )
            .await;
            if let Err(e) = handshake {
                warn!(
                    worker = self.worker,
                    proxy = %host,
                    error = %e,
                    "proxy CONNECT failed"
                );
                self.set_state(ConnectionState::Disconnected);
                return Err(e);
            }
            debug!(
                worker = self.worker,
                server = %self.server_host,
                port = self.server_port,
                "CONNECT sent, assuming tunnel is open"
            );
        }

        self.stream = Some(stream);
        self.set_state(ConnectionState::Connected);
        info!(
            worker = self.worker,
            server = %self.server_host,
            port = self.server_port,
            proxied = self.proxy.is_some(),
            "connected"
        );
        Ok(())
    }

    /// Drops the transport.
    pub fn disconnect(&mut self) {
        if self.stream.take().is_some() || self.state != ConnectionState::Disconnected {
            info!(worker = self.worker, "disconnected");
            self.set_state(ConnectionState::Disconnected);
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        self.state = state;
        if let Some(tx) = &self.events_tx {
            let _ = tx.try_send(WorkerEvent::StateChanged {
                worker: self.worker,
                state,
            });
        }
    }
}
