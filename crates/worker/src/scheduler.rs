//! The upload worker: a single timer loop that connects, polls the
//! shared queue and runs one part transfer at a time.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use partup_protocol::PartDescriptor;

use crate::connection::ConnectionManager;
use crate::error::WorkerError;
use crate::queue::JobQueue;
use crate::transfer::{TransferEngine, open_part_file};
use crate::types::{ConnectionState, FailurePolicy, WorkerConfig, WorkerEvent};

/// One upload worker.
///
/// All of the worker's state is touched from a single task, one tick at
/// a time, so at most one part is ever in flight.
pub struct UploadWorker {
    id: usize,
    config: WorkerConfig,
    queue: Arc<dyn JobQueue>,
    connection: ConnectionManager,
    engine: TransferEngine,
    events_tx: Option<mpsc::Sender<WorkerEvent>>,
    failed_connects: u32,
}

impl UploadWorker {
    /// Creates a disconnected worker. The transfer buffer is allocated here
    /// and reused for every part.
    pub fn new(id: usize, config: WorkerConfig, queue: Arc<dyn JobQueue>) -> Self {
        let connection = ConnectionManager::new(id, &config);
        let engine = TransferEngine::new(config.transmission_unit, config.write_timeout);
        Self {
            id,
            config,
            queue,
            connection,
            engine,
            events_tx: None,
            failed_connects: 0,
        }
    }

    /// Reports worker and connection events on `events_tx`.
    pub fn with_events(mut self, events_tx: mpsc::Sender<WorkerEvent>) -> Self {
        self.connection = self.connection.with_events(events_tx.clone());
        self.events_tx = Some(events_tx);
        self
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Runs one tick and returns the delay before the next one.
    ///
    /// - Disconnected: one connection attempt.
    /// - Connected, queue empty: nothing.
    /// - Connected, job available: the whole part transfer, success or not.
    ///
    /// Fails only once `max_connect_attempts` consecutive attempts failed.
    pub async fn tick(&mut self) -> Result<Duration, WorkerError> {
        if !self.connection.is_connected() {
            return match self.connection.connect().await {
                Ok(()) => {
                    self.failed_connects = 0;
                    Ok(self.config.connected_interval)
                }
                Err(_) => {
                    self.failed_connects = self.failed_connects.saturating_add(1);
                    let exhausted = self
                        .config
                        .max_connect_attempts
                        .is_some_and(|max| self.failed_connects >= max);
                    if exhausted {
                        return Err(WorkerError::RetriesExhausted(self.failed_connects));
                    }
                    debug!(
                        worker = self.id,
                        attempt = self.failed_connects,
                        delay = ?self.config.retry_interval,
                        "retrying connection"
                    );
                    Ok(self.config.retry_interval)
                }
            };
        }

        let Some(job) = self.queue.try_take() else {
            trace!(worker = self.id, "queue empty");
            return Ok(self.config.idle_interval);
        };

        self.process_job(job).await;
        Ok(self.config.connected_interval)
    }

    /// Ticks until `cancel` fires or the connection retry budget runs out.
    ///
    /// Cancellation is observed between ticks; a part already in flight
    /// is finished first.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), WorkerError> {
        info!(
            worker = self.id,
            unit = self.engine.transmission_unit(),
            "upload worker started"
        );

        let mut delay = Duration::ZERO;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            delay = match self.tick().await {
                Ok(next) => next,
                Err(e) => {
                    error!(worker = self.id, error = %e, "upload worker stopping");
                    self.connection.disconnect();
                    return Err(e);
                }
            };
        }

        self.connection.disconnect();
        info!(worker = self.id, "upload worker stopped");
        Ok(())
    }

    /// Runs the worker as a tokio task.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<Result<(), WorkerError>> {
        tokio::spawn(self.run(cancel))
    }

    async fn process_job(&mut self, job: String) {
        let mut part = match PartDescriptor::parse(&job) {
            Ok(part) => part,
            Err(e) => {
                warn!(worker = self.id, job = %job, error = %e, "rejecting malformed job");
                self.emit(WorkerEvent::JobRejected {
                    worker: self.id,
                    job,
                    error: e.to_string(),
                });
                return;
            }
        };

        match self.transfer(&mut part).await {
            Ok(bytes) => {
                info!(
                    worker = self.id,
                    file_id = part.file_id,
                    part_number = part.part_number,
                    bytes,
                    "part uploaded"
                );
                self.emit(WorkerEvent::PartCompleted {
                    worker: self.id,
                    file_id: part.file_id,
                    part_number: part.part_number,
                    bytes,
                });
            }
            Err(e) => self.handle_failure(job, &part, e),
        }
    }

    /// Opens the part's file and streams it. The file is closed on return.
    async fn transfer(&mut self, part: &mut PartDescriptor) -> Result<u64, WorkerError> {
        self.engine.check_fits(part)?;
        let mut file = open_part_file(part).await?;

        debug!(worker = self.id, %part, "starting part");
        self.emit(WorkerEvent::PartStarted {
            worker: self.id,
            file_id: part.file_id,
            part_number: part.part_number,
        });

        let stream = self
            .connection
            .stream_mut()
            .ok_or(WorkerError::NotConnected)?;
        self.engine.send_part(stream, &mut file, part).await
    }

    fn handle_failure(&mut self, job: String, part: &PartDescriptor, error: WorkerError) {
        // An oversized part would bounce between workers forever.
        let requeued = self.config.failure_policy == FailurePolicy::Requeue
            && !matches!(error, WorkerError::PartTooLarge { .. });

        warn!(
            worker = self.id,
            file_id = part.file_id,
            part_number = part.part_number,
            written = part.bytes_written,
            requeued,
            error = %error,
            "part failed"
        );

        if error.breaks_connection() {
            self.connection.disconnect();
        }
        if requeued {
            self.queue.push(job.clone());
        }

        self.emit(WorkerEvent::PartFailed {
            worker: self.id,
            job,
            error: error.to_string(),
            requeued,
        });
    }

    fn emit(&self, event: WorkerEvent) {
        if let Some(tx) = &self.events_tx
            && let Err(e) = tx.try_send(event)
        {
            trace!(worker = self.id, "dropping worker event: {e}");
        }
    }
}
