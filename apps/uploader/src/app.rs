//! Application orchestrator: shared queue, job feeders, workers, shutdown.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use partup_worker::{JobQueue, SharedQueue, UploadWorker, WorkerEvent};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::Config;

/// How long workers get to finish their current part after shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Totals reported when the uploader stops.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UploadStats {
    pub parts_completed: u64,
    pub bytes_sent: u64,
    pub parts_failed: u64,
    pub jobs_rejected: u64,
}

/// Runs the uploader until Ctrl-C or until every worker has stopped.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let queue: Arc<dyn JobQueue> = Arc::new(SharedQueue::new());

    // -- Job sources --
    if let Some(path) = &config.jobs_file {
        let count = enqueue_file(path, queue.as_ref()).await?;
        tracing::info!(path = %path.display(), count, "jobs loaded");
    }

    let stdin_queue = Arc::clone(&queue);
    let stdin_cancel = cancel.clone();
    tokio::spawn(async move {
        let stdin = BufReader::new(tokio::io::stdin());
        tokio::select! {
            _ = stdin_cancel.cancelled() => {}
            result = enqueue_lines(stdin, stdin_queue.as_ref()) => match result {
                Ok(count) => tracing::debug!(count, "stdin closed"),
                Err(e) => tracing::warn!("reading jobs from stdin failed: {e}"),
            },
        }
    });

    // -- Events --
    let (events_tx, events_rx) = mpsc::channel(256);
    let stats_task = tokio::spawn(log_events(events_rx));

    // -- Workers --
    let worker_config = config.worker_config();
    let mut workers = JoinSet::new();
    for id in 0..config.workers {
        let worker = UploadWorker::new(id, worker_config.clone(), Arc::clone(&queue))
            .with_events(events_tx.clone());
        workers.spawn(worker.run(cancel.clone()));
    }
    drop(events_tx);

    tracing::info!(workers = config.workers, "uploader ready");

    // -- Main loop: wait for shutdown or for every worker to exit --
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("SIGINT received, shutting down");
        }
        _ = wait_all(&mut workers) => {
            tracing::warn!("all workers stopped");
        }
    }

    // -- Graceful shutdown --
    cancel.cancel();
    if tokio::time::timeout(SHUTDOWN_GRACE, wait_all(&mut workers))
        .await
        .is_err()
    {
        tracing::warn!("workers still busy after {SHUTDOWN_GRACE:?}, aborting");
        workers.abort_all();
        wait_all(&mut workers).await;
    }

    let stats = stats_task.await?;
    tracing::info!(
        parts_completed = stats.parts_completed,
        bytes_sent = stats.bytes_sent,
        parts_failed = stats.parts_failed,
        jobs_rejected = stats.jobs_rejected,
        queued = queue.len(),
        "upload summary"
    );
    Ok(())
}

/// Joins every worker task, logging the ones that stopped with an error.
async fn wait_all(workers: &mut JoinSet<Result<(), partup_worker::WorkerError>>) {
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("worker failed: {e}"),
            Err(e) if e.is_cancelled() => {}
            Err(e) => tracing::error!("worker panicked: {e}"),
        }
    }
}

/// Pushes every non-blank line of `reader` onto `queue`.
async fn enqueue_lines<R>(reader: R, queue: &dyn JobQueue) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut count = 0;
    while let Some(line) = lines.next_line().await? {
        let job = line.trim();
        if job.is_empty() {
            continue;
        }
        queue.push(job.to_string());
        count += 1;
    }
    Ok(count)
}

async fn enqueue_file(path: &Path, queue: &dyn JobQueue) -> anyhow::Result<usize> {
    let file = tokio::fs::File::open(path).await?;
    Ok(enqueue_lines(BufReader::new(file), queue).await?)
}

/// Logs worker events until every sender is gone and returns the totals.
async fn log_events(mut events_rx: mpsc::Receiver<WorkerEvent>) -> UploadStats {
    let mut stats = UploadStats::default();
    while let Some(event) = events_rx.recv().await {
        match event {
            WorkerEvent::StateChanged { worker, state } => {
                tracing::debug!(worker, ?state, "connection state changed");
            }
            WorkerEvent::PartStarted { .. } => {}
            WorkerEvent::PartCompleted { bytes, .. } => {
                stats.parts_completed += 1;
                stats.bytes_sent += bytes;
            }
            WorkerEvent::PartFailed { .. } => stats.parts_failed += 1,
            WorkerEvent::JobRejected { .. } => stats.jobs_rejected += 1,
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use partup_worker::ConnectionState;

    #[tokio::test]
    async fn enqueue_lines_skips_blanks() {
        let queue = SharedQueue::new();
        let input: &[u8] = b"1|a|0|1|0|1\n\n   \n2|b|0|1|0|1\r\n";

        let count = enqueue_lines(input, &queue).await.unwrap();
        assert_eq!(count, 2);
        assert_eq!(queue.try_take().as_deref(), Some("1|a|0|1|0|1"));
        assert_eq!(queue.try_take().as_deref(), Some("2|b|0|1|0|1"));
        assert!(queue.try_take().is_none());
    }

    #[tokio::test]
    async fn enqueue_file_reads_jobs() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("jobs.txt");
        std::fs::write(&path, "7|x|0|4|0|4\n7|x|1|4|4|8\n").unwrap();

        let queue = SharedQueue::new();
        assert_eq!(enqueue_file(&path, &queue).await.unwrap(), 2);
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn enqueue_missing_file_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let queue = SharedQueue::new();
        assert!(enqueue_file(&tmp.path().join("none"), &queue).await.is_err());
    }

    #[tokio::test]
    async fn stats_tally_events() {
        let (tx, rx) = mpsc::channel(16);
        let task = tokio::spawn(log_events(rx));

        tx.send(WorkerEvent::StateChanged {
            worker: 0,
            state: ConnectionState::Connected,
        })
        .await
        .unwrap();
        for bytes in [10, 20] {
            tx.send(WorkerEvent::PartCompleted {
                worker: 0,
                file_id: 1,
                part_number: 0,
                bytes,
            })
            .await
            .unwrap();
        }
        tx.send(WorkerEvent::PartFailed {
            worker: 1,
            job: "j".into(),
            error: "e".into(),
            requeued: false,
        })
        .await
        .unwrap();
        tx.send(WorkerEvent::JobRejected {
            worker: 1,
            job: "bad".into(),
            error: "e".into(),
        })
        .await
        .unwrap();
        drop(tx);

        let stats = task.await.unwrap();
        assert_eq!(
            stats,
            UploadStats {
                parts_completed: 2,
                bytes_sent: 30,
                parts_failed: 1,
                jobs_rejected: 1,
            }
        );
    }
}
