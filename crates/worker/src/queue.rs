//! The shared job queue workers drain.

use std::sync::Arc;

use crossbeam_queue::SegQueue;

/// A multi-producer, multi-consumer queue of serialized job strings.
///
/// `try_take` never blocks. `None` means the queue is empty right now,
/// not that it is closed.
pub trait JobQueue: Send + Sync {
    /// Takes one job if any is available.
    fn try_take(&self) -> Option<String>;

    /// Adds a job to the queue.
    fn push(&self, job: String);

    /// Number of jobs currently queued.
    fn len(&self) -> usize;

    /// Whether no job is currently queued.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<Q: JobQueue + ?Sized> JobQueue for Arc<Q> {
    fn try_take(&self) -> Option<String> {
        (**self).try_take()
    }

    fn push(&self, job: String) {
        (**self).push(job)
    }

    fn len(&self) -> usize {
        (**self).len()
    }
}

/// Lock-free in-process job queue.
#[derive(Debug, Default)]
pub struct SharedQueue {
    jobs: SegQueue<String>,
}

impl SharedQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobQueue for SharedQueue {
    fn try_take(&self) -> Option<String> {
        self.jobs.pop()
    }

    fn push(&self, job: String) {
        self.jobs.push(job);
    }

    fn len(&self) -> usize {
        self.jobs.len()
    }
}

impl<S: Into<String>> FromIterator<S> for SharedQueue {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let queue = Self::new();
        for job in iter {
            queue.push(job.into());
        }
        queue
    }
}
