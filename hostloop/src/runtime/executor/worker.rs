use super::queue::{JobQueue, Message};

use std::sync::Arc;

/// A thread-pool worker.
///
/// Runs jobs in queue order until it pops a stop message. A job never
/// unwinds into the worker: the submit wrapper catches panics and stores
/// them in the job's future.
pub(crate) struct Worker {
    id: usize,
    queue: Arc<JobQueue>,
}

impl Worker {
    pub(crate) fn new(id: usize, queue: Arc<JobQueue>) -> Self {
        Self { id, queue }
    }

    pub(crate) fn run(&self) {
        tracing::trace!(worker = self.id, "worker started");

        loop {
            match self.queue.pop() {
                Message::Run(job) => (job.run)(),
                Message::Stop => break,
            }
        }

        tracing::trace!(worker = self.id, "worker exiting");
    }
}
