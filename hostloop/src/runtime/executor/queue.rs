use crate::error::ExecutorError;
use crate::sync::Cancellable;

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;

/// A unit of offloaded work and the future it completes.
pub(crate) struct Job {
    pub(crate) run: Box<dyn FnOnce() + Send>,
    pub(crate) future: Arc<dyn Cancellable>,
}

pub(crate) enum Message {
    Run(Job),
    /// Tells one worker to exit.
    Stop,
}

struct State {
    messages: VecDeque<Message>,
    /// Set by `shutdown`; no job may be queued behind the stop messages.
    closed: bool,
}

/// FIFO job queue shared by the executor and its workers.
///
/// Workers block on the condition variable while the queue is empty.
pub(crate) struct JobQueue {
    state: Mutex<State>,
    condvar: Condvar,
}

impl JobQueue {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State {
                messages: VecDeque::new(),
                closed: false,
            }),
            condvar: Condvar::new(),
        }
    }

    /// Queues `job`, or fails once the queue has been shut down.
    pub(crate) fn push(&self, job: Job) -> Result<(), ExecutorError> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(ExecutorError::Shutdown);
            }
            state.messages.push_back(Message::Run(job));
        }
        self.condvar.notify_one();
        Ok(())
    }

    /// Blocks until a message is available.
    pub(crate) fn pop(&self) -> Message {
        let mut state = self.state.lock();
        loop {
            if let Some(message) = state.messages.pop_front() {
                return message;
            }
            self.condvar.wait(&mut state);
        }
    }

    /// Closes the queue and puts one stop message per worker behind the
    /// pending jobs.
    ///
    /// With `cancel_pending`, jobs not yet picked up are removed first and
    /// their futures cancelled. Returns the number of cancelled jobs.
    pub(crate) fn shutdown(&self, workers: usize, cancel_pending: bool) -> usize {
        let cancelled: Vec<Job> = {
            let mut state = self.state.lock();
            state.closed = true;
            let cancelled = if cancel_pending {
                state
                    .messages
                    .drain(..)
                    .filter_map(|message| match message {
                        Message::Run(job) => Some(job),
                        Message::Stop => None,
                    })
                    .collect()
            } else {
                Vec::new()
            };

            state.messages.extend((0..workers).map(|_| Message::Stop));
            cancelled
        };
        self.condvar.notify_all();

        for job in &cancelled {
            job.future.cancel();
        }
        cancelled.len()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.state.lock().messages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::SharedFuture;

    fn job(future: &SharedFuture<()>) -> Job {
        Job {
            run: Box::new(|| {}),
            future: Arc::new(future.clone()),
        }
    }

    #[test]
    fn test_fifo_order() {
        let queue = JobQueue::new();
        let first = SharedFuture::new();
        let second = SharedFuture::new();
        queue.push(job(&first)).unwrap();
        queue.push(job(&second)).unwrap();

        assert_eq!(queue.len(), 2);
        assert!(matches!(queue.pop(), Message::Run(_)));
        assert!(matches!(queue.pop(), Message::Run(_)));
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_shutdown_cancels_pending_jobs() {
        let queue = JobQueue::new();
        let pending = SharedFuture::new();
        queue.push(job(&pending)).unwrap();

        assert_eq!(queue.shutdown(2, true), 1);
        assert!(pending.cancelled());
        assert!(matches!(queue.pop(), Message::Stop));
        assert!(matches!(queue.pop(), Message::Stop));
    }

    #[test]
    fn test_shutdown_keeps_pending_jobs() {
        let queue = JobQueue::new();
        let pending = SharedFuture::new();
        queue.push(job(&pending)).unwrap();

        assert_eq!(queue.shutdown(1, false), 0);
        assert!(!pending.cancelled());
        assert!(matches!(queue.pop(), Message::Run(_)));
        assert!(matches!(queue.pop(), Message::Stop));
    }

    #[test]
    fn test_pop_blocks_until_push() {
        let queue = Arc::new(JobQueue::new());
        let consumer = {
            let queue = queue.clone();
            std::thread::spawn(move || matches!(queue.pop(), Message::Stop))
        };

        std::thread::sleep(std::time::Duration::from_millis(20));
        queue.shutdown(1, false);
        assert!(consumer.join().unwrap());
    }

    #[test]
    fn test_push_after_shutdown_is_rejected() {
        let queue = JobQueue::new();
        queue.shutdown(1, false);

        let late = SharedFuture::new();
        assert!(matches!(queue.push(job(&late)), Err(ExecutorError::Shutdown)));
        assert!(matches!(queue.pop(), Message::Stop));
        assert_eq!(queue.len(), 0);
    }
}
