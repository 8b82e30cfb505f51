use super::queue::{Job, JobQueue};
use super::worker::Worker;
use crate::config::{LoopConfig, default_worker_stack_size};
use crate::error::{CallbackError, ExecutorError};
use crate::sync::SharedFuture;

use parking_lot::Mutex;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

/// Builder for a [`ThreadPoolExecutor`].
#[derive(Debug, Clone)]
pub struct ExecutorBuilder {
    max_workers: usize,
    stack_size: Option<usize>,
    thread_name_prefix: String,
}

impl Default for ExecutorBuilder {
    fn default() -> Self {
        Self {
            max_workers: 10,
            stack_size: default_worker_stack_size(),
            thread_name_prefix: "hostloop".to_string(),
        }
    }
}

impl ExecutorBuilder {
    /// Sets the number of worker threads.
    ///
    /// # Panics
    ///
    /// Panics if `n` is zero.
    pub fn max_workers(mut self, n: usize) -> Self {
        assert!(n > 0, "max_workers must be greater than 0");
        self.max_workers = n;
        self
    }

    /// Sets the worker stack size in bytes. `None` keeps the platform
    /// default.
    pub fn stack_size(mut self, bytes: Option<usize>) -> Self {
        self.stack_size = bytes;
        self
    }

    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Spawns the workers.
    pub fn build(self) -> Result<ThreadPoolExecutor, ExecutorError> {
        let queue = Arc::new(JobQueue::new());
        let mut handles = Vec::with_capacity(self.max_workers);

        for id in 0..self.max_workers {
            let mut builder = thread::Builder::new().name(format!("{}-{id}", self.thread_name_prefix));
            if let Some(size) = self.stack_size {
                builder = builder.stack_size(size);
            }

            let worker = Worker::new(id, queue.clone());
            match builder.spawn(move || worker.run()) {
                Ok(handle) => handles.push(handle),
                Err(error) => {
                    queue.shutdown(handles.len(), true);
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(ExecutorError::Spawn(error));
                }
            }
        }

        tracing::debug!(workers = self.max_workers, "thread pool executor started");

        Ok(ThreadPoolExecutor {
            queue,
            handles: Mutex::new(handles),
            max_workers: self.max_workers,
            shutdown: AtomicBool::new(false),
        })
    }
}

/// A fixed-size pool of worker threads for blocking work.
///
/// Jobs run in submission order. Each job's outcome lands in the
/// [`SharedFuture`] returned by [`submit`](Self::submit); loop code awaits
/// it through [`EventLoop::run_in_executor`](crate::EventLoop::run_in_executor).
pub struct ThreadPoolExecutor {
    queue: Arc<JobQueue>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    max_workers: usize,
    shutdown: AtomicBool,
}

impl ThreadPoolExecutor {
    /// Starts `max_workers` workers with default settings.
    pub fn new(max_workers: usize) -> Result<Self, ExecutorError> {
        Self::builder().max_workers(max_workers).build()
    }

    pub fn builder() -> ExecutorBuilder {
        ExecutorBuilder::default()
    }

    /// Starts an executor sized and named from a loop configuration.
    pub fn from_config(config: &LoopConfig) -> Result<Self, ExecutorError> {
        Self::builder()
            .max_workers(config.max_workers.max(1))
            .stack_size(config.worker_stack_size)
            .thread_name_prefix(config.thread_name_prefix.clone())
            .build()
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Queues `callback` and returns the future of its outcome.
    ///
    /// An `Err` returned by the callback, or a panic, completes the future
    /// with a [`CallbackError`]. A job whose future is cancelled before a
    /// worker picks it up never runs.
    pub fn submit<F, T>(&self, callback: F) -> Result<SharedFuture<T>, ExecutorError>
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_shutdown() {
            return Err(ExecutorError::Shutdown);
        }

        let future = SharedFuture::new();
        let producer = future.clone();

        let run = Box::new(move || {
            match producer.set_running_or_notify_cancel() {
                Ok(true) => {}
                Ok(false) => return,
                Err(error) => {
                    tracing::warn!(%error, "executor job already started");
                    return;
                }
            }

            let outcome = match catch_unwind(AssertUnwindSafe(callback)) {
                Ok(Ok(value)) => producer.set_result(value),
                Ok(Err(error)) => producer.set_exception(CallbackError::raised(error)),
                Err(payload) => producer.set_exception(CallbackError::from_panic(payload)),
            };
            if let Err(error) = outcome {
                tracing::debug!(%error, "executor job outcome dropped");
            }
        });

        self.queue.push(Job {
            run,
            future: Arc::new(future.clone()),
        })?;

        Ok(future)
    }

    /// Stops accepting work and tells every worker to exit once the jobs
    /// ahead of it are done.
    ///
    /// With `cancel_futures`, jobs still queued are cancelled instead of
    /// run. With `wait`, blocks until all workers have exited. A second
    /// call returns [`ExecutorError::Shutdown`].
    pub fn shutdown(&self, wait: bool, cancel_futures: bool) -> Result<(), ExecutorError> {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return Err(ExecutorError::Shutdown);
        }

        let cancelled = self.queue.shutdown(self.max_workers, cancel_futures);
        tracing::debug!(wait, cancelled, "shutting down thread pool executor");

        if wait {
            self.join();
        }
        Ok(())
    }

    fn join(&self) {
        let handles = std::mem::take(&mut *self.handles.lock());
        let current = thread::current().id();

        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                tracing::error!("executor worker panicked");
            }
        }
    }

    /// Scopes the executor: shuts it down, waiting for workers, when the
    /// guard drops.
    pub fn enter(&self) -> Result<ExecutorGuard<'_>, ExecutorError> {
        if self.is_shutdown() {
            return Err(ExecutorError::Shutdown);
        }
        Ok(ExecutorGuard { executor: self })
    }
}

impl Drop for ThreadPoolExecutor {
    fn drop(&mut self) {
        if !self.is_shutdown() {
            let _ = self.shutdown(true, false);
        }
    }
}

/// Returned by [`ThreadPoolExecutor::enter`].
pub struct ExecutorGuard<'a> {
    executor: &'a ThreadPoolExecutor,
}

impl ExecutorGuard<'_> {
    pub fn executor(&self) -> &ThreadPoolExecutor {
        self.executor
    }
}

impl Drop for ExecutorGuard<'_> {
    fn drop(&mut self) {
        if self.executor.shutdown(true, false).is_err() {
            tracing::debug!("executor already shut down when leaving scope");
        }
    }
}
