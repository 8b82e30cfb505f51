use crate::error::{CallbackError, FutureError};

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::task::Waker;
use std::time::{Duration, Instant};

type DoneCallback<T> = Box<dyn FnOnce(&SharedFuture<T>) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Pending,
    Running,
    Cancelled,
    Finished,
}

struct State<T> {
    status: Status,
    value: Option<T>,
    error: Option<CallbackError>,
    /// Set once the value has been moved out by an awaiting adaptor.
    taken: bool,
    callbacks: Vec<DoneCallback<T>>,
    wakers: Vec<Waker>,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    cond: Condvar,
}

/// A single-assignment result container shared between threads.
///
/// `SharedFuture` is what the thread-pool executor and the proactor hand
/// back to callers. The producing thread moves it from pending to running
/// and then to finished (with a value or a [`CallbackError`]). Any thread
/// may cancel it while it is still pending. Transitions only move forward:
/// a value or error delivered after cancellation is dropped.
///
/// Blocking readers use [`result`](Self::result) and
/// [`exception`](Self::exception). Loop-side code awaits it through
/// [`EventLoop::wrap_future`](crate::EventLoop::wrap_future).
pub struct SharedFuture<T> {
    inner: Arc<Shared<T>>,
}

/// Type-erased cancellation, used by the executor's job queue.
pub(crate) trait Cancellable: Send + Sync {
    fn cancel(&self) -> bool;
}

impl<T> Clone for SharedFuture<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for SharedFuture<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for SharedFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = self.inner.state.lock().status;
        f.debug_struct("SharedFuture").field("status", &status).finish()
    }
}

impl<T> SharedFuture<T> {
    /// Creates a pending future.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Shared {
                state: Mutex::new(State {
                    status: Status::Pending,
                    value: None,
                    error: None,
                    taken: false,
                    callbacks: Vec::new(),
                    wakers: Vec::new(),
                }),
                cond: Condvar::new(),
            }),
        }
    }

    /// Attempts to cancel the future.
    ///
    /// Returns `false` if the future is already running or finished,
    /// `true` if it is (now) cancelled.
    pub fn cancel(&self) -> bool {
        {
            let mut state = self.inner.state.lock();
            match state.status {
                Status::Running | Status::Finished => return false,
                Status::Cancelled => return true,
                Status::Pending => state.status = Status::Cancelled,
            }
        }

        self.complete();
        true
    }

    pub fn cancelled(&self) -> bool {
        self.inner.state.lock().status == Status::Cancelled
    }

    pub fn running(&self) -> bool {
        self.inner.state.lock().status == Status::Running
    }

    /// Returns `true` if the future was cancelled or has finished.
    pub fn done(&self) -> bool {
        matches!(
            self.inner.state.lock().status,
            Status::Cancelled | Status::Finished
        )
    }

    /// Marks the future as running, unless it was cancelled first.
    ///
    /// Returns `Ok(false)` if the future was cancelled, in which case the
    /// work it stands for must not be started.
    pub fn set_running_or_notify_cancel(&self) -> Result<bool, FutureError> {
        let mut state = self.inner.state.lock();
        match state.status {
            Status::Cancelled => Ok(false),
            Status::Pending => {
                state.status = Status::Running;
                Ok(true)
            }
            Status::Running | Status::Finished => Err(FutureError::InvalidState(
                "future is already running or finished",
            )),
        }
    }

    /// Stores the value and wakes every waiter.
    ///
    /// A value arriving after cancellation is dropped.
    pub fn set_result(&self, value: T) -> Result<(), FutureError> {
        self.finish(Ok(value))
    }

    /// Stores the failure and wakes every waiter.
    ///
    /// A failure arriving after cancellation is dropped.
    pub fn set_exception(&self, error: CallbackError) -> Result<(), FutureError> {
        self.finish(Err(error))
    }

    fn finish(&self, outcome: Result<T, CallbackError>) -> Result<(), FutureError> {
        {
            let mut state = self.inner.state.lock();
            match state.status {
                Status::Cancelled => {
                    tracing::trace!("dropping outcome delivered to a cancelled future");
                    return Ok(());
                }
                Status::Finished => {
                    return Err(FutureError::InvalidState("future is already finished"));
                }
                Status::Pending | Status::Running => {}
            }

            match outcome {
                Ok(value) => state.value = Some(value),
                Err(error) => state.error = Some(error),
            }
            state.status = Status::Finished;
        }

        self.complete();
        Ok(())
    }

    /// Wakes blocked readers, loop-side wakers and runs done callbacks.
    fn complete(&self) {
        let (callbacks, wakers) = {
            let mut state = self.inner.state.lock();
            (
                std::mem::take(&mut state.callbacks),
                std::mem::take(&mut state.wakers),
            )
        };

        self.inner.cond.notify_all();

        for waker in wakers {
            waker.wake();
        }

        for callback in callbacks {
            self.invoke(callback);
        }
    }

    fn invoke(&self, callback: DoneCallback<T>) {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(self))) {
            let error = CallbackError::from_panic(payload);
            tracing::error!(error = %error, "exception calling shared future callback");
        }
    }

    /// Registers a callback run once the future is done.
    ///
    /// If the future is already done the callback runs immediately on the
    /// calling thread. Otherwise it runs on whichever thread completes or
    /// cancels the future.
    pub fn add_done_callback<F>(&self, callback: F)
    where
        F: FnOnce(&SharedFuture<T>) + Send + 'static,
    {
        {
            let mut state = self.inner.state.lock();
            if !matches!(state.status, Status::Cancelled | Status::Finished) {
                state.callbacks.push(Box::new(callback));
                return;
            }
        }

        self.invoke(Box::new(callback));
    }

    /// Blocks until the future is done or `timeout` passes.
    ///
    /// Returns `true` if the future is done.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.inner.state.lock();

        while !matches!(state.status, Status::Cancelled | Status::Finished) {
            match deadline {
                Some(deadline) => {
                    if self.inner.cond.wait_until(&mut state, deadline).timed_out() {
                        return matches!(state.status, Status::Cancelled | Status::Finished);
                    }
                }
                None => self.inner.cond.wait(&mut state),
            }
        }

        true
    }

    /// Blocks until done and returns the failure, if any.
    ///
    /// Returns `Ok(None)` when the future finished with a value.
    pub fn exception(&self, timeout: Option<Duration>) -> Result<Option<CallbackError>, FutureError> {
        if !self.wait(timeout) {
            return Err(FutureError::Timeout);
        }

        let state = self.inner.state.lock();
        match state.status {
            Status::Cancelled => Err(FutureError::Cancelled),
            _ => Ok(state.error.clone()),
        }
    }

    /// Moves the outcome out for a single loop-side consumer.
    ///
    /// Registers `waker` and returns `None` while the future is not done.
    pub(crate) fn poll_outcome(&self, waker: &Waker) -> Option<Result<T, FutureError>> {
        let mut state = self.inner.state.lock();

        match state.status {
            Status::Pending | Status::Running => {
                if !state.wakers.iter().any(|w| w.will_wake(waker)) {
                    state.wakers.push(waker.clone());
                }
                None
            }
            Status::Cancelled => Some(Err(FutureError::Cancelled)),
            Status::Finished => {
                if let Some(error) = &state.error {
                    return Some(Err(FutureError::Failed(error.clone())));
                }
                if state.taken {
                    return Some(Err(FutureError::InvalidState("result already taken")));
                }
                state.taken = true;
                Some(
                    state
                        .value
                        .take()
                        .ok_or(FutureError::InvalidState("result already taken")),
                )
            }
        }
    }
}

impl<T: Clone> SharedFuture<T> {
    /// Blocks until done and returns a copy of the value.
    ///
    /// Returns [`FutureError::Cancelled`] for a cancelled future,
    /// [`FutureError::Failed`] when the work failed and
    /// [`FutureError::Timeout`] when `timeout` passes first.
    pub fn result(&self, timeout: Option<Duration>) -> Result<T, FutureError> {
        if !self.wait(timeout) {
            return Err(FutureError::Timeout);
        }

        let state = self.inner.state.lock();
        match state.status {
            Status::Cancelled => Err(FutureError::Cancelled),
            _ => {
                if let Some(error) = &state.error {
                    return Err(FutureError::Failed(error.clone()));
                }
                state
                    .value
                    .clone()
                    .ok_or(FutureError::InvalidState("result already taken"))
            }
        }
    }
}

impl<T: Send> Cancellable for SharedFuture<T> {
    fn cancel(&self) -> bool {
        SharedFuture::cancel(self)
    }
}
