use super::SharedFuture;
use crate::error::FutureError;

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// A loop-side awaitable over a [`SharedFuture`].
///
/// Produced by [`EventLoop::wrap_future`](crate::EventLoop::wrap_future)
/// and [`EventLoop::run_in_executor`](crate::EventLoop::run_in_executor).
/// The producing thread's completion wakes the awaiting task through the
/// task's thread-safe waker, so the result is always observed on the loop
/// thread.
///
/// Cancelling this future, or dropping it before it resolves, cancels the
/// underlying shared future. Work that is already running is not
/// interrupted.
pub struct WrappedFuture<T> {
    source: SharedFuture<T>,
    finished: bool,
}

impl<T> WrappedFuture<T> {
    pub(crate) fn new(source: SharedFuture<T>) -> Self {
        Self {
            source,
            finished: false,
        }
    }

    /// Cancels the underlying shared future.
    ///
    /// Returns `false` if the work already started or finished.
    pub fn cancel(&self) -> bool {
        self.source.cancel()
    }

    /// Returns the wrapped shared future.
    pub fn source(&self) -> &SharedFuture<T> {
        &self.source
    }
}

impl<T> Future for WrappedFuture<T> {
    type Output = Result<T, FutureError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.source.poll_outcome(cx.waker()) {
            Some(outcome) => {
                self.finished = true;
                Poll::Ready(outcome)
            }
            None => Poll::Pending,
        }
    }
}

impl<T> Drop for WrappedFuture<T> {
    fn drop(&mut self) {
        if !self.finished {
            self.source.cancel();
        }
    }
}
