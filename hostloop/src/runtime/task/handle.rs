use super::core::TaskCell;
use crate::error::{CallbackError, FutureError};

use std::fmt;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

/// Identifies a done callback registered on a [`Task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

/// A handle to a future spawned on an [`EventLoop`](crate::EventLoop).
///
/// `Task` is itself a future resolving to the task's outcome: the value,
/// [`FutureError::Failed`] if the future panicked, or
/// [`FutureError::Cancelled`]. Dropping the handle does **not** cancel the
/// task; it only discards the ability to observe its result.
///
/// A task that failed and whose failure was never observed through a
/// handle is reported to the loop's exception handler when the last handle
/// goes away.
pub struct Task<T> {
    pub(crate) cell: Rc<TaskCell<T>>,
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}

impl<T: 'static> Task<T> {
    pub fn is_done(&self) -> bool {
        self.cell.is_done()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cell.is_cancelled()
    }

    /// Requests cancellation. Returns `false` if the task already finished.
    ///
    /// The future is dropped on the loop's next pass over the task, so the
    /// task only reports cancelled once the loop has run.
    pub fn cancel(&self) -> bool {
        self.cell.cancel()
    }

    /// Registers `callback` to run through `call_soon` once the task is
    /// done. If it already is, the callback is scheduled right away.
    pub fn add_done_callback<F>(&self, callback: F) -> CallbackId
    where
        F: FnOnce() + 'static,
    {
        CallbackId(self.cell.add_done_callback(Box::new(callback)))
    }

    /// Removes a callback that has not been scheduled yet.
    pub fn remove_done_callback(&self, id: CallbackId) -> bool {
        self.cell.remove_done_callback(id.0)
    }

    /// Takes the outcome of a finished task.
    ///
    /// Returns [`FutureError::InvalidState`] while the task is pending or
    /// once the value has been taken.
    pub fn take_result(&self) -> Result<T, FutureError> {
        self.cell.take_outcome()
    }

    /// The failure of a finished task, `None` if it produced a value.
    pub fn exception(&self) -> Result<Option<CallbackError>, FutureError> {
        self.cell.exception()
    }
}

impl<T: 'static> Future for Task<T> {
    type Output = Result<T, FutureError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.cell.poll_outcome(cx.waker()) {
            Some(outcome) => Poll::Ready(outcome),
            None => Poll::Pending,
        }
    }
}

impl<T: 'static> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("done", &self.is_done())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
