use super::core::{EventLoop, LoopInner};
use super::exception::ExceptionContext;
use crate::error::CallbackError;

use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::{Rc, Weak};
use std::time::Instant;

struct HandleInner {
    callback: RefCell<Option<Box<dyn FnOnce()>>>,
    cancelled: Cell<bool>,
    when: Option<Instant>,
    owner: Weak<LoopInner>,
}

/// A scheduled callback.
///
/// Returned by [`EventLoop::call_soon`], [`EventLoop::call_later`] and
/// [`EventLoop::call_at`]. The callback runs at most once and never after
/// [`cancel`](Self::cancel) has been observed. Cancelling only marks the
/// handle; the host timer carrying it still fires and finds nothing to do.
#[derive(Clone)]
pub struct Handle {
    inner: Rc<HandleInner>,
}

impl Handle {
    pub(crate) fn new(
        callback: Box<dyn FnOnce()>,
        when: Option<Instant>,
        owner: Weak<LoopInner>,
    ) -> Self {
        Self {
            inner: Rc::new(HandleInner {
                callback: RefCell::new(Some(callback)),
                cancelled: Cell::new(false),
                when,
                owner,
            }),
        }
    }

    /// Cancels the callback and releases everything it captured.
    pub fn cancel(&self) {
        self.inner.cancelled.set(true);
        let callback = self.inner.callback.borrow_mut().take();
        drop(callback);
    }

    pub fn cancelled(&self) -> bool {
        self.inner.cancelled.get()
    }

    /// The loop time the callback was scheduled for, for delayed calls.
    pub fn when(&self) -> Option<Instant> {
        self.inner.when
    }

    /// Runs the callback unless cancelled or already run.
    ///
    /// A panic is caught and reported to the loop's exception handler.
    pub(crate) fn run(&self) {
        if self.inner.cancelled.get() {
            return;
        }

        let Some(callback) = self.inner.callback.borrow_mut().take() else {
            return;
        };

        if let Err(payload) = catch_unwind(AssertUnwindSafe(callback)) {
            let error = CallbackError::from_panic(payload);

            match self.inner.owner.upgrade() {
                Some(owner) => {
                    let context = ExceptionContext::new("Exception in callback")
                        .with_error(error)
                        .with_handle(self.clone());
                    EventLoop::from_inner(owner).call_exception_handler(&context);
                }
                None => {
                    tracing::error!(error = %error, "exception in callback of a dropped event loop");
                }
            }
        }
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("cancelled", &self.cancelled())
            .field("when", &self.inner.when)
            .finish()
    }
}
