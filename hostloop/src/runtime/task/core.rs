use super::state::TaskState;
use super::waker::make_waker;
use crate::error::{CallbackError, FutureError};
use crate::reactor::LoopHandle;
use crate::runtime::core::{EventLoop, LoopInner};
use crate::runtime::exception::{ExceptionContext, log_error};
use crate::utils::Key;

use std::cell::{Cell, RefCell};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll, Waker};

/// A task as seen by the loop, independent of its output type.
pub(crate) trait Runnable {
    /// Queues a poll unless one is already pending.
    fn schedule(self: Rc<Self>);

    /// Drops the future without completing the task. Used on close.
    fn abort(&self);
}

type DoneCallback = Box<dyn FnOnce()>;

/// A spawned future and its outcome.
///
/// Lives in the loop's task slab while pending; [`Task`](super::Task)
/// handles share it. The future is moved out of its cell while it is
/// polled, so a task woken from inside its own poll is only marked
/// `Notified` and polled again afterwards.
pub(crate) struct TaskCell<T> {
    key: Cell<Option<Key>>,
    owner: Weak<LoopInner>,
    remote: LoopHandle,
    state: Cell<TaskState>,
    future: RefCell<Option<Pin<Box<dyn Future<Output = T>>>>>,
    outcome: RefCell<Option<Result<T, FutureError>>>,
    waiters: RefCell<Vec<Waker>>,
    callbacks: RefCell<Vec<(u64, DoneCallback)>>,
    next_callback: Cell<u64>,
    cancel_requested: Cell<bool>,
    retrieved: Cell<bool>,
}

impl<T: 'static> TaskCell<T> {
    pub(crate) fn new<F>(future: F, owner: Weak<LoopInner>, remote: LoopHandle) -> Self
    where
        F: Future<Output = T> + 'static,
    {
        Self {
            key: Cell::new(None),
            owner,
            remote,
            state: Cell::new(TaskState::Idle),
            future: RefCell::new(Some(Box::pin(future))),
            outcome: RefCell::new(None),
            waiters: RefCell::new(Vec::new()),
            callbacks: RefCell::new(Vec::new()),
            next_callback: Cell::new(0),
            cancel_requested: Cell::new(false),
            retrieved: Cell::new(false),
        }
    }

    pub(crate) fn set_key(&self, key: Key) {
        self.key.set(Some(key));
    }

    fn run(self: Rc<Self>) {
        if self.state.get() == TaskState::Done {
            return;
        }
        self.state.set(TaskState::Running);

        if self.cancel_requested.get() {
            let future = self.future.borrow_mut().take();
            drop(future);
            self.finish(Err(FutureError::Cancelled));
            return;
        }

        let Some(key) = self.key.get() else {
            self.state.set(TaskState::Idle);
            return;
        };
        let Some(mut future) = self.future.borrow_mut().take() else {
            self.state.set(TaskState::Idle);
            return;
        };

        let waker = make_waker(key, self.remote.clone());
        let mut cx = Context::from_waker(&waker);

        match catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx))) {
            Ok(Poll::Pending) if self.cancel_requested.get() => {
                drop(future);
                self.finish(Err(FutureError::Cancelled));
            }
            Ok(Poll::Pending) => {
                *self.future.borrow_mut() = Some(future);
                let notified = self.state.get() == TaskState::Notified;
                self.state.set(TaskState::Idle);
                if notified {
                    self.schedule();
                }
            }
            Ok(Poll::Ready(value)) => {
                drop(future);
                self.finish(Ok(value));
            }
            Err(payload) => {
                drop(future);
                self.finish(Err(FutureError::Failed(CallbackError::from_panic(payload))));
            }
        }
    }

    fn finish(&self, outcome: Result<T, FutureError>) {
        *self.outcome.borrow_mut() = Some(outcome);
        self.state.set(TaskState::Done);

        let owner = self.owner.upgrade();
        if let (Some(owner), Some(key)) = (&owner, self.key.get()) {
            let removed = owner.tasks.borrow_mut().remove(key);
            drop(removed);
        }

        for waker in self.waiters.take() {
            waker.wake();
        }

        let callbacks = self.callbacks.take();
        if let Some(owner) = owner {
            let event_loop = EventLoop::from_inner(owner);
            for (_, callback) in callbacks {
                event_loop.call_soon(callback);
            }
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        self.state.get() == TaskState::Done
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        matches!(*self.outcome.borrow(), Some(Err(FutureError::Cancelled)))
    }

    /// Requests cancellation.
    ///
    /// The future is dropped the next time the task is polled, or right
    /// after the current poll when it cancels itself. Returns `false` if
    /// the task is already done.
    pub(crate) fn cancel(self: &Rc<Self>) -> bool {
        if self.is_done() {
            return false;
        }

        self.cancel_requested.set(true);
        if self.state.get() == TaskState::Idle {
            self.clone().schedule();
        }
        true
    }

    pub(crate) fn add_done_callback(&self, callback: DoneCallback) -> u64 {
        let id = self.next_callback.get();
        self.next_callback.set(id + 1);

        if self.is_done() {
            if let Some(owner) = self.owner.upgrade() {
                EventLoop::from_inner(owner).call_soon(callback);
            }
        } else {
            self.callbacks.borrow_mut().push((id, callback));
        }

        id
    }

    pub(crate) fn remove_done_callback(&self, id: u64) -> bool {
        let mut callbacks = self.callbacks.borrow_mut();
        let before = callbacks.len();
        callbacks.retain(|(callback_id, _)| *callback_id != id);
        callbacks.len() != before
    }

    /// Takes the outcome, or registers `waker` while the task is pending.
    pub(crate) fn poll_outcome(&self, waker: &Waker) -> Option<Result<T, FutureError>> {
        if !self.is_done() {
            let mut waiters = self.waiters.borrow_mut();
            if !waiters.iter().any(|w| w.will_wake(waker)) {
                waiters.push(waker.clone());
            }
            return None;
        }

        Some(self.take_outcome())
    }

    pub(crate) fn take_outcome(&self) -> Result<T, FutureError> {
        if !self.is_done() {
            return Err(FutureError::InvalidState("task is not done"));
        }

        self.retrieved.set(true);
        let outcome = self.outcome.borrow_mut().take();
        match outcome {
            Some(Err(error)) => {
                let shared = error.clone();
                *self.outcome.borrow_mut() = Some(Err(error));
                Err(shared)
            }
            Some(Ok(value)) => Ok(value),
            None => Err(FutureError::InvalidState("result already taken")),
        }
    }

    /// The failure of a finished task, if it failed.
    pub(crate) fn exception(&self) -> Result<Option<CallbackError>, FutureError> {
        if !self.is_done() {
            return Err(FutureError::InvalidState("task is not done"));
        }

        self.retrieved.set(true);
        match &*self.outcome.borrow() {
            Some(Err(FutureError::Cancelled)) => Err(FutureError::Cancelled),
            Some(Err(FutureError::Failed(error))) => Ok(Some(error.clone())),
            _ => Ok(None),
        }
    }
}

impl<T: 'static> Runnable for TaskCell<T> {
    fn schedule(self: Rc<Self>) {
        match self.state.get() {
            TaskState::Idle => {
                let Some(owner) = self.owner.upgrade() else {
                    return;
                };
                self.state.set(TaskState::Scheduled);

                let task = Rc::downgrade(&self);
                EventLoop::from_inner(owner).call_soon(move || {
                    if let Some(task) = task.upgrade() {
                        task.run();
                    }
                });
            }
            TaskState::Running => self.state.set(TaskState::Notified),
            TaskState::Scheduled | TaskState::Notified | TaskState::Done => {}
        }
    }

    fn abort(&self) {
        let future = self.future.borrow_mut().take();
        drop(future);
        self.callbacks.borrow_mut().clear();
        self.state.set(TaskState::Done);
        *self.outcome.borrow_mut() = Some(Err(FutureError::Cancelled));

        for waker in self.waiters.take() {
            waker.wake();
        }
    }
}

impl<T> Drop for TaskCell<T> {
    fn drop(&mut self) {
        if self.retrieved.get() {
            return;
        }

        let error = match self.outcome.get_mut().take() {
            Some(Err(FutureError::Failed(error))) => error,
            _ => return,
        };

        let message = "Task exception was never retrieved";
        match self.owner.upgrade() {
            Some(owner) => {
                let context = ExceptionContext::new(message).with_error(error);
                EventLoop::from_inner(owner).call_exception_handler(&context);
            }
            None => log_error(message, Some(&error)),
        }
    }
}
