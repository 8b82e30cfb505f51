use super::context::{self, ContextGuard};
use super::exception::{self, ExceptionContext, ExceptionHandler};
use super::executor::ThreadPoolExecutor;
use super::handle::Handle;
use super::task::{Runnable, Task, TaskCell};
use crate::config::LoopConfig;
use crate::error::{LoopError, Result};
use crate::host::{Direction, HostLoop, RawFd};
use crate::reactor::LoopHandle;
use crate::reactor::dispatch::{self, Message};
use crate::reactor::notifier::Multiplexer;
use crate::reactor::proactor::bridge::ProactorBridge;
use crate::reactor::proactor::{CompletionPort, Proactor};
use crate::reactor::timer::TimerBridge;
use crate::sync::{SharedFuture, WrappedFuture};
use crate::utils::{Key, Slab};

use crossbeam::channel::Receiver;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

static NEXT_LOOP_ID: AtomicU64 = AtomicU64::new(1);

/// Code run around every run of the loop.
///
/// `before_run` is called once the loop is marked running, right before
/// the host is entered (or when attaching to a running host).
/// `after_run` is called after the host returns (or when an attached loop
/// is stopped), even if the run failed.
pub trait RunHook {
    fn before_run(&self);

    fn after_run(&self);
}

pub(crate) struct LoopInner {
    id: u64,
    pub(crate) host: Rc<dyn HostLoop>,
    config: LoopConfig,
    pub(crate) debug: Cell<bool>,
    running: Cell<bool>,
    exec_active: Cell<bool>,
    closed: Cell<bool>,
    attached: RefCell<Option<ContextGuard>>,
    timers: TimerBridge,
    pub(crate) notifiers: Multiplexer,
    dispatch: RefCell<Option<Receiver<Message>>>,
    remote: LoopHandle,
    pub(crate) tasks: RefCell<Slab<Rc<dyn Runnable>>>,
    default_executor: RefCell<Option<Arc<ThreadPoolExecutor>>>,
    exception_handler: RefCell<Option<ExceptionHandler>>,
    hooks: RefCell<Vec<Rc<dyn RunHook>>>,
}

impl LoopInner {
    pub(crate) fn schedule_task(&self, key: Key) {
        let task = self.tasks.borrow().get(key).cloned();
        if let Some(task) = task {
            task.schedule();
        }
    }

    /// Moves everything sent from other threads onto the loop.
    fn drain_dispatch(self: &Rc<Self>) {
        let messages: Vec<Message> = match self.dispatch.borrow().as_ref() {
            Some(receiver) => receiver.try_iter().collect(),
            None => return,
        };

        let event_loop = EventLoop::from_inner(self.clone());
        for message in messages {
            match message {
                Message::Call(callback) => {
                    event_loop.call_soon(callback);
                }
                Message::Wake(key) => self.schedule_task(key),
            }
        }
    }
}

impl Drop for LoopInner {
    fn drop(&mut self) {
        context::unregister(self.id);
        if !self.closed.get() {
            self.timers.stop();
            self.notifiers.close();
        }
    }
}

/// A cooperative scheduler driven by a [`HostLoop`].
///
/// The loop runs callbacks, timers, fd readiness callbacks and tasks on
/// the host's thread, in the host's iterations. It never blocks on its
/// own: [`run_forever`](Self::run_forever) enters the host's `exec` and
/// everything the loop does happens inside host timer and notifier
/// callbacks.
///
/// `EventLoop` is a cheap reference-counted handle and is not `Send`. Use
/// [`remote`](Self::remote) to schedule work from other threads.
///
/// # Examples
///
/// ```rust,ignore
/// let host = Rc::new(PollHost::new()?);
/// let event_loop = EventLoop::new(host);
///
/// let answer = event_loop.run_until_complete(async { 42 })?;
/// assert_eq!(answer, 42);
/// event_loop.close()?;
/// ```
#[derive(Clone)]
pub struct EventLoop {
    inner: Rc<LoopInner>,
}

impl EventLoop {
    /// Creates a loop over `host` with the default configuration.
    pub fn new(host: Rc<dyn HostLoop>) -> Self {
        Self::with_config(host, LoopConfig::default())
    }

    /// Creates a loop over `host`.
    ///
    /// Only `debug`, the executor settings and `proactor_poll_ms` of
    /// `config` are used here; backend selection and attaching are done
    /// by [`LoopBuilder`](crate::LoopBuilder).
    pub fn with_config(host: Rc<dyn HostLoop>, config: LoopConfig) -> Self {
        let id = NEXT_LOOP_ID.fetch_add(1, Ordering::Relaxed);

        let inner = Rc::new_cyclic(|weak: &std::rc::Weak<LoopInner>| {
            let on_wake = {
                let weak = weak.clone();
                Box::new(move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.drain_dispatch();
                    }
                })
            };
            let (remote, receiver) = dispatch::channel(id, host.create_waker(on_wake));

            let timers = TimerBridge::new(&host);
            timers.set_debug(config.debug);

            LoopInner {
                id,
                host,
                debug: Cell::new(config.debug),
                config,
                running: Cell::new(false),
                exec_active: Cell::new(false),
                closed: Cell::new(false),
                attached: RefCell::new(None),
                timers,
                notifiers: Multiplexer::new(),
                dispatch: RefCell::new(Some(receiver)),
                remote,
                tasks: RefCell::new(Slab::new(64)),
                default_executor: RefCell::new(None),
                exception_handler: RefCell::new(None),
                hooks: RefCell::new(Vec::new()),
            }
        });

        context::register(id, Rc::downgrade(&inner));
        tracing::debug!(loop_id = id, "event loop created");

        Self { inner }
    }

    /// Creates a [`LoopBuilder`](crate::LoopBuilder).
    pub fn builder() -> crate::LoopBuilder {
        crate::LoopBuilder::new()
    }

    pub(crate) fn from_inner(inner: Rc<LoopInner>) -> Self {
        Self { inner }
    }

    /// The loop running or attached on this thread, if any.
    pub fn current() -> Option<EventLoop> {
        context::current().map(Self::from_inner)
    }

    /// Process-unique id of this loop.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn host(&self) -> Rc<dyn HostLoop> {
        self.inner.host.clone()
    }

    pub fn config(&self) -> &LoopConfig {
        &self.inner.config
    }

    /// A `Send` handle for scheduling work on this loop from other threads.
    pub fn remote(&self) -> LoopHandle {
        self.inner.remote.clone()
    }

    /// The loop's clock.
    pub fn time(&self) -> Instant {
        Instant::now()
    }

    pub fn get_debug(&self) -> bool {
        self.inner.debug.get()
    }

    pub fn set_debug(&self, enabled: bool) {
        self.inner.debug.set(enabled);
        self.inner.timers.set_debug(enabled);
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.get()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.get()
    }

    fn check_closed(&self) -> Result<()> {
        if self.inner.closed.get() {
            return Err(LoopError::Closed);
        }
        Ok(())
    }

    fn check_not_running(&self) -> Result<()> {
        if self.inner.running.get() || self.inner.exec_active.get() {
            return Err(LoopError::AlreadyRunning);
        }
        Ok(())
    }

    fn schedule(&self, delay: Duration, when: Option<Instant>, callback: Box<dyn FnOnce()>) -> Handle {
        let handle = Handle::new(callback, when, Rc::downgrade(&self.inner));
        self.inner.timers.add_callback(handle, delay)
    }

    /// Schedules `callback` to run on the next host iteration.
    ///
    /// Callbacks scheduled with `call_soon` run in the order they were
    /// scheduled.
    pub fn call_soon<F>(&self, callback: F) -> Handle
    where
        F: FnOnce() + 'static,
    {
        loop_debug!(self.get_debug(), "registering callback to be invoked soon");
        self.schedule(Duration::ZERO, None, Box::new(callback))
    }

    /// Schedules `callback` to run after `delay`, rounded up to whole
    /// milliseconds.
    pub fn call_later<F>(&self, delay: Duration, callback: F) -> Handle
    where
        F: FnOnce() + 'static,
    {
        loop_debug!(self.get_debug(), ?delay, "registering callback to be invoked later");
        let when = self.time().checked_add(delay);
        self.schedule(delay, when, Box::new(callback))
    }

    /// Schedules `callback` to run at loop time `when`. A time in the past
    /// behaves like [`call_soon`](Self::call_soon).
    pub fn call_at<F>(&self, when: Instant, callback: F) -> Handle
    where
        F: FnOnce() + 'static,
    {
        let delay = when.saturating_duration_since(self.time());
        loop_debug!(self.get_debug(), ?delay, "registering callback to be invoked at a point in time");
        self.schedule(delay, Some(when), Box::new(callback))
    }

    /// Same as [`LoopHandle::call_soon_threadsafe`] on [`remote`](Self::remote).
    pub fn call_soon_threadsafe<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.remote.call_soon_threadsafe(callback)
    }

    /// Calls `callback` each time `fd` is readable, until removed.
    ///
    /// Replaces any reader already registered for `fd`. The callback is
    /// never re-entered: the fd's notifier stays disabled until it returns.
    pub fn add_reader<F>(&self, fd: RawFd, callback: F) -> Result<()>
    where
        F: FnMut() + 'static,
    {
        self.check_closed()?;
        self.inner
            .notifiers
            .add(&self.inner, fd, Direction::Read, Box::new(callback))
    }

    /// Removes the reader for `fd`. Returns whether one was registered;
    /// always `false` once the loop is closed.
    pub fn remove_reader(&self, fd: RawFd) -> bool {
        self.inner.notifiers.remove(fd, Direction::Read)
    }

    /// Calls `callback` each time `fd` is writable, until removed.
    pub fn add_writer<F>(&self, fd: RawFd, callback: F) -> Result<()>
    where
        F: FnMut() + 'static,
    {
        self.check_closed()?;
        self.inner
            .notifiers
            .add(&self.inner, fd, Direction::Write, Box::new(callback))
    }

    /// Removes the writer for `fd`.
    pub fn remove_writer(&self, fd: RawFd) -> bool {
        self.inner.notifiers.remove(fd, Direction::Write)
    }

    /// Whether the notifier behind the registration for `fd` is currently
    /// enabled. `None` if nothing is registered.
    pub fn notifier_enabled(&self, fd: RawFd, direction: Direction) -> Option<bool> {
        self.inner.notifiers.is_enabled(fd, direction)
    }

    /// Spawns `future` as a task. Its first poll is queued with
    /// [`call_soon`](Self::call_soon).
    ///
    /// On a closed loop the task is returned already cancelled.
    pub fn spawn<F>(&self, future: F) -> Task<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        let cell = Rc::new(TaskCell::new(
            future,
            Rc::downgrade(&self.inner),
            self.inner.remote.clone(),
        ));

        if self.is_closed() {
            cell.abort();
            return Task { cell };
        }

        let key = self.inner.tasks.borrow_mut().insert(cell.clone());
        cell.set_key(key);
        cell.clone().schedule();

        Task { cell }
    }

    /// Number of spawned tasks that have not finished.
    pub fn pending_tasks(&self) -> usize {
        self.inner.tasks.borrow().len()
    }

    /// Number of scheduled callbacks whose host timer has not fired yet,
    /// cancelled ones included.
    pub fn pending_callbacks(&self) -> usize {
        self.inner.timers.pending()
    }

    /// Wraps a [`SharedFuture`] completed on another thread so a task can
    /// await it.
    pub fn wrap_future<T>(&self, future: SharedFuture<T>) -> WrappedFuture<T> {
        WrappedFuture::new(future)
    }

    /// Runs blocking `callback` on `executor`, or on the default executor
    /// (created on first use from the loop configuration).
    pub fn run_in_executor<F, T>(
        &self,
        executor: Option<&ThreadPoolExecutor>,
        callback: F,
    ) -> Result<WrappedFuture<T>>
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.check_closed()?;

        let future = match executor {
            Some(executor) => executor.submit(callback)?,
            None => self.default_executor()?.submit(callback)?,
        };

        Ok(self.wrap_future(future))
    }

    fn default_executor(&self) -> Result<Arc<ThreadPoolExecutor>> {
        let existing = self.inner.default_executor.borrow().clone();
        if let Some(executor) = existing {
            return Ok(executor);
        }

        let executor = Arc::new(ThreadPoolExecutor::from_config(&self.inner.config)?);
        *self.inner.default_executor.borrow_mut() = Some(executor.clone());
        Ok(executor)
    }

    /// Replaces the default executor. It is shut down when the loop closes.
    pub fn set_default_executor(&self, executor: Arc<ThreadPoolExecutor>) {
        *self.inner.default_executor.borrow_mut() = Some(executor);
    }

    /// Installs a custom exception handler.
    ///
    /// The handler receives every failure that has no other place to go.
    /// If it returns an error or panics, the failure and the original
    /// context are passed to the default handler instead.
    pub fn set_exception_handler<H>(&self, handler: H)
    where
        H: Fn(&EventLoop, &ExceptionContext) -> anyhow::Result<()> + 'static,
    {
        *self.inner.exception_handler.borrow_mut() = Some(Rc::new(handler));
    }

    /// Restores the default exception handler.
    pub fn clear_exception_handler(&self) {
        *self.inner.exception_handler.borrow_mut() = None;
    }

    pub fn exception_handler(&self) -> Option<ExceptionHandler> {
        self.inner.exception_handler.borrow().clone()
    }

    /// Logs `context` at error level.
    pub fn default_exception_handler(&self, context: &ExceptionContext) {
        loop_debug!(self.get_debug(), "default exception handler executing");

        let report = context.report();
        match &context.error {
            Some(error) => tracing::error!(error = ?error, "{report}"),
            None => tracing::error!("{report}"),
        }
    }

    /// Passes `context` to the installed handler chain.
    pub fn call_exception_handler(&self, context: &ExceptionContext) {
        let handler = self.exception_handler();
        exception::dispatch(self, handler, context);
    }

    /// Registers a hook run around every run of the loop. If the loop is
    /// already running, `before_run` is called immediately.
    pub fn add_run_hook(&self, hook: Rc<dyn RunHook>) {
        if self.is_running() {
            hook.before_run();
        }
        self.inner.hooks.borrow_mut().push(hook);
    }

    /// Drains `proactor` on a background thread whenever the loop runs.
    pub fn attach_proactor<P: CompletionPort>(&self, proactor: Arc<Proactor<P>>) {
        let bridge = ProactorBridge::new(
            proactor,
            self.remote(),
            Duration::from_millis(self.inner.config.proactor_poll_ms),
            format!("{}-proactor", self.inner.config.thread_name_prefix),
        );
        self.add_run_hook(Rc::new(bridge));
    }

    fn before_run(&self) {
        let hooks = self.inner.hooks.borrow().clone();
        for hook in hooks {
            hook.before_run();
        }
    }

    fn after_run(&self) {
        let hooks = self.inner.hooks.borrow().clone();
        for hook in hooks {
            hook.after_run();
        }
    }

    /// Runs the host until [`stop`](Self::stop) is called and returns the
    /// host's exit code.
    ///
    /// # Errors
    ///
    /// [`LoopError::Closed`] on a closed loop, [`LoopError::AlreadyRunning`]
    /// when called from inside the loop.
    pub fn run_forever(&self) -> Result<i32> {
        self.check_closed()?;
        self.check_not_running()?;

        self.inner.running.set(true);
        self.inner.exec_active.set(true);

        let _context = context::enter(Rc::downgrade(&self.inner));
        let _run = RunGuard { event_loop: self };
        self.before_run();

        loop_debug!(self.get_debug(), "starting host event loop");
        let code = self.inner.host.exec();
        loop_debug!(self.get_debug(), code, "host event loop returned");

        Ok(code)
    }

    /// Spawns `future`, runs the loop until it is done and returns its
    /// output.
    ///
    /// # Errors
    ///
    /// [`LoopError::Incomplete`] if the loop was stopped before the future
    /// finished, [`LoopError::Future`] if it panicked or was cancelled.
    pub fn run_until_complete<F>(&self, future: F) -> Result<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        self.check_closed()?;
        self.check_not_running()?;

        let task = self.spawn(future);
        let weak = Rc::downgrade(&self.inner);
        let stop_on_done = task.add_done_callback(move || {
            if let Some(inner) = weak.upgrade() {
                EventLoop::from_inner(inner).stop();
            }
        });

        let outcome = self.run_forever();
        task.remove_done_callback(stop_on_done);
        outcome?;

        self.inner.host.process_events();

        if !task.is_done() {
            return Err(LoopError::Incomplete);
        }
        Ok(task.take_result()?)
    }

    /// Stops the loop.
    ///
    /// A loop run by [`run_forever`](Self::run_forever) asks the host to
    /// exit; `run_forever` returns once the current host iteration ends.
    /// An attached loop runs its after-run hooks and detaches, leaving the
    /// host running. Does nothing on a loop that is not running.
    pub fn stop(&self) {
        if !self.is_running() {
            loop_debug!(self.get_debug(), "already stopped");
            return;
        }

        loop_debug!(self.get_debug(), "stopping event loop");
        self.inner.running.set(false);

        let attached = self.inner.attached.borrow_mut().take();
        match attached {
            Some(guard) => {
                self.after_run();
                drop(guard);
            }
            None => self.inner.host.exit(0),
        }
    }

    /// Marks the loop running inside a host that is already running.
    ///
    /// The loop's callbacks run as the host iterates; nothing blocks here.
    /// Call [`stop`](Self::stop) to detach.
    pub fn attach(&self) -> Result<()> {
        self.check_closed()?;
        self.check_not_running()?;

        loop_debug!(self.get_debug(), "attaching to running host");
        self.inner.running.set(true);
        *self.inner.attached.borrow_mut() = Some(context::enter(Rc::downgrade(&self.inner)));
        self.before_run();
        Ok(())
    }

    /// Closes the loop.
    ///
    /// Shuts down the default executor (waiting for its workers), stops
    /// the timer bridge, disables every notifier, closes the dispatch
    /// channel and drops the futures of unfinished tasks. Closing twice is
    /// a no-op.
    ///
    /// # Errors
    ///
    /// [`LoopError::Running`] while the loop runs.
    pub fn close(&self) -> Result<()> {
        if self.is_running() || self.inner.exec_active.get() {
            return Err(LoopError::Running);
        }
        if self.is_closed() {
            return Ok(());
        }

        loop_debug!(self.get_debug(), "closing event loop");
        self.inner.closed.set(true);

        let executor = self.inner.default_executor.borrow_mut().take();
        if let Some(executor) = executor {
            if executor.shutdown(true, false).is_err() {
                loop_debug!(self.get_debug(), "default executor was already shut down");
            }
        }

        self.inner.timers.stop();
        self.inner.notifiers.close();

        let receiver = self.inner.dispatch.borrow_mut().take();
        drop(receiver);

        let tasks = self.inner.tasks.borrow_mut().drain();
        for task in tasks {
            task.abort();
        }

        self.inner.hooks.borrow_mut().clear();
        Ok(())
    }
}

struct RunGuard<'a> {
    event_loop: &'a EventLoop,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.event_loop.after_run();
        self.event_loop.inner.running.set(false);
        self.event_loop.inner.exec_active.set(false);
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("id", &self.inner.id)
            .field("running", &self.is_running())
            .field("closed", &self.is_closed())
            .field("debug", &self.get_debug())
            .finish()
    }
}
