//! The host loop interface.
//!
//! The event loop never blocks the thread itself. It is driven by a host
//! loop owned by someone else (a GUI toolkit, an embedding application, or
//! the reference [`PollHost`]) and only talks to it through the traits in
//! this module:
//!
//! - [`HostLoop`] runs and stops the host, flushes pending events once,
//!   arms repeating millisecond timers and creates notifiers and wakers.
//! - [`Notifier`] is one file descriptor's readiness subscription in one
//!   [`Direction`].
//! - [`HostWaker`] lets any thread make the host call back into the loop
//!   thread.

#[cfg(unix)]
mod poll;

#[cfg(unix)]
pub use poll::PollHost;

use std::io;
use std::rc::Rc;
use std::sync::Arc;

/// Raw descriptor type accepted by [`Notifier`]s.
#[cfg(unix)]
pub type RawFd = std::os::fd::RawFd;

/// Raw descriptor type accepted by [`Notifier`]s.
#[cfg(windows)]
pub type RawFd = std::os::windows::io::RawSocket;

/// Identifier of a host timer, unique for the lifetime of the host.
pub type TimerId = u64;

/// Readiness direction of a [`Notifier`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Read,
    Write,
}

/// An externally-owned run loop.
///
/// Every method is called on the thread that owns the host.
pub trait HostLoop {
    /// Runs the host until [`exit`](Self::exit) is called and returns the
    /// exit code.
    fn exec(&self) -> i32;

    /// Asks a running [`exec`](Self::exec) to return `code`.
    ///
    /// Does nothing when the host is not running.
    fn exit(&self, code: i32);

    /// Processes pending events once without blocking.
    fn process_events(&self);

    /// Starts a repeating timer firing every `interval_ms` milliseconds
    /// until killed. An interval of `0` fires on every host iteration.
    fn start_timer(&self, interval_ms: u64, on_timeout: Box<dyn FnMut(TimerId)>) -> TimerId;

    /// Stops a timer. Unknown ids are ignored.
    fn kill_timer(&self, id: TimerId);

    /// Creates a disabled readiness notifier for `fd` in `direction`.
    ///
    /// Dropping the returned notifier detaches it from the host.
    fn create_notifier(&self, fd: RawFd, direction: Direction) -> io::Result<Rc<dyn Notifier>>;

    /// Creates a thread-safe wake primitive.
    ///
    /// After any call to [`HostWaker::wake`], from any thread, the host
    /// invokes `on_wake` on its own thread at least once.
    fn create_waker(&self, on_wake: Box<dyn FnMut()>) -> Arc<dyn HostWaker>;
}

/// A per-(fd, direction) readiness subscription.
pub trait Notifier {
    fn fd(&self) -> RawFd;

    fn direction(&self) -> Direction;

    /// Enables or disables delivery. A disabled notifier is never activated.
    fn set_enabled(&self, enabled: bool);

    fn is_enabled(&self) -> bool;

    /// Installs the slot invoked with the descriptor each time the
    /// notifier is activated, replacing any previous slot.
    fn connect(&self, slot: Box<dyn FnMut(RawFd)>);

    /// Removes the slot.
    fn disconnect(&self);
}

/// Wakes the host loop from any thread.
pub trait HostWaker: Send + Sync {
    fn wake(&self);
}
