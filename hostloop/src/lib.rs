//! # hostloop
//!
//! **hostloop** is a cooperative task scheduler that does not own its run
//! loop. Timers, fd readiness, cross-thread wakeups and task polling are
//! all translated into primitives of an externally-owned *host loop*
//! (a GUI toolkit's loop, an embedding application's loop, or the
//! reference [`PollHost`]), and the scheduler never blocks the thread on
//! its own.
//!
//! It provides:
//!
//! - An [`EventLoop`] with `call_soon`, `call_later`, `call_at`,
//!   `add_reader` / `add_writer`, `run_forever`, `run_until_complete`,
//!   `stop` and `close`
//! - Single-threaded [`Task`]s polled from loop callbacks
//! - A [`LoopHandle`] for scheduling work from any thread
//! - A [`ThreadPoolExecutor`] for blocking work, awaited through
//!   [`WrappedFuture`]
//! - A completion-port [`proactor`] drained by a background thread
//! - An exception handler chain for failures with nowhere else to go
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use hostloop::time::sleep;
//! use std::time::Duration;
//!
//! fn main() -> Result<(), hostloop::LoopError> {
//!     let value = hostloop::run(async {
//!         sleep(Duration::from_millis(100)).await;
//!         42
//!     })?;
//!
//!     assert_eq!(value, 42);
//!     Ok(())
//! }
//! ```
//!
//! ## Embedding
//!
//! Implement [`HostLoop`] for the loop that owns the thread and pass it to
//! [`LoopBuilder::host`]. Use [`EventLoop::attach`] when the host is
//! already running and cannot be re-entered.
//!
//! ## Modules
//!
//! - [`host`] - The host loop interface and the reference [`PollHost`]
//! - [`time`] - Sleep, timeout and yielding for loop tasks
//! - [`net`] - Readiness-driven socket helpers
//! - [`proactor`] - Completion-port bridging
//! - [`config`] - Loop configuration and backend selection

/// Logs at debug level when the loop's debug mode is on.
macro_rules! loop_debug {
    ($enabled:expr, $($arg:tt)+) => {
        if $enabled {
            tracing::debug!($($arg)+);
        }
    };
}

mod reactor;
mod runtime;
mod sync;
mod utils;

#[cfg(unix)]
mod sys;

pub mod config;
pub mod error;
pub mod host;
pub mod time;

#[cfg(unix)]
pub mod net;

pub use reactor::proactor;

pub use config::{Backend, LoopConfig};
pub use error::{
    CallbackError, ConfigError, Elapsed, ExecutorError, FutureError, LoopError, Result,
};
pub use host::{Direction, HostLoop, HostWaker, Notifier, RawFd, TimerId};
pub use reactor::LoopHandle;
pub use runtime::{
    CallbackId, ENV_PREFIX, EventLoop, ExceptionContext, ExceptionHandler, ExecutorBuilder,
    ExecutorGuard, Handle, LoopBuilder, RunHook, Task, ThreadPoolExecutor,
};
pub use sync::{SharedFuture, WrappedFuture};
pub use time::yield_now;

#[cfg(unix)]
pub use host::PollHost;

/// Runs `future` to completion on a new loop and closes it.
///
/// The loop is configured from the `HOSTLOOP_*` environment variables and
/// driven by a [`PollHost`].
///
/// # Errors
///
/// Fails if the loop cannot be built, or as
/// [`EventLoop::run_until_complete`] does.
pub fn run<F>(future: F) -> Result<F::Output>
where
    F: Future + 'static,
    F::Output: 'static,
{
    let event_loop = LoopBuilder::new().from_env().build()?;
    let outcome = event_loop.run_until_complete(future);
    event_loop.close()?;
    outcome
}
