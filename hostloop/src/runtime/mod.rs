//! The event loop and everything it schedules.
//!
//! - [`EventLoop`] owns the bridges to the host and runs callbacks, tasks
//!   and readiness callbacks on the host's thread.
//! - [`Task`] is a spawned future, polled from loop callbacks.
//! - [`ThreadPoolExecutor`] runs blocking work off the loop thread.
//! - [`ExceptionContext`] carries failures to the exception handler.

mod core;
mod exception;
mod executor;
mod handle;
mod task;

pub(crate) mod builder;
pub(crate) mod context;

pub use self::core::{EventLoop, RunHook};
pub use builder::{ENV_PREFIX, LoopBuilder};
pub use exception::{ExceptionContext, ExceptionHandler};
pub use executor::{ExecutorBuilder, ExecutorGuard, ThreadPoolExecutor};
pub use handle::Handle;
pub use task::{CallbackId, Task};

pub(crate) use self::core::LoopInner;
