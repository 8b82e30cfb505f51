//! Thread-pool executor for blocking work.
//!
//! - [`core`]: the executor, its builder and scope guard,
//! - [`queue`]: the FIFO job queue workers block on,
//! - [`worker`]: the worker thread loop.

pub(crate) mod core;
pub(crate) mod queue;
pub(crate) mod worker;

pub use self::core::{ExecutorBuilder, ExecutorGuard, ThreadPoolExecutor};
