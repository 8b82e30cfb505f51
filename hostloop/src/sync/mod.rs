//! Cross-thread result containers.
//!
//! [`SharedFuture`] is the single-assignment container filled in by
//! executor workers and the proactor polling thread. [`WrappedFuture`]
//! adapts it into a `Future` awaited by tasks on the loop thread.

mod future;
mod wrapped;

pub(crate) use future::Cancellable;
pub use future::SharedFuture;
pub use wrapped::WrappedFuture;
