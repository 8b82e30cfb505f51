//! Loop tasks.
//!
//! A task drives one future on the loop thread. Polls are queued through
//! `call_soon`, so tasks interleave with every other callback in FIFO
//! order. Wakers are `Send` and may be woken from any thread.

mod core;
mod handle;
mod state;
mod waker;

pub(crate) use self::core::{Runnable, TaskCell};
pub use handle::{CallbackId, Task};
