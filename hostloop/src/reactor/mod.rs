//! Bridges between the event loop and the host.
//!
//! The loop owns no thread and no poller of its own. Everything it waits
//! for is expressed in host terms:
//! - delayed callbacks become one-shot uses of host timers,
//! - fd readiness becomes host notifiers, disabled while their callback is
//!   pending,
//! - work from other threads travels over a channel drained when the host
//!   delivers a wake,
//! - overlapped I/O completions are drained by a background thread and
//!   delivered over that same channel.

pub(crate) mod dispatch;
pub(crate) mod notifier;
pub mod proactor;
pub(crate) mod timer;

pub use dispatch::LoopHandle;
