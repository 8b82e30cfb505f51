//! Time utilities for loop tasks.
//!
//! - [`sleep`] completes after a delay, using a loop `call_at`,
//! - [`timeout`] bounds another future,
//! - [`yield_now`] gives the rest of the loop a turn.
//!
//! All three must be awaited inside a task of a running loop.

mod sleep;
mod timeout;
mod yield_now;

#[doc(inline)]
pub use sleep::{Sleep, sleep};

#[doc(inline)]
pub use timeout::{Timeout, timeout};

#[doc(inline)]
pub use yield_now::{YieldNow, yield_now};
