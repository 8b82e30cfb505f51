//! Readiness pollers for the reference host loop.
//!
//! The backend is chosen at runtime from [`Backend`]: `epoll` on Linux,
//! `poll(2)` on every Unix. Both expose the same interface: wait on a set
//! of descriptor interests plus the host's wake descriptor, and report
//! which descriptors became ready.

#[cfg(any(target_os = "linux", target_os = "android"))]
mod epoll;
mod poll;

use crate::config::Backend;

use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

/// Directions a descriptor is currently watched for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Interest {
    pub(crate) read: bool,
    pub(crate) write: bool,
}

/// Readiness reported for one descriptor.
///
/// Error and hang-up conditions are reported as both readable and
/// writable, so whichever side is watching gets to observe them.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Event {
    pub(crate) fd: RawFd,
    pub(crate) readable: bool,
    pub(crate) writable: bool,
}

pub(crate) enum Poller {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    Epoll(epoll::EpollPoller),
    Poll(poll::PollPoller),
}

impl Poller {
    /// Creates a poller for `backend` that also watches `wake_fd`.
    pub(crate) fn new(backend: Backend, wake_fd: RawFd) -> io::Result<Self> {
        match backend {
            #[cfg(any(target_os = "linux", target_os = "android"))]
            Backend::Epoll => Ok(Poller::Epoll(epoll::EpollPoller::new(wake_fd)?)),
            #[cfg(not(any(target_os = "linux", target_os = "android")))]
            Backend::Epoll => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "epoll is not available on this platform",
            )),
            Backend::Poll => Ok(Poller::Poll(poll::PollPoller::new(wake_fd))),
        }
    }

    /// Blocks until a descriptor in `interests` is ready, the wake
    /// descriptor is signalled, or `timeout` passes (`None` waits forever).
    ///
    /// Ready descriptors are written to `events`. Returns `true` if the wake
    /// descriptor fired.
    pub(crate) fn wait(
        &mut self,
        interests: &HashMap<RawFd, Interest>,
        timeout: Option<Duration>,
        events: &mut Vec<Event>,
    ) -> io::Result<bool> {
        events.clear();

        match self {
            #[cfg(any(target_os = "linux", target_os = "android"))]
            Poller::Epoll(poller) => poller.wait(interests, timeout, events),
            Poller::Poll(poller) => poller.wait(interests, timeout, events),
        }
    }
}

/// Converts a timeout to whole milliseconds, rounding up so a wait never
/// returns before the deadline it was computed from.
pub(crate) fn timeout_ms(timeout: Option<Duration>) -> i32 {
    match timeout {
        Some(t) => t.as_nanos().div_ceil(1_000_000).min(i32::MAX as u128) as i32,
        None => -1,
    }
}
