//! Linux `epoll`-based poller.
//!
//! Descriptors are registered with their descriptor number as the epoll
//! token. The registered set is reconciled against the requested
//! interests on every wait, so enabling or disabling a notifier only costs
//! one `epoll_ctl` call on the next pass.

use super::{Event, Interest, timeout_ms};

use libc::{
    EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD, EPOLLERR, EPOLLHUP, EPOLLIN,
    EPOLLOUT, epoll_create1, epoll_ctl, epoll_event, epoll_wait,
};
use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

/// Reserved token used for the wake descriptor.
///
/// Descriptor tokens are non-negative `i32` values, so `u64::MAX` never
/// collides with one.
const WAKE_TOKEN: u64 = u64::MAX;

pub(crate) struct EpollPoller {
    epoll: RawFd,
    /// Interests currently installed in the kernel.
    registered: HashMap<RawFd, Interest>,
    /// Reusable buffer for epoll events.
    events: Vec<epoll_event>,
}

fn flags(interest: Interest) -> u32 {
    let mut flags = 0;

    if interest.read {
        flags |= EPOLLIN;
    }
    if interest.write {
        flags |= EPOLLOUT;
    }

    flags as u32
}

impl EpollPoller {
    pub(crate) fn new(wake_fd: RawFd) -> io::Result<Self> {
        let epoll = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        if epoll < 0 {
            return Err(io::Error::last_os_error());
        }

        let mut event = epoll_event {
            events: EPOLLIN as u32,
            u64: WAKE_TOKEN,
        };

        if unsafe { epoll_ctl(epoll, EPOLL_CTL_ADD, wake_fd, &mut event) } < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(epoll) };
            return Err(err);
        }

        Ok(Self {
            epoll,
            registered: HashMap::new(),
            events: Vec::with_capacity(64),
        })
    }

    fn ctl(&self, op: i32, fd: RawFd, interest: Interest) -> io::Result<()> {
        let mut event = epoll_event {
            events: flags(interest),
            u64: fd as u64,
        };

        if unsafe { epoll_ctl(self.epoll, op, fd, &mut event) } < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    /// Installs `interest` for `fd`, tolerating a kernel state that drifted
    /// from `registered` (a descriptor closed and reused behind our back).
    fn install(&mut self, fd: RawFd, interest: Interest) {
        let known = self.registered.contains_key(&fd);
        let (first, fallback) = if known {
            (EPOLL_CTL_MOD, EPOLL_CTL_ADD)
        } else {
            (EPOLL_CTL_ADD, EPOLL_CTL_MOD)
        };

        let result = self.ctl(first, fd, interest).or_else(|err| {
            match err.raw_os_error() {
                Some(libc::ENOENT) | Some(libc::EEXIST) => self.ctl(fallback, fd, interest),
                _ => Err(err),
            }
        });

        match result {
            Ok(()) => {
                self.registered.insert(fd, interest);
            }
            Err(err) => {
                tracing::warn!(fd, error = %err, "failed to register descriptor with epoll");
                self.registered.remove(&fd);
            }
        }
    }

    fn sync(&mut self, interests: &HashMap<RawFd, Interest>) {
        let stale: Vec<RawFd> = self
            .registered
            .keys()
            .filter(|fd| !interests.contains_key(fd))
            .copied()
            .collect();

        for fd in stale {
            // A closed descriptor has already left the epoll set.
            unsafe { epoll_ctl(self.epoll, EPOLL_CTL_DEL, fd, std::ptr::null_mut()) };
            self.registered.remove(&fd);
        }

        for (&fd, &interest) in interests {
            if self.registered.get(&fd) != Some(&interest) {
                self.install(fd, interest);
            }
        }
    }

    pub(crate) fn wait(
        &mut self,
        interests: &HashMap<RawFd, Interest>,
        timeout: Option<Duration>,
        events: &mut Vec<Event>,
    ) -> io::Result<bool> {
        self.sync(interests);

        let n = unsafe {
            epoll_wait(
                self.epoll,
                self.events.as_mut_ptr(),
                self.events.capacity() as i32,
                timeout_ms(timeout),
            )
        };

        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(false);
            }
            return Err(err);
        }

        unsafe {
            self.events.set_len(n as usize);
        }

        let mut woken = false;

        for ev in &self.events {
            let token = ev.u64;
            let bits = ev.events;

            if token == WAKE_TOKEN {
                woken = true;
                continue;
            }

            let failed = bits & ((EPOLLERR | EPOLLHUP) as u32) != 0;
            events.push(Event {
                fd: token as RawFd,
                readable: failed || bits & (EPOLLIN as u32) != 0,
                writable: failed || bits & (EPOLLOUT as u32) != 0,
            });
        }

        self.events.clear();

        Ok(woken)
    }
}

impl Drop for EpollPoller {
    fn drop(&mut self) {
        unsafe { libc::close(self.epoll) };
    }
}
