//! Portable `poll(2)`-based poller.
//!
//! Keeps no kernel state: the descriptor array is rebuilt from the
//! requested interests on every wait, with the wake descriptor first.

use super::{Event, Interest, timeout_ms};

use libc::{POLLERR, POLLHUP, POLLIN, POLLNVAL, POLLOUT, nfds_t, pollfd};
use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

pub(crate) struct PollPoller {
    wake_fd: RawFd,
    /// Reusable descriptor array.
    fds: Vec<pollfd>,
}

impl PollPoller {
    pub(crate) fn new(wake_fd: RawFd) -> Self {
        Self {
            wake_fd,
            fds: Vec::new(),
        }
    }

    pub(crate) fn wait(
        &mut self,
        interests: &HashMap<RawFd, Interest>,
        timeout: Option<Duration>,
        events: &mut Vec<Event>,
    ) -> io::Result<bool> {
        self.fds.clear();
        self.fds.push(pollfd {
            fd: self.wake_fd,
            events: POLLIN,
            revents: 0,
        });

        for (&fd, interest) in interests {
            let mut flags = 0;
            if interest.read {
                flags |= POLLIN;
            }
            if interest.write {
                flags |= POLLOUT;
            }

            self.fds.push(pollfd {
                fd,
                events: flags,
                revents: 0,
            });
        }

        let rc = unsafe {
            libc::poll(
                self.fds.as_mut_ptr(),
                self.fds.len() as nfds_t,
                timeout_ms(timeout),
            )
        };

        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(false);
            }
            return Err(err);
        }

        let woken = self.fds[0].revents != 0;

        for pfd in self.fds.iter().skip(1) {
            let re = pfd.revents;
            if re == 0 {
                continue;
            }

            let failed = re & (POLLERR | POLLHUP | POLLNVAL) != 0;
            events.push(Event {
                fd: pfd.fd,
                readable: failed || re & POLLIN != 0,
                writable: failed || re & POLLOUT != 0,
            });
        }

        Ok(woken)
    }
}
