use crate::host::HostWaker;
use crate::sys;

use std::io;
use std::os::fd::RawFd;

/// The wake descriptor of a [`PollHost`](super::PollHost).
///
/// An `eventfd` on Linux, a non-blocking self-pipe elsewhere. Writing to it
/// makes the poller return; the host drains it before running wake slots.
pub(crate) struct WakeFd {
    read: RawFd,
    write: RawFd,
}

impl WakeFd {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    pub(crate) fn new() -> io::Result<Self> {
        let fd = sys::sys_eventfd()?;
        Ok(Self { read: fd, write: fd })
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    pub(crate) fn new() -> io::Result<Self> {
        let (read, write) = sys::sys_pipe()?;
        Ok(Self { read, write })
    }

    /// Descriptor the poller watches for readability.
    pub(crate) fn fd(&self) -> RawFd {
        self.read
    }

    pub(crate) fn wake(&self) {
        // A full pipe or a saturated eventfd already has a pending wake.
        let _ = sys::sys_write(self.write, &1u64.to_ne_bytes());
    }

    /// Consumes every pending wake.
    pub(crate) fn drain(&self) {
        let mut buf = [0u8; 64];
        while let Ok(n) = sys::sys_read(self.read, &mut buf) {
            if n == 0 {
                break;
            }
        }
    }
}

impl HostWaker for WakeFd {
    fn wake(&self) {
        WakeFd::wake(self);
    }
}

impl Drop for WakeFd {
    fn drop(&mut self) {
        sys::sys_close(self.read);
        if self.write != self.read {
            sys::sys_close(self.write);
        }
    }
}
