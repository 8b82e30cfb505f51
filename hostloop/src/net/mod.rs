//! Readiness-driven socket helpers.
//!
//! Each helper issues the non-blocking syscall, and on `WouldBlock` waits
//! for the descriptor with [`EventLoop::add_reader`] or
//! [`EventLoop::add_writer`] before retrying. The registration is removed
//! as soon as the wait ends, or when the future is dropped.
//!
//! Descriptors must already be in non-blocking mode. The helpers must be
//! awaited inside a task of a running loop.

mod readiness;

use self::readiness::Readiness;
use crate::host::{Direction, RawFd};
use crate::sys::{sys_accept, sys_connect, sys_read, sys_take_error, sys_write};

use std::io;
use std::net::SocketAddr;

/// Reads at most `max` bytes from `fd`. An empty buffer means end of file.
pub async fn recv(fd: RawFd, max: usize) -> io::Result<Vec<u8>> {
    let mut buffer = vec![0u8; max];

    loop {
        match sys_read(fd, &mut buffer) {
            Ok(n) => {
                buffer.truncate(n);
                return Ok(buffer);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                Readiness::new(fd, Direction::Read)?.await?;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Writes all of `data` to `fd`.
pub async fn send_all(fd: RawFd, mut data: &[u8]) -> io::Result<()> {
    while !data.is_empty() {
        match sys_write(fd, data) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "write returned zero bytes",
                ));
            }
            Ok(n) => data = &data[n..],
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                Readiness::new(fd, Direction::Write)?.await?;
            }
            Err(e) => return Err(e),
        }
    }

    Ok(())
}

/// Accepts a connection on the listening socket `fd`.
///
/// The accepted descriptor is non-blocking and owned by the caller.
pub async fn accept(fd: RawFd) -> io::Result<(RawFd, SocketAddr)> {
    loop {
        match sys_accept(fd) {
            Ok(accepted) => return Ok(accepted),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                Readiness::new(fd, Direction::Read)?.await?;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Connects the non-blocking socket `fd` to `addr`.
pub async fn connect(fd: RawFd, addr: SocketAddr) -> io::Result<()> {
    match sys_connect(fd, &addr) {
        Ok(()) => return Ok(()),
        Err(e) if in_progress(&e) => {}
        Err(e) => return Err(e),
    }

    Readiness::new(fd, Direction::Write)?.await?;

    match sys_take_error(fd)? {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn in_progress(error: &io::Error) -> bool {
    matches!(
        error.raw_os_error(),
        Some(libc::EINPROGRESS) | Some(libc::EAGAIN) | Some(libc::EINTR)
    )
}
