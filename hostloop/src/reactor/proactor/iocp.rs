//! I/O completion port backend.

use super::{CompletionCallback, CompletionPort, Proactor, RawCompletion, Transfer};
use crate::sync::SharedFuture;

use std::io;
use std::ptr;
use std::time::Duration;

use windows_sys::Win32::Foundation::{
    CloseHandle, ERROR_IO_PENDING, GetLastError, HANDLE, INVALID_HANDLE_VALUE, WAIT_TIMEOUT,
};
use windows_sys::Win32::Storage::FileSystem::{ReadFile, WriteFile};
use windows_sys::Win32::System::IO::{
    CreateIoCompletionPort, GetQueuedCompletionStatus, OVERLAPPED, PostQueuedCompletionStatus,
};

/// An owned I/O completion port.
pub struct IocpPort {
    handle: HANDLE,
}

// The port handle is only used through thread-safe kernel calls.
unsafe impl Send for IocpPort {}
unsafe impl Sync for IocpPort {}

impl IocpPort {
    pub fn new() -> io::Result<Self> {
        let handle = unsafe { CreateIoCompletionPort(INVALID_HANDLE_VALUE, ptr::null_mut(), 0, 1) };
        if handle.is_null() {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { handle })
    }

    /// Associates `handle` with the port under completion `key`.
    pub fn associate(&self, handle: HANDLE, key: usize) -> io::Result<()> {
        let port = unsafe { CreateIoCompletionPort(handle, self.handle, key, 0) };
        if port.is_null() {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Queues a completion packet by hand.
    pub fn post(&self, transferred: u32, key: usize, overlapped: usize) -> io::Result<()> {
        let ok = unsafe {
            PostQueuedCompletionStatus(
                self.handle,
                transferred,
                key,
                overlapped as *const OVERLAPPED,
            )
        };
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl CompletionPort for IocpPort {
    fn dequeue(&self, timeout: Duration) -> io::Result<Option<RawCompletion>> {
        let mut transferred = 0u32;
        let mut key = 0usize;
        let mut overlapped: *mut OVERLAPPED = ptr::null_mut();
        let millis = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX - 1);

        let ok = unsafe {
            GetQueuedCompletionStatus(
                self.handle,
                &mut transferred,
                &mut key,
                &mut overlapped,
                millis,
            )
        };

        if overlapped.is_null() {
            if ok != 0 {
                return Ok(None);
            }
            let error = unsafe { GetLastError() };
            if error == WAIT_TIMEOUT {
                return Ok(None);
            }
            return Err(io::Error::from_raw_os_error(error as i32));
        }

        let error = if ok == 0 {
            Some(unsafe { GetLastError() } as i32)
        } else {
            None
        };

        Ok(Some(RawCompletion {
            error,
            transferred,
            key,
            overlapped: overlapped as usize,
        }))
    }

    fn close_key(&self, key: usize) {
        unsafe {
            CloseHandle(key as HANDLE);
        }
    }
}

impl Drop for IocpPort {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.handle);
        }
    }
}

/// Overlapped header plus the buffer the kernel reads into or writes from.
///
/// Boxed so its address stays fixed until the completion is dequeued.
#[repr(C)]
struct OverlappedOp {
    overlapped: OVERLAPPED,
    buffer: Vec<u8>,
}

struct SendOp(Box<OverlappedOp>);

// Only touched again on the loop thread once the kernel has finished with it.
unsafe impl Send for SendOp {}

impl SendOp {
    fn into_inner(self) -> Box<OverlappedOp> {
        self.0
    }
}

fn issue(result: i32) -> io::Result<()> {
    if result == 0 {
        let error = unsafe { GetLastError() };
        if error != ERROR_IO_PENDING {
            return Err(io::Error::from_raw_os_error(error as i32));
        }
    }
    Ok(())
}

impl Proactor<IocpPort> {
    /// Starts an overlapped read of up to `len` bytes from `handle`.
    ///
    /// `handle` must be associated with this proactor's port.
    pub fn read(&self, handle: HANDLE, len: usize) -> io::Result<SharedFuture<Transfer>> {
        self.submit(handle as usize, |_| {
            let mut op = Box::new(OverlappedOp {
                overlapped: unsafe { std::mem::zeroed() },
                buffer: vec![0; len],
            });
            let address = &mut op.overlapped as *mut OVERLAPPED as usize;
            let size = u32::try_from(len).unwrap_or(u32::MAX);

            issue(unsafe {
                ReadFile(
                    handle,
                    op.buffer.as_mut_ptr(),
                    size,
                    ptr::null_mut(),
                    &mut op.overlapped,
                )
            })?;

            let op = SendOp(op);
            let callback: CompletionCallback = Box::new(move |transferred, key, _| {
                let mut op = op.into_inner();
                op.buffer.truncate(transferred as usize);
                Ok(Transfer {
                    transferred,
                    key,
                    data: Some(std::mem::take(&mut op.buffer)),
                })
            });
            Ok((address, callback))
        })
    }

    /// Starts an overlapped write of `data` to `handle`.
    pub fn write(&self, handle: HANDLE, data: Vec<u8>) -> io::Result<SharedFuture<Transfer>> {
        self.submit(handle as usize, |_| {
            let mut op = Box::new(OverlappedOp {
                overlapped: unsafe { std::mem::zeroed() },
                buffer: data,
            });
            let address = &mut op.overlapped as *mut OVERLAPPED as usize;
            let size = u32::try_from(op.buffer.len()).unwrap_or(u32::MAX);

            issue(unsafe {
                WriteFile(
                    handle,
                    op.buffer.as_ptr(),
                    size,
                    ptr::null_mut(),
                    &mut op.overlapped,
                )
            })?;

            let op = SendOp(op);
            let callback: CompletionCallback = Box::new(move |transferred, key, _| {
                drop(op);
                Ok(Transfer {
                    transferred,
                    key,
                    data: None,
                })
            });
            Ok((address, callback))
        })
    }
}
