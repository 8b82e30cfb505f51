//! Completion-port proactor.
//!
//! Overlapped operations are submitted under the proactor lock and keyed
//! by the address of their overlapped structure. A background thread
//! (see [`ProactorBridge`](bridge::ProactorBridge)) dequeues completions
//! without holding the lock, matches them against the pending cache and
//! hands each batch to the loop thread, where the operation's completion
//! callback produces the future's result.
//!
//! The port itself is abstracted by [`CompletionPort`] so the machinery can
//! be driven by a real I/O completion port on Windows
//! ([`IocpPort`](iocp::IocpPort)) or by a test double anywhere.

pub(crate) mod bridge;
#[cfg(windows)]
pub mod iocp;

use crate::error::CallbackError;
use crate::sync::SharedFuture;

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::io;
use std::mem;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

/// Completion key value that never names a closable handle.
pub const INVALID_KEY: usize = usize::MAX;

/// One dequeued completion packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawCompletion {
    /// OS error code when the operation failed.
    pub error: Option<i32>,
    pub transferred: u32,
    pub key: usize,
    /// Address of the operation's overlapped structure.
    pub overlapped: usize,
}

/// A completion port the proactor can drain.
pub trait CompletionPort: Send + Sync + 'static {
    /// Waits up to `timeout` for one completion. `Ok(None)` means the wait
    /// timed out.
    fn dequeue(&self, timeout: Duration) -> io::Result<Option<RawCompletion>>;

    /// Releases the handle behind a completion key whose operation is
    /// unknown to the proactor.
    fn close_key(&self, _key: usize) {}
}

/// Result of a completed operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub transferred: u32,
    pub key: usize,
    /// Bytes read, for operations that read.
    pub data: Option<Vec<u8>>,
}

/// Turns a completion packet `(transferred, key, overlapped)` into a result.
/// Runs on the loop thread, once per packet, including packets that carry
/// an OS error. For those the returned value is discarded.
pub type CompletionCallback = Box<dyn FnOnce(u32, usize, usize) -> io::Result<Transfer> + Send>;

struct PendingOp {
    future: SharedFuture<Transfer>,
    callback: CompletionCallback,
    object: usize,
}

#[derive(Default)]
struct ProactorState {
    cache: HashMap<usize, PendingOp>,
    unregistered: Vec<usize>,
    stopped_serving: HashSet<usize>,
}

/// A dequeued completion waiting to be processed on the loop thread.
pub struct Completion {
    future: SharedFuture<Transfer>,
    callback: CompletionCallback,
    error: Option<i32>,
    transferred: u32,
    key: usize,
    overlapped: usize,
}

/// Pending overlapped operations over a [`CompletionPort`].
pub struct Proactor<P> {
    port: P,
    state: Mutex<ProactorState>,
}

impl<P: CompletionPort> Proactor<P> {
    pub fn new(port: P) -> Self {
        Self {
            port,
            state: Mutex::new(ProactorState::default()),
        }
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    /// Starts an operation on `object` and registers it.
    ///
    /// `start` issues the operation and returns the address of its
    /// overlapped structure together with the completion callback. It runs
    /// under the proactor lock, so a completion dequeued concurrently is
    /// matched only after the registration is in place.
    pub fn submit<F>(&self, object: usize, start: F) -> io::Result<SharedFuture<Transfer>>
    where
        F: FnOnce(&P) -> io::Result<(usize, CompletionCallback)>,
    {
        let mut state = self.state.lock();
        let (overlapped, callback) = start(&self.port)?;

        let future = SharedFuture::new();
        state.cache.insert(
            overlapped,
            PendingOp {
                future: future.clone(),
                callback,
                object,
            },
        );

        Ok(future)
    }

    /// Drains available completions, waiting up to `timeout` for the first.
    pub fn select(&self, timeout: Duration) -> io::Result<Vec<Completion>> {
        let mut events = Vec::new();
        let mut cancelled = Vec::new();
        let mut wait = timeout;

        while let Some(raw) = self.port.dequeue(wait)? {
            wait = Duration::ZERO;

            let mut state = self.state.lock();
            let Some(op) = state.cache.remove(&raw.overlapped) else {
                if raw.key != 0 && raw.key != INVALID_KEY {
                    self.port.close_key(raw.key);
                }
                continue;
            };

            if state.stopped_serving.contains(&op.object) {
                cancelled.push(op.future);
            } else if !op.future.done() {
                events.push(Completion {
                    future: op.future,
                    callback: op.callback,
                    error: raw.error,
                    transferred: raw.transferred,
                    key: raw.key,
                    overlapped: raw.overlapped,
                });
            }
        }

        {
            let mut state = self.state.lock();
            for overlapped in mem::take(&mut state.unregistered) {
                state.cache.remove(&overlapped);
            }
        }

        for future in cancelled {
            future.cancel();
        }

        Ok(events)
    }

    /// Forgets an operation that will never produce a completion packet.
    ///
    /// The entry is dropped at the end of the next [`select`](Self::select).
    pub fn unregister(&self, overlapped: usize) {
        self.state.lock().unregistered.push(overlapped);
    }

    /// Cancels, instead of delivering, future completions for `object`.
    pub fn stop_serving(&self, object: usize) {
        self.state.lock().stopped_serving.insert(object);
    }

    /// Number of operations awaiting a completion.
    pub fn pending(&self) -> usize {
        self.state.lock().cache.len()
    }

    /// Cancels every pending operation.
    pub fn close(&self) {
        let pending: Vec<_> = {
            let mut state = self.state.lock();
            state.cache.drain().map(|(_, op)| op.future).collect()
        };

        for future in pending {
            future.cancel();
        }
    }
}

/// Resolves a batch of completions. Runs on the loop thread.
pub(crate) fn process_completions(batch: Vec<Completion>) {
    for completion in batch {
        let Completion {
            future,
            callback,
            error,
            transferred,
            key,
            overlapped,
        } = completion;

        tracing::trace!(overlapped, transferred, ?error, "processing completion");

        // The callback runs for failed packets too so it can release the
        // operation's buffers; the OS error wins over whatever it returns.
        let returned = catch_unwind(AssertUnwindSafe(|| callback(transferred, key, overlapped)));
        let outcome = match (error, returned) {
            (Some(code), _) => Err(CallbackError::raised(io::Error::from_raw_os_error(code))),
            (None, Ok(Ok(transfer))) => Ok(transfer),
            (None, Ok(Err(error))) => Err(CallbackError::raised(error)),
            (None, Err(payload)) => Err(CallbackError::from_panic(payload)),
        };

        match outcome {
            Ok(transfer) if !future.cancelled() => {
                let _ = future.set_result(transfer);
            }
            Ok(_) => {}
            Err(error) if !future.done() => {
                let _ = future.set_exception(error);
            }
            Err(_) => {}
        }
    }
}
