use super::{CompletionPort, Proactor, process_completions};
use crate::reactor::dispatch::LoopHandle;
use crate::runtime::RunHook;

use crossbeam::channel;
use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

struct Worker {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// Drains a [`Proactor`] on a background thread while the loop runs.
///
/// Started before the host runs and stopped (and joined) after it
/// returns. Each non-empty batch of completions is handed to the loop
/// thread through the dispatch channel.
pub(crate) struct ProactorBridge<P> {
    proactor: Arc<Proactor<P>>,
    remote: LoopHandle,
    poll: Duration,
    name: String,
    worker: RefCell<Option<Worker>>,
}

impl<P: CompletionPort> ProactorBridge<P> {
    pub(crate) fn new(
        proactor: Arc<Proactor<P>>,
        remote: LoopHandle,
        poll: Duration,
        name: String,
    ) -> Self {
        Self {
            proactor,
            remote,
            poll,
            name,
            worker: RefCell::new(None),
        }
    }

    pub(crate) fn start(&self) {
        if self.is_running() {
            return;
        }

        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = channel::bounded(1);

        let proactor = self.proactor.clone();
        let remote = self.remote.clone();
        let poll = self.poll;
        let flag = stop.clone();

        let spawned = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                let _ = ready_tx.send(());
                drain(&proactor, &remote, poll, &flag);
            });

        match spawned {
            Ok(thread) => {
                let _ = ready_rx.recv();
                tracing::debug!(thread = %self.name, "proactor bridge started");
                *self.worker.borrow_mut() = Some(Worker { stop, thread });
            }
            Err(error) => {
                tracing::error!(%error, "failed to start proactor bridge");
            }
        }
    }

    pub(crate) fn stop(&self) {
        let Some(worker) = self.worker.borrow_mut().take() else {
            return;
        };

        worker.stop.store(true, Ordering::Release);
        if worker.thread.join().is_err() {
            tracing::error!("proactor bridge thread panicked");
        }
        tracing::debug!(thread = %self.name, "proactor bridge stopped");
    }

    pub(crate) fn is_running(&self) -> bool {
        self.worker.borrow().is_some()
    }
}

fn drain<P: CompletionPort>(
    proactor: &Proactor<P>,
    remote: &LoopHandle,
    poll: Duration,
    stop: &AtomicBool,
) {
    while !stop.load(Ordering::Acquire) {
        match proactor.select(poll) {
            Ok(batch) if batch.is_empty() => {}
            Ok(batch) => {
                if remote
                    .call_soon_threadsafe(move || process_completions(batch))
                    .is_err()
                {
                    tracing::debug!("event loop closed, proactor bridge exiting");
                    return;
                }
            }
            Err(error) => {
                tracing::error!(%error, "completion port dequeue failed");
                thread::sleep(poll);
            }
        }
    }
}

impl<P: CompletionPort> RunHook for ProactorBridge<P> {
    fn before_run(&self) {
        self.start();
    }

    fn after_run(&self) {
        self.stop();
    }
}

impl<P> Drop for ProactorBridge<P> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            worker.stop.store(true, Ordering::Release);
            let _ = worker.thread.join();
        }
    }
}
