use crate::error::LoopError;
use crate::host::HostWaker;
use crate::utils::Key;

use crossbeam::channel::{self, Receiver, Sender};
use std::fmt;
use std::sync::Arc;

/// Work sent to the loop thread from elsewhere.
pub(crate) enum Message {
    /// Run a callback on the loop thread.
    Call(Box<dyn FnOnce() + Send>),
    /// Schedule the task with this key.
    Wake(Key),
}

/// A `Send` handle for scheduling work on an event loop from any thread.
///
/// Messages are delivered in send order. Once the loop is closed, sends
/// fail with [`LoopError::Closed`].
#[derive(Clone)]
pub struct LoopHandle {
    loop_id: u64,
    sender: Sender<Message>,
    waker: Arc<dyn HostWaker>,
}

impl LoopHandle {
    /// Schedules `callback` to run on the loop thread, as if by
    /// `call_soon` there.
    pub fn call_soon_threadsafe<F>(&self, callback: F) -> Result<(), LoopError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.send(Message::Call(Box::new(callback)))
    }

    pub(crate) fn send(&self, message: Message) -> Result<(), LoopError> {
        self.sender.send(message).map_err(|_| LoopError::Closed)?;
        self.waker.wake();
        Ok(())
    }

    pub fn loop_id(&self) -> u64 {
        self.loop_id
    }
}

impl fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopHandle")
            .field("loop_id", &self.loop_id)
            .finish()
    }
}

/// Creates the dispatch channel of loop `loop_id`.
///
/// The receiver stays on the loop thread and is drained each time the host
/// delivers `waker`.
pub(crate) fn channel(loop_id: u64, waker: Arc<dyn HostWaker>) -> (LoopHandle, Receiver<Message>) {
    let (sender, receiver) = channel::unbounded();
    (
        LoopHandle {
            loop_id,
            sender,
            waker,
        },
        receiver,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingWaker(AtomicUsize);

    impl HostWaker for CountingWaker {
        fn wake(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_send_wakes_host_and_preserves_order() {
        let waker = Arc::new(CountingWaker::default());
        let (handle, receiver) = channel(7, waker.clone());

        let mut slab = crate::utils::Slab::new(4);
        let sent: Vec<Key> = (0..3).map(|i| slab.insert(i)).collect();

        for key in sent.clone() {
            let handle = handle.clone();
            std::thread::spawn(move || handle.send(Message::Wake(key)))
                .join()
                .unwrap()
                .unwrap();
        }

        let keys: Vec<_> = receiver
            .try_iter()
            .map(|message| match message {
                Message::Wake(key) => key,
                Message::Call(_) => panic!("unexpected call"),
            })
            .collect();

        assert_eq!(keys, sent);
        assert_eq!(waker.0.load(Ordering::SeqCst), 3);
        assert_eq!(handle.loop_id(), 7);
    }

    #[test]
    fn test_send_after_receiver_dropped() {
        let waker = Arc::new(CountingWaker::default());
        let (handle, receiver) = channel(1, waker.clone());
        drop(receiver);

        let result = handle.call_soon_threadsafe(|| {});
        assert!(matches!(result, Err(LoopError::Closed)));
        assert_eq!(waker.0.load(Ordering::SeqCst), 0);
    }
}
