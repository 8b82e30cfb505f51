use crate::reactor::LoopHandle;
use crate::reactor::dispatch::Message;
use crate::runtime::context;
use crate::utils::Key;

use std::sync::Arc;
use std::task::{Wake, Waker};

/// Thread-safe waker of a loop task.
///
/// Holds only the task key and a dispatch handle. On the loop's own thread
/// the task is scheduled directly; from any other thread a wake message is
/// sent over the dispatch channel. Wakes after the task finished, or after
/// the loop closed, are ignored.
struct TaskWaker {
    key: Key,
    remote: LoopHandle,
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        match context::local_loop(self.remote.loop_id()) {
            Some(inner) => inner.schedule_task(self.key),
            None => {
                let _ = self.remote.send(Message::Wake(self.key));
            }
        }
    }
}

pub(crate) fn make_waker(key: Key, remote: LoopHandle) -> Waker {
    Waker::from(Arc::new(TaskWaker { key, remote }))
}
