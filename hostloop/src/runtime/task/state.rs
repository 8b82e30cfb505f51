/// Scheduling state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskState {
    /// Waiting for a wake. Not queued.
    Idle,

    /// A `call_soon` to poll the task is pending.
    Scheduled,

    /// Being polled on the loop thread.
    Running,

    /// Woken while running; polled again once the current poll returns.
    Notified,

    /// Finished with a value, a failure or cancellation. Never polled again.
    Done,
}
